//! Virtual File System
//!
//! The filesystem the guest sees through its preopened directories.
//! Only an in-memory backend exists; nothing survives a page reload.

pub mod memory;

pub use memory::MemoryFs;

use std::io;

/// A file handle
pub type FileHandle = usize;

/// File open modes
#[derive(Debug, Clone, Copy)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    /// Fail if the file already exists (only meaningful with `create`)
    pub exclusive: bool,
    pub truncate: bool,
}

impl Default for OpenOptions {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            exclusive: false,
            truncate: false,
        }
    }
}

impl OpenOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub fn exclusive(mut self, exclusive: bool) -> Self {
        self.exclusive = exclusive;
        self
    }

    pub fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }
}

/// File metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Metadata {
    pub size: u64,
    pub is_dir: bool,
    pub is_file: bool,
}

/// Directory entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

/// The FileSystem trait - implement this for different backends
pub trait FileSystem {
    /// Open a file, returning a handle
    fn open(&mut self, path: &str, options: OpenOptions) -> io::Result<FileHandle>;

    /// Close a file handle
    fn close(&mut self, handle: FileHandle) -> io::Result<()>;

    /// Read from a file at the handle's position
    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> io::Result<usize>;

    /// Write to a file at the handle's position (or its end, in append mode)
    fn write(&mut self, handle: FileHandle, buf: &[u8]) -> io::Result<usize>;

    /// Seek within a file
    fn seek(&mut self, handle: FileHandle, pos: io::SeekFrom) -> io::Result<u64>;

    /// Truncate or zero-extend an open file
    fn set_len(&mut self, handle: FileHandle, len: u64) -> io::Result<()>;

    /// Get metadata for an open file handle
    fn fstat(&self, handle: FileHandle) -> io::Result<Metadata>;

    /// Get file metadata
    fn metadata(&self, path: &str) -> io::Result<Metadata>;

    /// Create a directory
    fn create_dir(&mut self, path: &str) -> io::Result<()>;

    /// Read directory contents, sorted by name
    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>>;

    /// Remove a file
    fn remove_file(&mut self, path: &str) -> io::Result<()>;

    /// Remove an empty directory
    fn remove_dir(&mut self, path: &str) -> io::Result<()>;

    /// Rename/move a file or directory
    fn rename(&mut self, from: &str, to: &str) -> io::Result<()>;

    /// Check if path exists
    fn exists(&self, path: &str) -> bool;
}

/// Normalize a path: leading slash, `.` and `..` resolved, no trailing slash
///
/// `..` never climbs above the root.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for component in path.split('/') {
        match component {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return "/".to_string();
    }

    let mut normalized = String::new();
    for part in parts {
        normalized.push('/');
        normalized.push_str(part);
    }
    normalized
}

/// Join a relative path onto a directory, then normalize
pub fn join_path(dir: &str, path: &str) -> String {
    if path.starts_with('/') {
        normalize_path(path)
    } else {
        normalize_path(&format!("{}/{}", dir, path))
    }
}

/// Get the parent directory of a normalized path
pub fn parent_path(path: &str) -> Option<String> {
    let path = normalize_path(path);
    if path == "/" {
        return None;
    }
    let idx = path.rfind('/')?;
    if idx == 0 {
        Some("/".to_string())
    } else {
        Some(path[..idx].to_string())
    }
}

/// Whether `path` lies inside `root` (or is `root` itself)
pub fn is_within(path: &str, root: &str) -> bool {
    let path = normalize_path(path);
    let root = normalize_path(root);
    root == "/" || path == root || path.starts_with(&format!("{}/", root))
}
