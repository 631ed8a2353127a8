//! In-memory filesystem implementation
//!
//! Simple, fast, ephemeral. Data lives only as long as the page is open.

use super::{
    normalize_path, parent_path, DirEntry, FileHandle, FileSystem, Metadata, OpenOptions,
};
use slab::Slab;
use std::collections::BTreeMap;
use std::io::{self, SeekFrom};

/// An open file's path and cursor
struct OpenFile {
    path: String,
    position: u64,
    readable: bool,
    writable: bool,
    append: bool,
}

/// A stored file or directory
#[derive(Clone)]
enum Node {
    File(Vec<u8>),
    Directory,
}

/// In-memory filesystem
pub struct MemoryFs {
    /// All files and directories, keyed by normalized path
    nodes: BTreeMap<String, Node>,
    /// Open file handles
    handles: Slab<OpenFile>,
}

fn too_large() -> io::Error {
    io::Error::new(io::ErrorKind::FileTooLarge, "File too large")
}

/// `offset + len` as an in-memory index, if the result fits the size cap
fn file_end(offset: u64, len: usize) -> io::Result<usize> {
    offset
        .checked_add(len as u64)
        .filter(|&end| end <= MemoryFs::MAX_FILE_SIZE)
        .and_then(|end| usize::try_from(end).ok())
        .ok_or_else(too_large)
}

fn invalid_handle() -> io::Error {
    io::Error::new(io::ErrorKind::InvalidInput, "Invalid file handle")
}

fn not_found(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, format!("Not found: {}", what))
}

impl MemoryFs {
    /// Largest size a file may grow to (256 MiB)
    pub const MAX_FILE_SIZE: u64 = 256 * 1024 * 1024;

    pub fn new() -> Self {
        let mut fs = Self {
            nodes: BTreeMap::new(),
            handles: Slab::new(),
        };
        // Root directory always exists
        fs.nodes.insert("/".to_string(), Node::Directory);
        fs
    }

    /// Seed a file with content, creating it (and replacing any old content)
    pub fn insert_file(&mut self, path: &str, data: Vec<u8>) -> io::Result<()> {
        let path = normalize_path(path);
        self.ensure_parent(&path)?;
        if matches!(self.nodes.get(&path), Some(Node::Directory)) {
            return Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                "Cannot overwrite directory",
            ));
        }
        self.nodes.insert(path, Node::File(data));
        Ok(())
    }

    /// Number of currently open handles
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Ensure parent directories exist
    fn ensure_parent(&self, path: &str) -> io::Result<()> {
        if let Some(parent) = parent_path(path) {
            match self.nodes.get(&parent) {
                Some(Node::Directory) => {}
                Some(Node::File(_)) => {
                    return Err(io::Error::new(
                        io::ErrorKind::NotADirectory,
                        format!("Not a directory: {}", parent),
                    ))
                }
                None => return Err(not_found(&parent)),
            }
        }
        Ok(())
    }

    fn file_data(&self, path: &str) -> io::Result<&Vec<u8>> {
        match self.nodes.get(path) {
            Some(Node::File(data)) => Ok(data),
            _ => Err(not_found(path)),
        }
    }

    fn file_data_mut(&mut self, path: &str) -> io::Result<&mut Vec<u8>> {
        match self.nodes.get_mut(path) {
            Some(Node::File(data)) => Ok(data),
            _ => Err(not_found(path)),
        }
    }

    /// Paths strictly below `dir`
    fn descendants(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "/" {
            "/".to_string()
        } else {
            format!("{}/", dir)
        };
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(p, _)| p.starts_with(&prefix))
            .filter(|(p, _)| p.as_str() != dir)
            .map(|(p, _)| p.clone())
            .collect()
    }
}

impl Default for MemoryFs {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSystem for MemoryFs {
    fn open(&mut self, path: &str, options: OpenOptions) -> io::Result<FileHandle> {
        let path = normalize_path(path);

        match self.nodes.get(&path) {
            Some(Node::Directory) => {
                return Err(io::Error::new(
                    io::ErrorKind::IsADirectory,
                    "Cannot open directory as file",
                ))
            }
            Some(Node::File(_)) if options.create && options.exclusive => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    format!("File exists: {}", path),
                ))
            }
            Some(Node::File(_)) => {
                if options.truncate {
                    self.file_data_mut(&path)?.clear();
                }
            }
            None if options.create => {
                self.ensure_parent(&path)?;
                self.nodes.insert(path.clone(), Node::File(Vec::new()));
            }
            None => return Err(not_found(&path)),
        }

        let handle = self.handles.insert(OpenFile {
            path,
            position: 0,
            readable: options.read,
            writable: options.write || options.append,
            append: options.append,
        });

        Ok(handle)
    }

    fn close(&mut self, handle: FileHandle) -> io::Result<()> {
        self.handles.try_remove(handle).map(|_| ()).ok_or_else(invalid_handle)
    }

    fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> io::Result<usize> {
        let file = self.handles.get(handle).ok_or_else(invalid_handle)?;

        if !file.readable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "File not opened for reading",
            ));
        }

        let data = self.file_data(&file.path)?;
        let position = usize::try_from(file.position).unwrap_or(usize::MAX);

        let available = data.len().saturating_sub(position);
        let to_read = buf.len().min(available);
        if to_read > 0 {
            buf[..to_read].copy_from_slice(&data[position..position + to_read]);
        }

        if let Some(file) = self.handles.get_mut(handle) {
            file.position += to_read as u64;
        }

        Ok(to_read)
    }

    fn write(&mut self, handle: FileHandle, buf: &[u8]) -> io::Result<usize> {
        let file = self.handles.get(handle).ok_or_else(invalid_handle)?;

        if !file.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "File not opened for writing",
            ));
        }

        let path = file.path.clone();
        let append = file.append;
        let position = file.position;

        let data = self.file_data_mut(&path)?;
        let start = if append { data.len() as u64 } else { position };
        let end = file_end(start, buf.len())?;
        let start = end - buf.len();

        // Extend file if necessary
        if end > data.len() {
            data.resize(end, 0);
        }
        data[start..end].copy_from_slice(buf);

        if let Some(file) = self.handles.get_mut(handle) {
            file.position = end as u64;
        }

        Ok(buf.len())
    }

    fn seek(&mut self, handle: FileHandle, pos: SeekFrom) -> io::Result<u64> {
        let file = self.handles.get(handle).ok_or_else(invalid_handle)?;
        let current = file.position;
        let size = self.file_data(&file.path)?.len() as u64;

        let new_pos = match pos {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(n) => size.checked_add_signed(n),
            SeekFrom::Current(n) => current.checked_add_signed(n),
        }
        .ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, "Seek before start of file")
        })?;

        if let Some(file) = self.handles.get_mut(handle) {
            file.position = new_pos;
        }

        Ok(new_pos)
    }

    fn set_len(&mut self, handle: FileHandle, len: u64) -> io::Result<()> {
        let file = self.handles.get(handle).ok_or_else(invalid_handle)?;
        if !file.writable {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "File not opened for writing",
            ));
        }
        let path = file.path.clone();
        let len = file_end(len, 0)?;
        self.file_data_mut(&path)?.resize(len, 0);
        Ok(())
    }

    fn fstat(&self, handle: FileHandle) -> io::Result<Metadata> {
        let file = self.handles.get(handle).ok_or_else(invalid_handle)?;
        self.metadata(&file.path)
    }

    fn metadata(&self, path: &str) -> io::Result<Metadata> {
        let path = normalize_path(path);

        match self.nodes.get(&path) {
            Some(Node::File(data)) => Ok(Metadata {
                size: data.len() as u64,
                is_dir: false,
                is_file: true,
            }),
            Some(Node::Directory) => Ok(Metadata {
                size: 0,
                is_dir: true,
                is_file: false,
            }),
            None => Err(not_found(&path)),
        }
    }

    fn create_dir(&mut self, path: &str) -> io::Result<()> {
        let path = normalize_path(path);

        if self.nodes.contains_key(&path) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "Path already exists",
            ));
        }

        self.ensure_parent(&path)?;
        self.nodes.insert(path, Node::Directory);
        Ok(())
    }

    fn read_dir(&self, path: &str) -> io::Result<Vec<DirEntry>> {
        let path = normalize_path(path);

        match self.nodes.get(&path) {
            Some(Node::Directory) => {}
            Some(Node::File(_)) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    "Not a directory",
                ))
            }
            None => return Err(not_found(&path)),
        }

        let prefix_len = if path == "/" { 1 } else { path.len() + 1 };

        // BTreeMap order keeps entries sorted by name
        let entries = self
            .descendants(&path)
            .into_iter()
            .filter_map(|p| {
                let relative = &p[prefix_len..];
                if relative.contains('/') {
                    return None; // Not a direct child
                }
                Some(DirEntry {
                    name: relative.to_string(),
                    is_dir: matches!(self.nodes.get(&p), Some(Node::Directory)),
                })
            })
            .collect();

        Ok(entries)
    }

    fn remove_file(&mut self, path: &str) -> io::Result<()> {
        let path = normalize_path(path);

        match self.nodes.get(&path) {
            Some(Node::File(_)) => {
                self.nodes.remove(&path);
                Ok(())
            }
            Some(Node::Directory) => Err(io::Error::new(
                io::ErrorKind::IsADirectory,
                "Cannot remove directory with remove_file",
            )),
            None => Err(not_found(&path)),
        }
    }

    fn remove_dir(&mut self, path: &str) -> io::Result<()> {
        let path = normalize_path(path);

        if path == "/" {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "Cannot remove root directory",
            ));
        }

        match self.nodes.get(&path) {
            Some(Node::Directory) => {
                if !self.descendants(&path).is_empty() {
                    return Err(io::Error::new(
                        io::ErrorKind::DirectoryNotEmpty,
                        "Directory not empty",
                    ));
                }
                self.nodes.remove(&path);
                Ok(())
            }
            Some(Node::File(_)) => Err(io::Error::new(
                io::ErrorKind::NotADirectory,
                "Not a directory",
            )),
            None => Err(not_found(&path)),
        }
    }

    fn rename(&mut self, from: &str, to: &str) -> io::Result<()> {
        let from = normalize_path(from);
        let to = normalize_path(to);

        if from == to {
            return Ok(());
        }
        if from == "/" || to.starts_with(&format!("{}/", from)) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Cannot move a directory into itself",
            ));
        }
        self.ensure_parent(&to)?;

        match (self.nodes.get(&from), self.nodes.get(&to)) {
            (None, _) => return Err(not_found(&from)),
            (_, Some(Node::Directory)) => {
                return Err(io::Error::new(
                    io::ErrorKind::AlreadyExists,
                    "Destination is a directory",
                ))
            }
            (Some(Node::Directory), Some(Node::File(_))) => {
                return Err(io::Error::new(
                    io::ErrorKind::NotADirectory,
                    "Destination is a file",
                ))
            }
            _ => {}
        }

        let mut moved = vec![from.clone()];
        moved.extend(self.descendants(&from));
        for old in moved {
            if let Some(node) = self.nodes.remove(&old) {
                let new = format!("{}{}", to, &old[from.len()..]);
                self.nodes.insert(new, node);
            }
        }

        // Open handles follow the rename
        for (_, file) in self.handles.iter_mut() {
            if file.path == from || file.path.starts_with(&format!("{}/", from)) {
                file.path = format!("{}{}", to, &file.path[from.len()..]);
            }
        }

        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.nodes.contains_key(&normalize_path(path))
    }
}
