//! Descriptor table
//!
//! Slots 0-2 are the standard streams and are never freed. Preopened
//! directories follow contiguously from 3, which is how the guest's libc
//! discovers them (it calls `fd_prestat_get` upward until `EBADF`). New
//! descriptors always take the lowest free number.

use super::abi::{fd, filetype, Errno, WasiResult};
use crate::vfs::FileHandle;

/// What a guest descriptor refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    Stdin,
    Stdout,
    Stderr,
    /// A directory; `preopen` holds the name the guest was given for it
    Dir {
        path: String,
        preopen: Option<String>,
    },
    /// A file open in the virtual filesystem
    File {
        handle: FileHandle,
        path: String,
        append: bool,
    },
}

impl Descriptor {
    pub fn filetype(&self) -> u8 {
        match self {
            Descriptor::Stdin | Descriptor::Stdout | Descriptor::Stderr => {
                filetype::CHARACTER_DEVICE
            }
            Descriptor::Dir { .. } => filetype::DIRECTORY,
            Descriptor::File { .. } => filetype::REGULAR_FILE,
        }
    }

    pub fn is_stdio(&self) -> bool {
        matches!(
            self,
            Descriptor::Stdin | Descriptor::Stdout | Descriptor::Stderr
        )
    }
}

/// Guest descriptor numbers mapped to their targets
pub struct FdTable {
    /// `None` marks a closed slot
    entries: Vec<Option<Descriptor>>,
}

impl FdTable {
    /// Maximum number of open descriptors
    pub const MAX_FDS: usize = 1024;

    /// Create a new table holding the standard streams
    pub fn new() -> Self {
        let mut entries = Vec::with_capacity(8);
        entries.push(Some(Descriptor::Stdin));
        entries.push(Some(Descriptor::Stdout));
        entries.push(Some(Descriptor::Stderr));
        Self { entries }
    }

    pub fn get(&self, fd: u32) -> WasiResult<&Descriptor> {
        self.entries
            .get(fd as usize)
            .and_then(Option::as_ref)
            .ok_or(Errno::BadF)
    }

    /// Allocate the lowest free descriptor number for `desc`
    pub fn insert(&mut self, desc: Descriptor) -> WasiResult<u32> {
        let first = fd::FIRST_PREOPEN as usize;
        if let Some(i) = self.entries.iter().skip(first).position(Option::is_none) {
            self.entries[first + i] = Some(desc);
            return Ok((first + i) as u32);
        }

        if self.entries.len() >= Self::MAX_FDS {
            return Err(Errno::NoSpc);
        }
        self.entries.push(Some(desc));
        Ok((self.entries.len() - 1) as u32)
    }

    /// Free a descriptor; the standard streams stay put
    pub fn remove(&mut self, fd: u32) -> WasiResult<Option<Descriptor>> {
        if self.get(fd)?.is_stdio() {
            return Ok(None);
        }
        let removed = self.entries[fd as usize].take();
        while matches!(self.entries.last(), Some(None)) {
            self.entries.pop();
        }
        Ok(removed)
    }

    /// Directory path behind `fd`
    pub fn dir_path(&self, fd: u32) -> WasiResult<&str> {
        match self.get(fd)? {
            Descriptor::Dir { path, .. } => Ok(path),
            _ => Err(Errno::NotDir),
        }
    }

    /// Number of open descriptors, standard streams included
    pub fn len(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_streams() {
        let table = FdTable::new();
        assert_eq!(table.get(0), Ok(&Descriptor::Stdin));
        assert_eq!(table.get(1), Ok(&Descriptor::Stdout));
        assert_eq!(table.get(2), Ok(&Descriptor::Stderr));
        assert_eq!(table.get(3), Err(Errno::BadF));
    }

    #[test]
    fn test_stdio_survives_close() {
        let mut table = FdTable::new();
        assert_eq!(table.remove(1), Ok(None));
        assert_eq!(table.get(1), Ok(&Descriptor::Stdout));
        assert_eq!(table.remove(9), Err(Errno::BadF));
    }

    #[test]
    fn test_preopens_are_contiguous() {
        let mut table = FdTable::new();
        let root = table
            .insert(Descriptor::Dir {
                path: "/".to_string(),
                preopen: Some("/".to_string()),
            })
            .unwrap();
        assert_eq!(root, 3);
        assert_eq!(table.dir_path(3), Ok("/"));
        assert_eq!(table.dir_path(1), Err(Errno::NotDir));

        let file = table
            .insert(Descriptor::File {
                handle: 0,
                path: "/f".to_string(),
                append: false,
            })
            .unwrap();
        assert_eq!(file, 4);
        assert!(table.remove(file).unwrap().is_some());
        assert_eq!(table.len(), 4);
    }

    #[test]
    fn test_lowest_free_number_is_reused() {
        let mut table = FdTable::new();
        let dir = |p: &str| Descriptor::Dir {
            path: p.to_string(),
            preopen: None,
        };
        table.insert(dir("/")).unwrap();
        let a = table.insert(dir("/a")).unwrap();
        let b = table.insert(dir("/b")).unwrap();
        let c = table.insert(dir("/c")).unwrap();
        assert_eq!((a, b, c), (4, 5, 6));

        table.remove(a).unwrap();
        table.remove(b).unwrap();
        assert_eq!(table.insert(dir("/x")).unwrap(), a);
        assert_eq!(table.insert(dir("/y")).unwrap(), b);
        assert_eq!(table.get(c), Ok(&dir("/c")));
    }
}
