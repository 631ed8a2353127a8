//! WASI preview 1 ABI types and constants
//!
//! The stable interface between the shim and a `wasm32-wasi` guest: the
//! import namespace, required exports, errno values and the byte layouts
//! of the structs the shim writes into guest memory.

use std::io;

/// Import namespace the guest links its system calls against
pub const IMPORT_MODULE: &str = "wasi_snapshot_preview1";

/// Older toolchains import the same calls under this name
pub const IMPORT_MODULE_LEGACY: &str = "wasi_unstable";

/// Required export names
pub mod exports {
    /// The linear memory export name
    pub const MEMORY: &str = "memory";
    /// The command entry point
    pub const START: &str = "_start";
}

/// Standard file descriptors
pub mod fd {
    pub const STDIN: u32 = 0;
    pub const STDOUT: u32 = 1;
    pub const STDERR: u32 = 2;
    /// First descriptor handed out after the standard streams
    pub const FIRST_PREOPEN: u32 = 3;
}

/// WASI errno values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum Errno {
    Success = 0,
    TooBig = 1,
    Access = 2,
    BadF = 8,
    Exist = 20,
    Fault = 21,
    /// File too large
    FBig = 22,
    Inval = 28,
    Io = 29,
    IsDir = 31,
    NameTooLong = 37,
    NoEnt = 44,
    NoSpc = 51,
    NoSys = 52,
    NotDir = 54,
    NotEmpty = 55,
    NotSup = 58,
    Overflow = 61,
    Perm = 63,
    SPipe = 70,
    NotCapable = 76,
}

impl Errno {
    pub fn code(self) -> u16 {
        self as u16
    }
}

impl From<io::Error> for Errno {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Errno::NoEnt,
            io::ErrorKind::PermissionDenied => Errno::Access,
            io::ErrorKind::AlreadyExists => Errno::Exist,
            io::ErrorKind::InvalidInput => Errno::Inval,
            io::ErrorKind::NotADirectory => Errno::NotDir,
            io::ErrorKind::IsADirectory => Errno::IsDir,
            io::ErrorKind::DirectoryNotEmpty => Errno::NotEmpty,
            io::ErrorKind::FileTooLarge => Errno::FBig,
            io::ErrorKind::Unsupported => Errno::NotSup,
            _ => Errno::Io,
        }
    }
}

/// Result type for shim calls; the error is returned to the guest verbatim
pub type WasiResult<T> = Result<T, Errno>;

/// `filetype` values
pub mod filetype {
    pub const CHARACTER_DEVICE: u8 = 2;
    pub const DIRECTORY: u8 = 3;
    pub const REGULAR_FILE: u8 = 4;
}

/// `oflags` bits for `path_open`
pub mod oflags {
    pub const CREAT: u16 = 1 << 0;
    pub const DIRECTORY: u16 = 1 << 1;
    pub const EXCL: u16 = 1 << 2;
    pub const TRUNC: u16 = 1 << 3;
}

/// `fdflags` bits
pub mod fdflags {
    pub const APPEND: u16 = 1 << 0;
}

/// `rights` bits the shim checks
pub mod rights {
    pub const FD_READ: u64 = 1 << 1;
    pub const FD_WRITE: u64 = 1 << 6;
}

/// `whence` values for `fd_seek`
pub mod whence {
    pub const SET: u8 = 0;
    pub const CUR: u8 = 1;
    pub const END: u8 = 2;
}

/// `clockid` values
pub mod clock {
    pub const REALTIME: u32 = 0;
    pub const MONOTONIC: u32 = 1;
    pub const PROCESS_CPUTIME: u32 = 2;
    pub const THREAD_CPUTIME: u32 = 3;
}

/// Byte sizes of the structs written to guest memory
pub mod layout {
    /// `iovec` / `ciovec`: buf ptr (u32) + len (u32)
    pub const IOVEC: u32 = 8;
    /// `fdstat`: filetype u8, pad, flags u16, pad, rights_base u64, rights_inheriting u64
    pub const FDSTAT: u32 = 24;
    /// `filestat`: dev, ino, filetype(+pad), nlink, size, atim, mtim, ctim
    pub const FILESTAT: u32 = 64;
    /// `prestat`: tag u8 (+pad) then dir name length u32
    pub const PRESTAT: u32 = 8;
    /// `dirent` header: d_next u64, d_ino u64, d_namlen u32, d_type u8 (+pad)
    pub const DIRENT: u32 = 24;
}

/// Every preview 1 call the shim understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    ArgsGet,
    ArgsSizesGet,
    EnvironGet,
    EnvironSizesGet,
    ClockResGet,
    ClockTimeGet,
    FdClose,
    FdDatasync,
    FdFdstatGet,
    FdFdstatSetFlags,
    FdFilestatGet,
    FdFilestatSetSize,
    FdPrestatGet,
    FdPrestatDirName,
    FdRead,
    FdReaddir,
    FdSeek,
    FdSync,
    FdTell,
    FdWrite,
    PathCreateDirectory,
    PathFilestatGet,
    PathOpen,
    PathRemoveDirectory,
    PathRename,
    PathUnlinkFile,
    ProcExit,
    RandomGet,
    SchedYield,
}

impl Syscall {
    pub const ALL: &'static [Syscall] = &[
        Syscall::ArgsGet,
        Syscall::ArgsSizesGet,
        Syscall::EnvironGet,
        Syscall::EnvironSizesGet,
        Syscall::ClockResGet,
        Syscall::ClockTimeGet,
        Syscall::FdClose,
        Syscall::FdDatasync,
        Syscall::FdFdstatGet,
        Syscall::FdFdstatSetFlags,
        Syscall::FdFilestatGet,
        Syscall::FdFilestatSetSize,
        Syscall::FdPrestatGet,
        Syscall::FdPrestatDirName,
        Syscall::FdRead,
        Syscall::FdReaddir,
        Syscall::FdSeek,
        Syscall::FdSync,
        Syscall::FdTell,
        Syscall::FdWrite,
        Syscall::PathCreateDirectory,
        Syscall::PathFilestatGet,
        Syscall::PathOpen,
        Syscall::PathRemoveDirectory,
        Syscall::PathRename,
        Syscall::PathUnlinkFile,
        Syscall::ProcExit,
        Syscall::RandomGet,
        Syscall::SchedYield,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Syscall::ArgsGet => "args_get",
            Syscall::ArgsSizesGet => "args_sizes_get",
            Syscall::EnvironGet => "environ_get",
            Syscall::EnvironSizesGet => "environ_sizes_get",
            Syscall::ClockResGet => "clock_res_get",
            Syscall::ClockTimeGet => "clock_time_get",
            Syscall::FdClose => "fd_close",
            Syscall::FdDatasync => "fd_datasync",
            Syscall::FdFdstatGet => "fd_fdstat_get",
            Syscall::FdFdstatSetFlags => "fd_fdstat_set_flags",
            Syscall::FdFilestatGet => "fd_filestat_get",
            Syscall::FdFilestatSetSize => "fd_filestat_set_size",
            Syscall::FdPrestatGet => "fd_prestat_get",
            Syscall::FdPrestatDirName => "fd_prestat_dir_name",
            Syscall::FdRead => "fd_read",
            Syscall::FdReaddir => "fd_readdir",
            Syscall::FdSeek => "fd_seek",
            Syscall::FdSync => "fd_sync",
            Syscall::FdTell => "fd_tell",
            Syscall::FdWrite => "fd_write",
            Syscall::PathCreateDirectory => "path_create_directory",
            Syscall::PathFilestatGet => "path_filestat_get",
            Syscall::PathOpen => "path_open",
            Syscall::PathRemoveDirectory => "path_remove_directory",
            Syscall::PathRename => "path_rename",
            Syscall::PathUnlinkFile => "path_unlink_file",
            Syscall::ProcExit => "proc_exit",
            Syscall::RandomGet => "random_get",
            Syscall::SchedYield => "sched_yield",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|s| s.name() == name)
    }

    /// Number of parameters in the import's signature
    pub fn arity(self) -> usize {
        match self {
            Syscall::SchedYield => 0,
            Syscall::FdClose
            | Syscall::FdDatasync
            | Syscall::FdSync
            | Syscall::ProcExit => 1,
            Syscall::ArgsGet
            | Syscall::ArgsSizesGet
            | Syscall::EnvironGet
            | Syscall::EnvironSizesGet
            | Syscall::ClockResGet
            | Syscall::FdFdstatGet
            | Syscall::FdFdstatSetFlags
            | Syscall::FdFilestatGet
            | Syscall::FdFilestatSetSize
            | Syscall::FdPrestatGet
            | Syscall::FdTell
            | Syscall::RandomGet => 2,
            Syscall::ClockTimeGet
            | Syscall::FdPrestatDirName
            | Syscall::PathCreateDirectory
            | Syscall::PathRemoveDirectory
            | Syscall::PathUnlinkFile => 3,
            Syscall::FdRead | Syscall::FdSeek | Syscall::FdWrite => 4,
            Syscall::FdReaddir | Syscall::PathFilestatGet => 5,
            Syscall::PathRename => 6,
            Syscall::PathOpen => 9,
        }
    }
}
