//! WASI preview 1 system-interface shim
//!
//! Owns everything the guest can observe: its descriptors, the virtual
//! filesystem, arguments, environment, stdin, clocks and the output sink the
//! standard streams are written through. Calls arrive by [`Syscall`] with raw
//! integer arguments, so the JS glue stays a thin adapter and the whole
//! surface runs natively under test.

use super::abi::{
    clock, fdflags, filetype, layout, oflags, rights, whence, Errno, Syscall, WasiResult,
};
use super::fd::{Descriptor, FdTable};
use super::memory::GuestMemory;
use crate::console_log;
use crate::config::BootConfig;
use crate::error::{BootError, BootResult};
use crate::sink::OutputSink;
use crate::vfs::{self, FileSystem, MemoryFs, Metadata, OpenOptions};
use std::collections::BTreeMap;
use std::io::SeekFrom;

/// Rights reported for every descriptor (all 29 preview 1 rights)
const ALL_RIGHTS: u64 = (1 << 29) - 1;

/// Largest host-side buffer a single iovec is read into
const READ_CHUNK: u32 = 64 * 1024;

/// Result of a single call, as seen by the host glue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    /// Return this errno to the guest
    Return(Errno),
    /// The guest called `proc_exit`; unwind it
    Exit(u32),
}

/// Wall and monotonic time source
struct Clock {
    origin_ms: f64,
    last_monotonic_ns: u64,
}

impl Clock {
    fn new() -> Self {
        Self {
            origin_ms: monotonic_ms(),
            last_monotonic_ns: 0,
        }
    }

    fn realtime_ns(&self) -> u64 {
        (realtime_ms() * 1_000_000.0) as u64
    }

    fn monotonic_ns(&mut self) -> u64 {
        let elapsed = ((monotonic_ms() - self.origin_ms).max(0.0) * 1_000_000.0) as u64;
        self.last_monotonic_ns = self.last_monotonic_ns.max(elapsed);
        self.last_monotonic_ns
    }
}

#[cfg(target_arch = "wasm32")]
fn realtime_ms() -> f64 {
    js_sys::Date::now()
}

#[cfg(target_arch = "wasm32")]
fn monotonic_ms() -> f64 {
    web_sys::window()
        .and_then(|w| w.performance())
        .map(|p| p.now())
        .unwrap_or_else(js_sys::Date::now)
}

#[cfg(not(target_arch = "wasm32"))]
fn realtime_ms() -> f64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

#[cfg(not(target_arch = "wasm32"))]
fn monotonic_ms() -> f64 {
    use std::sync::OnceLock;
    use std::time::Instant;
    static ORIGIN: OnceLock<Instant> = OnceLock::new();
    ORIGIN.get_or_init(Instant::now).elapsed().as_secs_f64() * 1000.0
}

/// Stable, non-zero inode number for a path (FNV-1a)
fn inode(path: &str) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in path.bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash | 1
}

/// The system-interface shim one guest instance runs against
pub struct WasiShim {
    output: Box<dyn OutputSink>,
    fs: Box<dyn FileSystem>,
    fds: FdTable,
    args: Vec<String>,
    env: BTreeMap<String, String>,
    stdin: Vec<u8>,
    stdin_pos: usize,
    clock: Clock,
    rng_state: u64,
    exit_code: Option<u32>,
}

impl WasiShim {
    /// Create a shim writing through `output`, with an empty in-memory filesystem
    /// and no preopened directories
    pub fn new(output: impl OutputSink + 'static) -> Self {
        let clock = Clock::new();
        let seed = clock.realtime_ns() | 1;
        Self {
            output: Box::new(output),
            fs: Box::new(MemoryFs::new()),
            fds: FdTable::new(),
            args: Vec::new(),
            env: BTreeMap::new(),
            stdin: Vec::new(),
            stdin_pos: 0,
            clock,
            rng_state: seed,
            exit_code: None,
        }
    }

    /// Build a shim from boot configuration
    pub fn from_config(config: &BootConfig, output: impl OutputSink + 'static) -> BootResult<Self> {
        let mut shim = Self::new(output);

        let mut args = vec![config.program_name.clone()];
        args.extend(config.args.iter().cloned());
        shim.set_args(args);
        for (key, value) in &config.env {
            shim.set_env(key, value);
        }
        shim.set_stdin(config.stdin.as_bytes().to_vec());

        for dir in &config.preopens {
            shim.preopen(dir).map_err(|e| BootError::Config {
                reason: format!("cannot preopen '{}': errno {}", dir, e.code()),
            })?;
        }
        Ok(shim)
    }

    /// Replace the filesystem (only before any preopen)
    pub fn with_fs(mut self, fs: impl FileSystem + 'static) -> Self {
        self.fs = Box::new(fs);
        self
    }

    /// Set argv, program name first
    pub fn set_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    pub fn set_env(&mut self, key: &str, value: &str) {
        self.env.insert(key.to_string(), value.to_string());
    }

    pub fn set_stdin(&mut self, data: Vec<u8>) {
        self.stdin = data;
        self.stdin_pos = 0;
    }

    /// Expose a directory to the guest, creating it if needed
    pub fn preopen(&mut self, guest_path: &str) -> WasiResult<u32> {
        let path = vfs::normalize_path(guest_path);

        let mut current = String::new();
        for part in path.split('/').filter(|p| !p.is_empty()) {
            current.push('/');
            current.push_str(part);
            if !self.fs.exists(&current) {
                self.fs.create_dir(&current)?;
            }
        }
        if !self.fs.metadata(&path)?.is_dir {
            return Err(Errno::NotDir);
        }

        self.fds.insert(Descriptor::Dir {
            path,
            preopen: Some(guest_path.to_string()),
        })
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn fds(&self) -> &FdTable {
        &self.fds
    }

    /// Exit code passed to `proc_exit`, if the guest called it
    pub fn exit_code(&self) -> Option<u32> {
        self.exit_code
    }

    /// Dispatch one call with the guest's raw arguments
    ///
    /// Integer parameters arrive zero-extended to `u64`; 32-bit ones are
    /// truncated back, signed 64-bit ones reinterpreted.
    pub fn call(&mut self, mem: &mut dyn GuestMemory, call: Syscall, args: &[u64]) -> CallOutcome {
        if args.len() < call.arity() {
            return CallOutcome::Return(Errno::Inval);
        }
        let a = |i: usize| args[i] as u32;

        let result = match call {
            Syscall::ProcExit => {
                let code = a(0);
                self.exit_code = Some(code);
                console_log!("[wasi] proc_exit({})", code);
                return CallOutcome::Exit(code);
            }
            Syscall::ArgsSizesGet => self.args_sizes_get(mem, a(0), a(1)),
            Syscall::ArgsGet => self.args_get(mem, a(0), a(1)),
            Syscall::EnvironSizesGet => self.environ_sizes_get(mem, a(0), a(1)),
            Syscall::EnvironGet => self.environ_get(mem, a(0), a(1)),
            Syscall::ClockResGet => self.clock_res_get(mem, a(0), a(1)),
            Syscall::ClockTimeGet => self.clock_time_get(mem, a(0), args[1], a(2)),
            Syscall::FdWrite => self.fd_write(mem, a(0), a(1), a(2), a(3)),
            Syscall::FdRead => self.fd_read(mem, a(0), a(1), a(2), a(3)),
            Syscall::FdSeek => self.fd_seek(mem, a(0), args[1] as i64, args[2] as u8, a(3)),
            Syscall::FdTell => self.fd_seek(mem, a(0), 0, whence::CUR, a(1)),
            Syscall::FdClose => self.fd_close(a(0)),
            Syscall::FdSync | Syscall::FdDatasync => self.fds.get(a(0)).map(|_| ()),
            Syscall::FdFdstatGet => self.fd_fdstat_get(mem, a(0), a(1)),
            Syscall::FdFdstatSetFlags => self.fds.get(a(0)).map(|_| ()),
            Syscall::FdFilestatGet => self.fd_filestat_get(mem, a(0), a(1)),
            Syscall::FdFilestatSetSize => self.fd_filestat_set_size(a(0), args[1]),
            Syscall::FdPrestatGet => self.fd_prestat_get(mem, a(0), a(1)),
            Syscall::FdPrestatDirName => self.fd_prestat_dir_name(mem, a(0), a(1), a(2)),
            Syscall::FdReaddir => self.fd_readdir(mem, a(0), a(1), a(2), args[3], a(4)),
            Syscall::PathOpen => self.path_open(
                mem,
                a(0),
                a(2),
                a(3),
                args[4] as u16,
                args[5],
                args[7] as u16,
                a(8),
            ),
            Syscall::PathCreateDirectory => self
                .resolve(mem, a(0), a(1), a(2))
                .and_then(|path| Ok(self.fs.create_dir(&path)?)),
            Syscall::PathRemoveDirectory => self
                .resolve(mem, a(0), a(1), a(2))
                .and_then(|path| Ok(self.fs.remove_dir(&path)?)),
            Syscall::PathUnlinkFile => self.path_unlink_file(mem, a(0), a(1), a(2)),
            Syscall::PathRename => self.path_rename(mem, a(0), a(1), a(2), a(3), a(4), a(5)),
            Syscall::PathFilestatGet => self
                .resolve(mem, a(0), a(2), a(3))
                .and_then(|path| {
                    let meta = self.fs.metadata(&path)?;
                    write_filestat(mem, a(4), &meta, inode(&path))
                }),
            Syscall::RandomGet => self.random_get(mem, a(0), a(1)),
            Syscall::SchedYield => Ok(()),
        };

        CallOutcome::Return(result.err().unwrap_or(Errno::Success))
    }

    // ===== Arguments & environment =====

    fn environ_strings(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    fn args_sizes_get(&self, mem: &mut dyn GuestMemory, count_ptr: u32, size_ptr: u32) -> WasiResult<()> {
        write_sizes(mem, &self.args, count_ptr, size_ptr)
    }

    fn args_get(&self, mem: &mut dyn GuestMemory, argv: u32, buf: u32) -> WasiResult<()> {
        write_string_vec(mem, &self.args, argv, buf)
    }

    fn environ_sizes_get(&self, mem: &mut dyn GuestMemory, count_ptr: u32, size_ptr: u32) -> WasiResult<()> {
        write_sizes(mem, &self.environ_strings(), count_ptr, size_ptr)
    }

    fn environ_get(&self, mem: &mut dyn GuestMemory, environ: u32, buf: u32) -> WasiResult<()> {
        write_string_vec(mem, &self.environ_strings(), environ, buf)
    }

    // ===== Clocks & randomness =====

    fn clock_res_get(&self, mem: &mut dyn GuestMemory, id: u32, out: u32) -> WasiResult<()> {
        match id {
            clock::REALTIME | clock::MONOTONIC | clock::PROCESS_CPUTIME | clock::THREAD_CPUTIME => {
                mem.write_u64(out, 1_000)
            }
            _ => Err(Errno::Inval),
        }
    }

    fn clock_time_get(&mut self, mem: &mut dyn GuestMemory, id: u32, _precision: u64, out: u32) -> WasiResult<()> {
        let now = match id {
            clock::REALTIME => self.clock.realtime_ns(),
            clock::MONOTONIC | clock::PROCESS_CPUTIME | clock::THREAD_CPUTIME => {
                self.clock.monotonic_ns()
            }
            _ => return Err(Errno::Inval),
        };
        mem.write_u64(out, now)
    }

    fn random_get(&mut self, mem: &mut dyn GuestMemory, buf: u32, len: u32) -> WasiResult<()> {
        mem.check_bounds(buf, len)?;
        let mut bytes = vec![0u8; len as usize];
        for chunk in bytes.chunks_mut(8) {
            // xorshift64*
            self.rng_state ^= self.rng_state >> 12;
            self.rng_state ^= self.rng_state << 25;
            self.rng_state ^= self.rng_state >> 27;
            let value = self.rng_state.wrapping_mul(0x2545_F491_4F6C_DD1D);
            chunk.copy_from_slice(&value.to_le_bytes()[..chunk.len()]);
        }
        mem.write(buf, &bytes)
    }

    // ===== Descriptors =====

    fn fd_write(&mut self, mem: &mut dyn GuestMemory, fd: u32, iovs: u32, iovs_len: u32, nwritten: u32) -> WasiResult<()> {
        let iovecs = checked_iovecs(mem, iovs, iovs_len)?;
        let file = match self.fds.get(fd) {
            Ok(Descriptor::File { handle, .. }) => Some(*handle),
            _ => None,
        };

        // Each non-empty iovec is one write: one line on the page for stdout.
        // Standard streams, directories and unknown descriptors all go
        // through the write hook.
        let mut written = 0usize;
        for (ptr, len) in iovecs.into_iter().filter(|&(_, len)| len > 0) {
            let chunk = mem.read(ptr, len)?;
            written += match file {
                Some(handle) => self.fs.write(handle, &chunk)?,
                None => self.output.emit(fd, &chunk),
            };
        }

        mem.write_u32(nwritten, written as u32)
    }

    fn fd_read(&mut self, mem: &mut dyn GuestMemory, fd: u32, iovs: u32, iovs_len: u32, nread: u32) -> WasiResult<()> {
        let iovecs = checked_iovecs(mem, iovs, iovs_len)?;
        let desc = self.fds.get(fd)?.clone();

        let mut total = 0u32;
        for (ptr, len) in iovecs {
            let mut buf = vec![0u8; len.min(READ_CHUNK) as usize];
            let n = match &desc {
                Descriptor::Stdin => {
                    let remaining = &self.stdin[self.stdin_pos..];
                    let n = remaining.len().min(buf.len());
                    buf[..n].copy_from_slice(&remaining[..n]);
                    self.stdin_pos += n;
                    n
                }
                Descriptor::File { handle, .. } => self.fs.read(*handle, &mut buf)?,
                Descriptor::Dir { .. } => return Err(Errno::IsDir),
                Descriptor::Stdout | Descriptor::Stderr => return Err(Errno::BadF),
            };
            mem.write(ptr, &buf[..n])?;
            total += n as u32;
            if n < len as usize {
                break;
            }
        }

        mem.write_u32(nread, total)
    }

    fn fd_seek(&mut self, mem: &mut dyn GuestMemory, fd: u32, offset: i64, from: u8, out: u32) -> WasiResult<()> {
        let handle = match self.fds.get(fd)? {
            Descriptor::File { handle, .. } => *handle,
            Descriptor::Dir { .. } => return Err(Errno::BadF),
            _ => return Err(Errno::SPipe),
        };
        let pos = match from {
            whence::SET if offset >= 0 => SeekFrom::Start(offset as u64),
            whence::SET => return Err(Errno::Inval),
            whence::CUR => SeekFrom::Current(offset),
            whence::END => SeekFrom::End(offset),
            _ => return Err(Errno::Inval),
        };
        mem.check_bounds(out, 8)?;
        let new_pos = self.fs.seek(handle, pos)?;
        mem.write_u64(out, new_pos)
    }

    fn fd_close(&mut self, fd: u32) -> WasiResult<()> {
        if let Some(Descriptor::File { handle, .. }) = self.fds.remove(fd)? {
            self.fs.close(handle)?;
        }
        Ok(())
    }

    fn fd_fdstat_get(&self, mem: &mut dyn GuestMemory, fd: u32, out: u32) -> WasiResult<()> {
        let desc = self.fds.get(fd)?;
        let flags = match desc {
            Descriptor::File { append: true, .. } => fdflags::APPEND,
            _ => 0,
        };

        let mut buf = [0u8; layout::FDSTAT as usize];
        buf[0] = desc.filetype();
        buf[2..4].copy_from_slice(&flags.to_le_bytes());
        buf[8..16].copy_from_slice(&ALL_RIGHTS.to_le_bytes());
        buf[16..24].copy_from_slice(&ALL_RIGHTS.to_le_bytes());
        mem.write(out, &buf)
    }

    fn fd_filestat_get(&self, mem: &mut dyn GuestMemory, fd: u32, out: u32) -> WasiResult<()> {
        match self.fds.get(fd)? {
            Descriptor::File { handle, path, .. } => {
                let meta = self.fs.fstat(*handle)?;
                write_filestat(mem, out, &meta, inode(path))
            }
            Descriptor::Dir { path, .. } => {
                let meta = self.fs.metadata(path)?;
                write_filestat(mem, out, &meta, inode(path))
            }
            _ => write_filestat(mem, out, &Metadata::default(), fd as u64 + 1),
        }
    }

    fn fd_filestat_set_size(&mut self, fd: u32, size: u64) -> WasiResult<()> {
        match self.fds.get(fd)? {
            Descriptor::File { handle, .. } => Ok(self.fs.set_len(*handle, size)?),
            Descriptor::Dir { .. } => Err(Errno::IsDir),
            _ => Err(Errno::Inval),
        }
    }

    fn fd_prestat_get(&self, mem: &mut dyn GuestMemory, fd: u32, out: u32) -> WasiResult<()> {
        match self.fds.get(fd)? {
            Descriptor::Dir {
                preopen: Some(name),
                ..
            } => {
                // tag 0 = directory
                let mut buf = [0u8; layout::PRESTAT as usize];
                buf[4..8].copy_from_slice(&(name.len() as u32).to_le_bytes());
                mem.write(out, &buf)
            }
            _ => Err(Errno::BadF),
        }
    }

    fn fd_prestat_dir_name(&self, mem: &mut dyn GuestMemory, fd: u32, out: u32, len: u32) -> WasiResult<()> {
        match self.fds.get(fd)? {
            Descriptor::Dir {
                preopen: Some(name),
                ..
            } => {
                if (len as usize) < name.len() {
                    return Err(Errno::NameTooLong);
                }
                mem.write(out, name.as_bytes())
            }
            _ => Err(Errno::BadF),
        }
    }

    fn fd_readdir(&self, mem: &mut dyn GuestMemory, fd: u32, buf: u32, buf_len: u32, cookie: u64, used: u32) -> WasiResult<()> {
        let path = match self.fds.get(fd)? {
            Descriptor::Dir { path, .. } => path,
            _ => return Err(Errno::NotDir),
        };

        let mut stream = Vec::new();
        let entries = self.fs.read_dir(path)?;
        for (index, entry) in entries.iter().enumerate().skip(cookie as usize) {
            let child = vfs::join_path(path, &entry.name);
            let kind = if entry.is_dir {
                filetype::DIRECTORY
            } else {
                filetype::REGULAR_FILE
            };
            stream.extend_from_slice(&(index as u64 + 1).to_le_bytes());
            stream.extend_from_slice(&inode(&child).to_le_bytes());
            stream.extend_from_slice(&(entry.name.len() as u32).to_le_bytes());
            stream.extend_from_slice(&[kind, 0, 0, 0]);
            stream.extend_from_slice(entry.name.as_bytes());
            if stream.len() >= buf_len as usize {
                break;
            }
        }

        // A full buffer tells the guest to call again from its last cookie
        let n = stream.len().min(buf_len as usize);
        mem.check_bounds(used, 4)?;
        mem.write(buf, &stream[..n])?;
        mem.write_u32(used, n as u32)
    }

    // ===== Paths =====

    /// Resolve a guest path against a directory descriptor, inside its sandbox
    fn resolve(&self, mem: &dyn GuestMemory, dir_fd: u32, ptr: u32, len: u32) -> WasiResult<String> {
        let dir = self.fds.dir_path(dir_fd)?;
        let relative = mem.read_string(ptr, len)?;
        let full = vfs::join_path(dir, &relative);
        if !vfs::is_within(&full, dir) {
            return Err(Errno::NotCapable);
        }
        Ok(full)
    }

    #[allow(clippy::too_many_arguments)]
    fn path_open(
        &mut self,
        mem: &mut dyn GuestMemory,
        dir_fd: u32,
        path_ptr: u32,
        path_len: u32,
        open_flags: u16,
        rights_base: u64,
        fd_flags: u16,
        out: u32,
    ) -> WasiResult<()> {
        let path = self.resolve(mem, dir_fd, path_ptr, path_len)?;
        mem.check_bounds(out, 4)?;

        let existing = self.fs.metadata(&path).ok();
        let wants_dir = open_flags & oflags::DIRECTORY != 0;

        let desc = match existing {
            Some(meta) if meta.is_dir => {
                if open_flags & (oflags::CREAT | oflags::EXCL) == oflags::CREAT | oflags::EXCL {
                    return Err(Errno::Exist);
                }
                if open_flags & oflags::TRUNC != 0 {
                    return Err(Errno::IsDir);
                }
                Descriptor::Dir {
                    path,
                    preopen: None,
                }
            }
            _ if wants_dir => {
                return Err(if existing.is_some() {
                    Errno::NotDir
                } else {
                    Errno::NoEnt
                })
            }
            _ => {
                let append = fd_flags & fdflags::APPEND != 0;
                let options = OpenOptions::new()
                    .read(rights_base & rights::FD_READ != 0)
                    .write(rights_base & rights::FD_WRITE != 0)
                    .append(append)
                    .create(open_flags & oflags::CREAT != 0)
                    .exclusive(open_flags & oflags::EXCL != 0)
                    .truncate(open_flags & oflags::TRUNC != 0);
                let handle = self.fs.open(&path, options)?;
                Descriptor::File {
                    handle,
                    path,
                    append,
                }
            }
        };

        let file_handle = match &desc {
            Descriptor::File { handle, .. } => Some(*handle),
            _ => None,
        };
        let fd = match self.fds.insert(desc) {
            Ok(fd) => fd,
            Err(e) => {
                if let Some(handle) = file_handle {
                    let _ = self.fs.close(handle);
                }
                return Err(e);
            }
        };
        mem.write_u32(out, fd)
    }

    fn path_unlink_file(&mut self, mem: &mut dyn GuestMemory, dir_fd: u32, ptr: u32, len: u32) -> WasiResult<()> {
        let path = self.resolve(mem, dir_fd, ptr, len)?;
        if self.fs.metadata(&path)?.is_dir {
            return Err(Errno::IsDir);
        }
        Ok(self.fs.remove_file(&path)?)
    }

    #[allow(clippy::too_many_arguments)]
    fn path_rename(
        &mut self,
        mem: &mut dyn GuestMemory,
        old_fd: u32,
        old_ptr: u32,
        old_len: u32,
        new_fd: u32,
        new_ptr: u32,
        new_len: u32,
    ) -> WasiResult<()> {
        let from = self.resolve(mem, old_fd, old_ptr, old_len)?;
        let to = self.resolve(mem, new_fd, new_ptr, new_len)?;
        Ok(self.fs.rename(&from, &to)?)
    }
}

/// Read an iovec array, failing with `EFAULT` unless every buffer lies in memory
fn checked_iovecs(mem: &dyn GuestMemory, iovs: u32, count: u32) -> WasiResult<Vec<(u32, u32)>> {
    let iovecs = mem.read_iovecs(iovs, count)?;
    for &(ptr, len) in &iovecs {
        mem.check_bounds(ptr, len)?;
    }
    Ok(iovecs)
}

/// Write `count` and total NUL-terminated byte size of `strings`
fn write_sizes(mem: &mut dyn GuestMemory, strings: &[String], count_ptr: u32, size_ptr: u32) -> WasiResult<()> {
    let size: usize = strings.iter().map(|s| s.len() + 1).sum();
    mem.write_u32(count_ptr, strings.len() as u32)?;
    mem.write_u32(size_ptr, size as u32)
}

/// Lay out `strings` NUL-terminated at `buf`, pointers at `ptrs`
fn write_string_vec(mem: &mut dyn GuestMemory, strings: &[String], ptrs: u32, buf: u32) -> WasiResult<()> {
    let mut cursor = buf;
    for (i, s) in strings.iter().enumerate() {
        mem.write_u32(ptrs + 4 * i as u32, cursor)?;
        mem.write(cursor, s.as_bytes())?;
        mem.write(cursor + s.len() as u32, &[0])?;
        cursor += s.len() as u32 + 1;
    }
    Ok(())
}

fn write_filestat(mem: &mut dyn GuestMemory, out: u32, meta: &Metadata, ino: u64) -> WasiResult<()> {
    let kind = if meta.is_dir {
        filetype::DIRECTORY
    } else if meta.is_file {
        filetype::REGULAR_FILE
    } else {
        filetype::CHARACTER_DEVICE
    };

    let mut buf = [0u8; layout::FILESTAT as usize];
    buf[8..16].copy_from_slice(&ino.to_le_bytes());
    buf[16] = kind;
    buf[24..32].copy_from_slice(&1u64.to_le_bytes());
    buf[32..40].copy_from_slice(&meta.size.to_le_bytes());
    mem.write(out, &buf)
}

impl std::fmt::Debug for WasiShim {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WasiShim")
            .field("args", &self.args)
            .field("env", &self.env)
            .field("open_fds", &self.fds.len())
            .field("exit_code", &self.exit_code)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::StdoutRedirector;
    use crate::wasi::memory::VecMemory;
    use std::cell::RefCell;
    use std::rc::Rc;

    const IOV: u32 = 0x100;
    const OUT: u32 = 0x200;
    const DATA: u32 = 0x400;

    fn shim() -> (WasiShim, Rc<RefCell<String>>) {
        let text = Rc::new(RefCell::new(String::new()));
        let mut shim = WasiShim::new(StdoutRedirector::new(Rc::clone(&text)));
        shim.preopen("/").unwrap();
        (shim, text)
    }

    fn ok(outcome: CallOutcome) {
        assert_eq!(outcome, CallOutcome::Return(Errno::Success));
    }

    fn write_fd(shim: &mut WasiShim, mem: &mut VecMemory, fd: u32, data: &[u8]) -> CallOutcome {
        mem.write(DATA, data).unwrap();
        mem.write_u32(IOV, DATA).unwrap();
        mem.write_u32(IOV + 4, data.len() as u32).unwrap();
        shim.call(mem, Syscall::FdWrite, &[fd as u64, IOV as u64, 1, OUT as u64])
    }

    fn open(shim: &mut WasiShim, mem: &mut VecMemory, path: &str, oflags: u16, rights: u64) -> u32 {
        mem.write(DATA, path.as_bytes()).unwrap();
        ok(shim.call(
            mem,
            Syscall::PathOpen,
            &[3, 0, DATA as u64, path.len() as u64, oflags as u64, rights, rights, 0, OUT as u64],
        ));
        mem.read_u32(OUT).unwrap()
    }

    #[test]
    fn test_stdout_write_reaches_sink() {
        let (mut shim, text) = shim();
        let mut mem = VecMemory::new(1);
        ok(write_fd(&mut shim, &mut mem, 1, b"hello"));
        assert_eq!(mem.read_u32(OUT).unwrap(), 5);
        assert_eq!(*text.borrow(), "hello\n");
    }

    #[test]
    fn test_each_iovec_is_one_line() {
        let (mut shim, text) = shim();
        let mut mem = VecMemory::new(1);
        mem.write(DATA, b"abc").unwrap();
        mem.write(DATA + 16, b"def").unwrap();
        let iovecs = [(DATA, 3u32), (DATA + 8, 0), (DATA + 16, 3)];
        for (i, (ptr, len)) in iovecs.iter().enumerate() {
            mem.write_u32(IOV + 8 * i as u32, *ptr).unwrap();
            mem.write_u32(IOV + 8 * i as u32 + 4, *len).unwrap();
        }
        ok(shim.call(&mut mem, Syscall::FdWrite, &[1, IOV as u64, 3, OUT as u64]));
        assert_eq!(mem.read_u32(OUT).unwrap(), 6);
        assert_eq!(*text.borrow(), "abc\ndef\n");
    }

    #[test]
    fn test_write_with_out_of_range_iovec_writes_nothing() {
        let (mut shim, text) = shim();
        let mut mem = VecMemory::new(1);
        mem.write(DATA, b"abc").unwrap();
        mem.write_u32(IOV, DATA).unwrap();
        mem.write_u32(IOV + 4, 3).unwrap();
        mem.write_u32(IOV + 8, DATA).unwrap();
        mem.write_u32(IOV + 12, 0x1000_0000).unwrap();
        let outcome = shim.call(&mut mem, Syscall::FdWrite, &[1, IOV as u64, 2, OUT as u64]);
        assert_eq!(outcome, CallOutcome::Return(Errno::Fault));
        assert!(text.borrow().is_empty());
    }

    #[test]
    fn test_unknown_fd_is_accepted() {
        let (mut shim, text) = shim();
        let mut mem = VecMemory::new(1);
        ok(write_fd(&mut shim, &mut mem, 42, b"lost"));
        assert_eq!(mem.read_u32(OUT).unwrap(), 4);
        assert!(text.borrow().is_empty());
    }

    #[test]
    fn test_bad_iovec_pointer_faults() {
        let (mut shim, text) = shim();
        let mut mem = VecMemory::with_size(64);
        let outcome = shim.call(&mut mem, Syscall::FdWrite, &[1, 60, 1, 0]);
        assert_eq!(outcome, CallOutcome::Return(Errno::Fault));
        assert!(text.borrow().is_empty());
    }

    #[test]
    fn test_file_roundtrip_stays_off_sink() {
        let (mut shim, text) = shim();
        let mut mem = VecMemory::new(1);
        let rw = rights::FD_READ | rights::FD_WRITE;

        let fd = open(&mut shim, &mut mem, "diskfile.bin", oflags::CREAT, rw);
        assert_eq!(fd, 4);
        ok(write_fd(&mut shim, &mut mem, fd, b"block"));

        ok(shim.call(&mut mem, Syscall::FdSeek, &[fd as u64, 0, whence::SET as u64, OUT as u64]));
        mem.write_u32(IOV, DATA + 64).unwrap();
        mem.write_u32(IOV + 4, 16).unwrap();
        ok(shim.call(&mut mem, Syscall::FdRead, &[fd as u64, IOV as u64, 1, OUT as u64]));
        assert_eq!(mem.read_u32(OUT).unwrap(), 5);
        assert_eq!(mem.read(DATA + 64, 5).unwrap(), b"block");

        ok(shim.call(&mut mem, Syscall::FdClose, &[fd as u64]));
        assert!(shim.fs().exists("/diskfile.bin"));
        assert!(text.borrow().is_empty());
    }

    #[test]
    fn test_set_size_and_filestat() {
        let (mut shim, _) = shim();
        let mut mem = VecMemory::new(1);
        let fd = open(&mut shim, &mut mem, "disk", oflags::CREAT, rights::FD_WRITE);
        ok(shim.call(&mut mem, Syscall::FdFilestatSetSize, &[fd as u64, 8 * 1024 * 1024]));
        ok(shim.call(&mut mem, Syscall::FdFilestatGet, &[fd as u64, OUT as u64]));
        let stat = mem.read(OUT, layout::FILESTAT).unwrap();
        assert_eq!(stat[16], filetype::REGULAR_FILE);
        let size = u64::from_le_bytes(stat[32..40].try_into().unwrap());
        assert_eq!(size, 8 * 1024 * 1024);
    }

    #[test]
    fn test_stdin_reads_then_eof() {
        let (mut shim, _) = shim();
        shim.set_stdin(b"ls\n".to_vec());
        let mut mem = VecMemory::new(1);
        mem.write_u32(IOV, DATA).unwrap();
        mem.write_u32(IOV + 4, 64).unwrap();

        ok(shim.call(&mut mem, Syscall::FdRead, &[0, IOV as u64, 1, OUT as u64]));
        assert_eq!(mem.read_u32(OUT).unwrap(), 3);
        assert_eq!(mem.read(DATA, 3).unwrap(), b"ls\n");

        ok(shim.call(&mut mem, Syscall::FdRead, &[0, IOV as u64, 1, OUT as u64]));
        assert_eq!(mem.read_u32(OUT).unwrap(), 0);
    }

    #[test]
    fn test_read_into_out_of_range_iovec_faults() {
        let (mut shim, _) = shim();
        shim.set_stdin(b"hi".to_vec());
        let mut mem = VecMemory::new(1);
        mem.write_u32(IOV, DATA).unwrap();
        mem.write_u32(IOV + 4, 0x1000_0000).unwrap();

        let outcome = shim.call(&mut mem, Syscall::FdRead, &[0, IOV as u64, 1, OUT as u64]);
        assert_eq!(outcome, CallOutcome::Return(Errno::Fault));

        // Nothing was consumed
        mem.write_u32(IOV + 4, 16).unwrap();
        ok(shim.call(&mut mem, Syscall::FdRead, &[0, IOV as u64, 1, OUT as u64]));
        assert_eq!(mem.read(DATA, 2).unwrap(), b"hi");
    }

    #[test]
    fn test_huge_offsets_are_file_too_large() {
        let (mut shim, text) = shim();
        let mut mem = VecMemory::new(1);
        let rw = rights::FD_READ | rights::FD_WRITE;
        let fd = open(&mut shim, &mut mem, "diskfile.bin", oflags::CREAT, rw);

        let offset = 0x7FFF_FFFF_FFFF_FFFEu64;
        ok(shim.call(&mut mem, Syscall::FdSeek, &[fd as u64, offset, whence::SET as u64, OUT as u64]));
        let outcome = write_fd(&mut shim, &mut mem, fd, b"data");
        assert_eq!(outcome, CallOutcome::Return(Errno::FBig));

        let outcome = shim.call(&mut mem, Syscall::FdFilestatSetSize, &[fd as u64, u64::MAX]);
        assert_eq!(outcome, CallOutcome::Return(Errno::FBig));

        // The file is still usable at a sane offset
        ok(shim.call(&mut mem, Syscall::FdSeek, &[fd as u64, 0, whence::SET as u64, OUT as u64]));
        ok(write_fd(&mut shim, &mut mem, fd, b"data"));
        assert_eq!(shim.fs().metadata("/diskfile.bin").unwrap().size, 4);
        assert!(text.borrow().is_empty());
    }

    #[test]
    fn test_reopened_file_takes_lowest_free_fd() {
        let (mut shim, _) = shim();
        let mut mem = VecMemory::new(1);
        let a = open(&mut shim, &mut mem, "a", oflags::CREAT, rights::FD_WRITE);
        let b = open(&mut shim, &mut mem, "b", oflags::CREAT, rights::FD_WRITE);
        ok(shim.call(&mut mem, Syscall::FdClose, &[a as u64]));
        ok(shim.call(&mut mem, Syscall::FdClose, &[b as u64]));
        assert_eq!(open(&mut shim, &mut mem, "c", oflags::CREAT, rights::FD_WRITE), a);
    }

    #[test]
    fn test_seek_on_stream_is_spipe() {
        let (mut shim, _) = shim();
        let mut mem = VecMemory::new(1);
        let outcome = shim.call(&mut mem, Syscall::FdSeek, &[1, 0, 0, OUT as u64]);
        assert_eq!(outcome, CallOutcome::Return(Errno::SPipe));
    }

    #[test]
    fn test_prestat_discovery() {
        let (mut shim, _) = shim();
        let mut mem = VecMemory::new(1);
        ok(shim.call(&mut mem, Syscall::FdPrestatGet, &[3, OUT as u64]));
        assert_eq!(mem.read_u32(OUT + 4).unwrap(), 1);
        ok(shim.call(&mut mem, Syscall::FdPrestatDirName, &[3, DATA as u64, 1]));
        assert_eq!(mem.read(DATA, 1).unwrap(), b"/");

        let outcome = shim.call(&mut mem, Syscall::FdPrestatGet, &[4, OUT as u64]);
        assert_eq!(outcome, CallOutcome::Return(Errno::BadF));
    }

    #[test]
    fn test_path_escape_is_refused() {
        let text = Rc::new(RefCell::new(String::new()));
        let mut shim = WasiShim::new(StdoutRedirector::new(text));
        let root = shim.preopen("/sandbox").unwrap();
        let mut mem = VecMemory::new(1);
        let path = b"../etc";
        mem.write(DATA, path).unwrap();
        let outcome = shim.call(
            &mut mem,
            Syscall::PathCreateDirectory,
            &[root as u64, DATA as u64, path.len() as u64],
        );
        assert_eq!(outcome, CallOutcome::Return(Errno::NotCapable));
    }

    #[test]
    fn test_directory_calls() {
        let (mut shim, _) = shim();
        let mut mem = VecMemory::new(1);
        mem.write(DATA, b"logs").unwrap();
        ok(shim.call(&mut mem, Syscall::PathCreateDirectory, &[3, DATA as u64, 4]));
        let again = shim.call(&mut mem, Syscall::PathCreateDirectory, &[3, DATA as u64, 4]);
        assert_eq!(again, CallOutcome::Return(Errno::Exist));

        let dir = open(&mut shim, &mut mem, "logs", oflags::DIRECTORY, 0);
        ok(shim.call(&mut mem, Syscall::FdReaddir, &[dir as u64, DATA as u64, 256, 0, OUT as u64]));
        assert_eq!(mem.read_u32(OUT).unwrap(), 0);

        ok(shim.call(&mut mem, Syscall::FdReaddir, &[3, DATA as u64, 256, 0, OUT as u64]));
        let used = mem.read_u32(OUT).unwrap();
        assert_eq!(used, layout::DIRENT + 4);
        assert_eq!(mem.read(DATA + layout::DIRENT, 4).unwrap(), b"logs");
    }

    #[test]
    fn test_args_and_environ() {
        let (mut shim, _) = shim();
        shim.set_args(vec!["os_lab3".to_string(), "-v".to_string()]);
        shim.set_env("HOME", "/");
        let mut mem = VecMemory::new(1);

        ok(shim.call(&mut mem, Syscall::ArgsSizesGet, &[OUT as u64, OUT as u64 + 4]));
        assert_eq!(mem.read_u32(OUT).unwrap(), 2);
        assert_eq!(mem.read_u32(OUT + 4).unwrap(), 11);

        ok(shim.call(&mut mem, Syscall::ArgsGet, &[IOV as u64, DATA as u64]));
        let second = mem.read_u32(IOV + 4).unwrap();
        assert_eq!(mem.read_string(second, 3).unwrap(), "-v\0");

        ok(shim.call(&mut mem, Syscall::EnvironGet, &[IOV as u64, DATA as u64]));
        assert_eq!(mem.read_string(DATA, 6).unwrap(), "HOME=/");
    }

    #[test]
    fn test_proc_exit_records_code() {
        let (mut shim, _) = shim();
        let mut mem = VecMemory::new(1);
        assert_eq!(shim.call(&mut mem, Syscall::ProcExit, &[3]), CallOutcome::Exit(3));
        assert_eq!(shim.exit_code(), Some(3));
    }

    #[test]
    fn test_clock_and_random() {
        let (mut shim, _) = shim();
        let mut mem = VecMemory::new(1);
        ok(shim.call(&mut mem, Syscall::ClockTimeGet, &[clock::REALTIME as u64, 0, OUT as u64]));
        let bytes: [u8; 8] = mem.read(OUT, 8).unwrap().try_into().unwrap();
        assert!(u64::from_le_bytes(bytes) > 0);

        let bad = shim.call(&mut mem, Syscall::ClockTimeGet, &[99, 0, OUT as u64]);
        assert_eq!(bad, CallOutcome::Return(Errno::Inval));

        ok(shim.call(&mut mem, Syscall::RandomGet, &[DATA as u64, 32]));
        assert!(mem.read(DATA, 32).unwrap().iter().any(|&b| b != 0));
    }

    #[test]
    fn test_seeded_file_is_readable() {
        let mut fs = MemoryFs::new();
        fs.create_dir("/etc").unwrap();
        fs.insert_file("/etc/motd", b"welcome".to_vec()).unwrap();
        let text = Rc::new(RefCell::new(String::new()));
        let mut shim = WasiShim::new(StdoutRedirector::new(text)).with_fs(fs);
        shim.preopen("/").unwrap();
        let mut mem = VecMemory::new(1);

        let fd = open(&mut shim, &mut mem, "etc/motd", 0, rights::FD_READ);
        assert_eq!(shim.fds().len(), 5);
        mem.write_u32(IOV, DATA + 64).unwrap();
        mem.write_u32(IOV + 4, 32).unwrap();
        ok(shim.call(&mut mem, Syscall::FdRead, &[fd as u64, IOV as u64, 1, OUT as u64]));
        assert_eq!(mem.read(DATA + 64, 7).unwrap(), b"welcome");

        ok(shim.call(&mut mem, Syscall::FdClose, &[fd as u64]));
        assert_eq!(shim.fds().len(), 4);
        let closed = shim.call(&mut mem, Syscall::FdClose, &[fd as u64]);
        assert_eq!(closed, CallOutcome::Return(Errno::BadF));
    }

    #[test]
    fn test_missing_arguments_are_invalid() {
        let (mut shim, _) = shim();
        let mut mem = VecMemory::new(1);
        let outcome = shim.call(&mut mem, Syscall::FdWrite, &[1, 0]);
        assert_eq!(outcome, CallOutcome::Return(Errno::Inval));
    }
}
