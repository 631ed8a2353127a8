//! Guest linear memory access
//!
//! Every pointer the guest hands the shim is bounds-checked here before any
//! byte is read or written. Out-of-range accesses become `EFAULT`.

use super::abi::{layout, Errno, WasiResult};

/// Byte-addressed view of a guest's linear memory
pub trait GuestMemory {
    /// Current memory size in bytes
    fn size(&self) -> u32;

    /// Copy `buf.len()` bytes starting at `offset` into `buf`
    fn read_into(&self, offset: u32, buf: &mut [u8]) -> WasiResult<()>;

    /// Copy `data` into memory starting at `offset`
    fn write(&mut self, offset: u32, data: &[u8]) -> WasiResult<()>;

    /// Check if an access is within bounds
    fn check_bounds(&self, offset: u32, len: u32) -> WasiResult<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size() => Ok(()),
            _ => Err(Errno::Fault),
        }
    }

    fn read(&self, offset: u32, len: u32) -> WasiResult<Vec<u8>> {
        self.check_bounds(offset, len)?;
        let mut buf = vec![0u8; len as usize];
        self.read_into(offset, &mut buf)?;
        Ok(buf)
    }

    fn read_u32(&self, offset: u32) -> WasiResult<u32> {
        let mut buf = [0u8; 4];
        self.read_into(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn write_u32(&mut self, offset: u32, value: u32) -> WasiResult<()> {
        self.write(offset, &value.to_le_bytes())
    }

    fn write_u64(&mut self, offset: u32, value: u64) -> WasiResult<()> {
        self.write(offset, &value.to_le_bytes())
    }

    /// Read a string with explicit length (lossy UTF-8)
    fn read_string(&self, ptr: u32, len: u32) -> WasiResult<String> {
        let bytes = self.read(ptr, len)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Read an iovec array as (ptr, len) pairs
    fn read_iovecs(&self, iovs: u32, count: u32) -> WasiResult<Vec<(u32, u32)>> {
        let table = self.read(iovs, count.checked_mul(layout::IOVEC).ok_or(Errno::Fault)?)?;
        Ok(table
            .chunks_exact(layout::IOVEC as usize)
            .map(|entry| {
                let ptr = u32::from_le_bytes([entry[0], entry[1], entry[2], entry[3]]);
                let len = u32::from_le_bytes([entry[4], entry[5], entry[6], entry[7]]);
                (ptr, len)
            })
            .collect())
    }
}

/// Host-owned linear memory, used natively and in tests
pub struct VecMemory {
    data: Vec<u8>,
}

impl VecMemory {
    /// Page size in bytes (64KB)
    pub const PAGE_SIZE: u32 = 65536;

    /// Create new memory with given number of pages
    pub fn new(pages: u32) -> Self {
        Self {
            data: vec![0; pages as usize * Self::PAGE_SIZE as usize],
        }
    }

    pub fn with_size(bytes: usize) -> Self {
        Self {
            data: vec![0; bytes],
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl GuestMemory for VecMemory {
    fn size(&self) -> u32 {
        self.data.len() as u32
    }

    fn read_into(&self, offset: u32, buf: &mut [u8]) -> WasiResult<()> {
        self.check_bounds(offset, buf.len() as u32)?;
        let start = offset as usize;
        buf.copy_from_slice(&self.data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> WasiResult<()> {
        self.check_bounds(offset, data.len() as u32)?;
        let start = offset as usize;
        self.data[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }
}

/// View over a `WebAssembly.Memory` export
///
/// The backing `ArrayBuffer` is replaced whenever the guest grows its
/// memory, so it is fetched again on every access.
#[cfg(target_arch = "wasm32")]
pub struct JsMemory {
    memory: js_sys::WebAssembly::Memory,
}

#[cfg(target_arch = "wasm32")]
impl JsMemory {
    pub fn new(memory: js_sys::WebAssembly::Memory) -> Self {
        Self { memory }
    }

    fn bytes(&self) -> js_sys::Uint8Array {
        js_sys::Uint8Array::new(&self.memory.buffer())
    }
}

#[cfg(target_arch = "wasm32")]
impl GuestMemory for JsMemory {
    fn size(&self) -> u32 {
        self.bytes().length()
    }

    fn read_into(&self, offset: u32, buf: &mut [u8]) -> WasiResult<()> {
        self.check_bounds(offset, buf.len() as u32)?;
        self.bytes()
            .subarray(offset, offset + buf.len() as u32)
            .copy_to(buf);
        Ok(())
    }

    fn write(&mut self, offset: u32, data: &[u8]) -> WasiResult<()> {
        self.check_bounds(offset, data.len() as u32)?;
        self.bytes()
            .subarray(offset, offset + data.len() as u32)
            .copy_from(data);
        Ok(())
    }
}
