//! WASI preview 1 support
//!
//! The guest is a `wasm32-wasi` command. Everything it links against lives
//! here: the ABI constants, guest memory access, the descriptor table and
//! the shim that implements the calls. On `wasm32` the `imports` module
//! turns a shim into a JavaScript import object.

pub mod abi;
pub mod fd;
pub mod memory;
pub mod shim;

#[cfg(target_arch = "wasm32")]
pub mod imports;

pub use abi::{Errno, Syscall, WasiResult};
pub use fd::{Descriptor, FdTable};
pub use memory::{GuestMemory, VecMemory};
pub use shim::{CallOutcome, WasiShim};

#[cfg(target_arch = "wasm32")]
pub use memory::JsMemory;
