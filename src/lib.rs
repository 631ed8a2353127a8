//! rustic-boot - browser bootstrap for a WASI command module
//!
//! Fetches a precompiled `wasm32-wasi` program, links it against an
//! in-browser WASI preview 1 shim and runs its `_start`. Whatever the guest
//! writes to standard output is appended, line by line, to a page element.
//!
//! Layers, outermost first:
//! - `boot`: the `#[wasm_bindgen(start)]` sequence (browser only)
//! - `loader`: fetch, validate, instantiate, start
//! - `wasi`: the system-interface shim and its import object
//! - `sink` and `vfs`: where output and files end up
//!
//! Everything below `boot` also builds natively, which is how it is tested.

#[cfg(target_arch = "wasm32")]
use wasm_bindgen::prelude::*;

pub mod config;
pub mod error;
pub mod loader;
pub mod sink;
pub mod vfs;
pub mod wasi;

#[cfg(target_arch = "wasm32")]
mod boot;

/// Console logging helper
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_namespace = console)]
    fn log(s: &str);
}

/// Log to browser console (WASM)
#[cfg(target_arch = "wasm32")]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        $crate::log(&format!($($t)*))
    };
}

/// Log to stderr (native)
#[cfg(not(target_arch = "wasm32"))]
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => {
        eprintln!($($t)*)
    };
}

pub use config::{BootConfig, StderrMode};
pub use error::{BootError, BootResult};
pub use loader::{BootOutcome, Loader, LoaderState, RunReport};
pub use sink::{OutputSink, StdoutRedirector, TextSink};
pub use wasi::WasiShim;

/// Initialize panic hook for better error messages in browser console
#[cfg(target_arch = "wasm32")]
fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// WASM entry point
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn main() {
    init_panic_hook();
    boot::boot();
}
