//! Where a validated module runs

use super::{ModuleInfo, RunReport};
use crate::error::BootResult;
use crate::wasi::WasiShim;
use std::future::Future;

/// An engine that instantiates a module against a shim and runs `_start`
pub trait ModuleHost {
    /// Compile, link and start the module
    ///
    /// Called at most once per loader. The shim is consumed; whatever the
    /// guest writes goes through its output sink while this runs.
    fn run(
        &mut self,
        bytes: Vec<u8>,
        info: ModuleInfo,
        shim: WasiShim,
    ) -> impl Future<Output = BootResult<RunReport>>;
}
