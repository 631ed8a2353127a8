//! Module loader
//!
//! Fetches the guest, validates it and hands it to a host engine together
//! with its shim. A loader runs exactly one module:
//!
//! ```text
//! Idle -> Loading -> Running
//!            |
//!            +----> Failed
//! ```
//!
//! `Running` and `Failed` are terminal.

mod host;
mod source;
mod validate;

#[cfg(target_arch = "wasm32")]
mod browser;

pub use host::ModuleHost;
pub use source::{ModuleSource, StaticSource};
pub use validate::{validate, Export, ExternKind, Import, ModuleInfo};

#[cfg(target_arch = "wasm32")]
pub use browser::BrowserHost;
#[cfg(target_arch = "wasm32")]
pub use source::HttpSource;

use crate::console_log;
use crate::error::{BootError, BootResult};
use crate::wasi::WasiShim;

/// Loader lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderState {
    /// Nothing requested yet
    Idle,
    /// Fetching and validating
    Loading,
    /// The module has been handed to the host
    Running,
    /// Fetch or validation failed; the guest never ran
    Failed,
}

/// What the guest left behind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Code passed to `proc_exit`, `None` if `_start` returned normally
    pub exit_code: Option<u32>,
}

/// Result of a boot attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootOutcome {
    Loaded(RunReport),
    Failed(BootError),
}

impl BootOutcome {
    pub fn is_loaded(&self) -> bool {
        matches!(self, BootOutcome::Loaded(_))
    }

    pub fn into_result(self) -> BootResult<RunReport> {
        match self {
            BootOutcome::Loaded(report) => Ok(report),
            BootOutcome::Failed(err) => Err(err),
        }
    }
}

/// One-shot loader over a byte source and an engine
pub struct Loader<S, H> {
    source: S,
    host: H,
    url: String,
    state: LoaderState,
}

impl<S: ModuleSource, H: ModuleHost> Loader<S, H> {
    pub fn new(source: S, host: H, url: impl Into<String>) -> Self {
        Self {
            source,
            host,
            url: url.into(),
            state: LoaderState::Idle,
        }
    }

    pub fn state(&self) -> LoaderState {
        self.state
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Fetch, validate and run the module against `shim`
    ///
    /// Only the first call does anything; later ones fail with
    /// `AlreadyStarted` and leave the state untouched. A fetch or validation
    /// failure never reaches the host.
    pub async fn boot(&mut self, shim: WasiShim) -> BootOutcome {
        if self.state != LoaderState::Idle {
            return BootOutcome::Failed(BootError::AlreadyStarted);
        }

        self.state = LoaderState::Loading;
        let (bytes, info) = match self.load().await {
            Ok(loaded) => loaded,
            Err(err) => {
                self.state = LoaderState::Failed;
                return BootOutcome::Failed(err);
            }
        };

        self.state = LoaderState::Running;
        match self.host.run(bytes, info, shim).await {
            Ok(report) => BootOutcome::Loaded(report),
            Err(err) => BootOutcome::Failed(err),
        }
    }

    async fn load(&mut self) -> BootResult<(Vec<u8>, ModuleInfo)> {
        console_log!("[loader] fetching {}", self.url);
        let bytes = self.source.fetch(&self.url).await?;
        let info = validate(&bytes)?;
        console_log!(
            "[loader] {} bytes, {} imports",
            bytes.len(),
            info.imports.len()
        );
        Ok((bytes, info))
    }
}

/// Best-effort message for a JS exception or rejection value
#[cfg(target_arch = "wasm32")]
pub(crate) fn describe_js(value: &wasm_bindgen::JsValue) -> String {
    use wasm_bindgen::JsCast;

    if let Some(err) = value.dyn_ref::<js_sys::Error>() {
        return String::from(err.message());
    }
    value.as_string().unwrap_or_else(|| format!("{:?}", value))
}
