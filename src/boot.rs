//! Boot sequence
//!
//! Runs once per page load: read the configuration, find the output element,
//! build the shim and start the loader on the microtask queue. Failures are
//! reported on the console; the output element is left alone.

use crate::config::{BootConfig, CONFIG_ELEMENT_ID};
use crate::console_log;
use crate::error::BootResult;
use crate::loader::{BootOutcome, BrowserHost, HttpSource, Loader};
use crate::sink::{DomSink, StdoutRedirector};
use crate::wasi::WasiShim;

/// Boot the guest
pub fn boot() {
    let (loader, shim) = match prepare() {
        Ok(ready) => ready,
        Err(e) => {
            web_sys::console::error_1(&format!("[boot] {}", e).into());
            return;
        }
    };

    wasm_bindgen_futures::spawn_local(run(loader, shim));
}

/// Everything that can fail before the first suspension point
fn prepare() -> BootResult<(Loader<HttpSource, BrowserHost>, WasiShim)> {
    let config = BootConfig::from_document(CONFIG_ELEMENT_ID)?;
    console_log!(
        "[boot] {} -> #{}",
        config.module_url,
        config.output_element
    );

    let sink = DomSink::attach(&config.output_element)?;
    let output = StdoutRedirector::with_stderr(sink, config.stderr);
    let shim = WasiShim::from_config(&config, output)?;

    let loader = Loader::new(HttpSource, BrowserHost, config.module_url.clone());
    Ok((loader, shim))
}

async fn run(mut loader: Loader<HttpSource, BrowserHost>, shim: WasiShim) {
    match loader.boot(shim).await {
        BootOutcome::Loaded(report) => match report.exit_code {
            Some(code) => console_log!("[boot] {} exited with {}", loader.url(), code),
            None => console_log!("[boot] {} returned from _start", loader.url()),
        },
        BootOutcome::Failed(e) => {
            web_sys::console::error_1(&format!("[boot] {}", e).into());
        }
    }
}
