//! Where module bytes come from

use crate::error::{BootError, BootResult};
use std::future::Future;

/// A source of module bytes
pub trait ModuleSource {
    /// Fetch the module at `url`
    fn fetch(&mut self, url: &str) -> impl Future<Output = BootResult<Vec<u8>>>;
}

/// Bytes already in memory (embedded or prebuilt)
pub struct StaticSource {
    bytes: Vec<u8>,
}

impl StaticSource {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }
}

impl ModuleSource for StaticSource {
    async fn fetch(&mut self, _url: &str) -> BootResult<Vec<u8>> {
        if self.bytes.is_empty() {
            return Err(BootError::InvalidModule {
                reason: "no module bytes".to_string(),
            });
        }
        Ok(self.bytes.clone())
    }
}

/// Fetch over HTTP with the window's `fetch`
///
/// One request, no retry. Anything but a 2xx response is an error.
#[cfg(target_arch = "wasm32")]
pub struct HttpSource;

#[cfg(target_arch = "wasm32")]
impl ModuleSource for HttpSource {
    async fn fetch(&mut self, url: &str) -> BootResult<Vec<u8>> {
        use wasm_bindgen::JsCast;
        use wasm_bindgen_futures::JsFuture;

        let failed = |reason: String| BootError::Fetch {
            url: url.to_string(),
            reason,
        };

        let window = web_sys::window().ok_or_else(|| failed("no window object".to_string()))?;

        let resp_value = JsFuture::from(window.fetch_with_str(url))
            .await
            .map_err(|e| failed(super::describe_js(&e)))?;

        let resp: web_sys::Response = resp_value
            .dyn_into()
            .map_err(|_| failed("fetch did not resolve to a Response".to_string()))?;

        if !resp.ok() {
            return Err(BootError::HttpStatus {
                url: url.to_string(),
                status: resp.status(),
            });
        }

        let array_buffer = JsFuture::from(
            resp.array_buffer()
                .map_err(|e| failed(super::describe_js(&e)))?,
        )
        .await
        .map_err(|e| failed(super::describe_js(&e)))?;

        Ok(js_sys::Uint8Array::new(&array_buffer).to_vec())
    }
}
