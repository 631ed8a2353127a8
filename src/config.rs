//! Boot configuration
//!
//! Everything has a default matching the stock page, so a page without a
//! configuration block boots `os_lab3.wasm` into `#wasm-output`. A page can
//! override any field with a JSON block:
//!
//! ```html
//! <script type="application/json" id="boot-config">
//!   { "module_url": "shell.wasm", "stdin": "ls\n" }
//! </script>
//! ```

use crate::error::{BootError, BootResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Id of the element holding the JSON configuration block
pub const CONFIG_ELEMENT_ID: &str = "boot-config";

/// What happens to the guest's standard error
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StderrMode {
    /// Forward to the log with a `[guest stderr]` prefix
    #[default]
    Console,
    /// Accept and drop
    Discard,
}

/// Settings for one boot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootConfig {
    /// URL of the guest module
    pub module_url: String,
    /// Id of the element standard output is appended to
    pub output_element: String,
    /// `argv[0]`
    pub program_name: String,
    /// Arguments after `argv[0]`
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    /// Everything the guest reads from descriptor 0
    pub stdin: String,
    /// Guest directories exposed as preopens, in descriptor order
    pub preopens: Vec<String>,
    pub stderr: StderrMode,
}

impl Default for BootConfig {
    fn default() -> Self {
        Self {
            module_url: "os_lab3.wasm".to_string(),
            output_element: "wasm-output".to_string(),
            program_name: "os_lab3".to_string(),
            args: Vec::new(),
            env: BTreeMap::new(),
            stdin: String::new(),
            preopens: vec!["/".to_string()],
            stderr: StderrMode::Console,
        }
    }
}

impl BootConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration; missing fields keep their defaults
    pub fn from_json(json: &str) -> BootResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.check()?;
        Ok(config)
    }

    fn check(&self) -> BootResult<()> {
        if self.module_url.trim().is_empty() {
            return Err(BootError::Config {
                reason: "module_url is empty".to_string(),
            });
        }
        if self.output_element.trim().is_empty() {
            return Err(BootError::Config {
                reason: "output_element is empty".to_string(),
            });
        }
        if let Some(bad) = self.preopens.iter().find(|p| !p.starts_with('/')) {
            return Err(BootError::Config {
                reason: format!("preopen '{}' is not an absolute path", bad),
            });
        }
        Ok(())
    }

    /// Read the configuration block from the page, if there is one
    #[cfg(target_arch = "wasm32")]
    pub fn from_document(element_id: &str) -> BootResult<Self> {
        let text = web_sys::window()
            .and_then(|w| w.document())
            .and_then(|d| d.get_element_by_id(element_id))
            .and_then(|e| e.text_content());

        match text {
            Some(json) if !json.trim().is_empty() => Self::from_json(&json),
            _ => Ok(Self::default()),
        }
    }
}
