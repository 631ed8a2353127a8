//! Error types for the bootstrap
//!
//! Every variant here is fatal to a boot. Failures the guest can recover
//! from are reported to it as WASI errno values instead (see `wasi::Errno`).

use std::fmt;

/// Result type for bootstrap operations
pub type BootResult<T> = Result<T, BootError>;

/// Errors that abort the load-then-run sequence
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootError {
    /// The module bytes could not be fetched
    Fetch { url: String, reason: String },

    /// The server answered, but not with a 2xx status
    HttpStatus { url: String, status: u16 },

    /// Module binary is malformed or invalid
    InvalidModule { reason: String },

    /// Required export is missing
    MissingExport { name: &'static str },

    /// Export exists but has the wrong kind
    WrongExportType {
        name: &'static str,
        expected: &'static str,
    },

    /// Compilation or instantiation was rejected by the host runtime
    InstantiationFailed { reason: String },

    /// The guest trapped while running its start routine
    Trap { reason: String },

    /// The output element (or the document hosting it) is missing
    SinkUnavailable { element: String },

    /// Boot configuration could not be parsed
    Config { reason: String },

    /// The loader has already left the idle state
    AlreadyStarted,
}

impl fmt::Display for BootError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fetch { url, reason } => {
                write!(f, "failed to fetch '{}': {}", url, reason)
            }
            Self::HttpStatus { url, status } => {
                write!(f, "fetching '{}' returned HTTP {}", url, status)
            }
            Self::InvalidModule { reason } => {
                write!(f, "invalid WASM module: {}", reason)
            }
            Self::MissingExport { name } => {
                write!(f, "missing required export: '{}'", name)
            }
            Self::WrongExportType { name, expected } => {
                write!(f, "export '{}' has wrong type: expected {}", name, expected)
            }
            Self::InstantiationFailed { reason } => {
                write!(f, "module instantiation failed: {}", reason)
            }
            Self::Trap { reason } => write!(f, "guest trapped: {}", reason),
            Self::SinkUnavailable { element } => {
                write!(f, "output element '#{}' is not available", element)
            }
            Self::Config { reason } => write!(f, "invalid boot config: {}", reason),
            Self::AlreadyStarted => write!(f, "loader already started"),
        }
    }
}

impl std::error::Error for BootError {}

impl From<serde_json::Error> for BootError {
    fn from(err: serde_json::Error) -> Self {
        Self::Config {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BootError::MissingExport { name: "_start" };
        assert_eq!(err.to_string(), "missing required export: '_start'");

        let err = BootError::HttpStatus {
            url: "os_lab3.wasm".to_string(),
            status: 404,
        };
        assert!(err.to_string().contains("os_lab3.wasm"));
        assert!(err.to_string().contains("404"));

        let err = BootError::SinkUnavailable {
            element: "wasm-output".to_string(),
        };
        assert_eq!(err.to_string(), "output element '#wasm-output' is not available");
    }

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: BootError = json_err.into();
        assert!(matches!(err, BootError::Config { .. }));
    }
}
