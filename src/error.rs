use std::io;
use thiserror::Error;

/// Result type for dxport operations
pub type Result<T> = std::result::Result<T, DxError>;

/// Unified error type for handle, archive and stream operations
#[derive(Debug, Error)]
pub enum DxError {
    // Resolution errors
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Path has no directory component to map onto a container: {0}")]
    NoContainer(String),

    // Container errors
    #[error("Corrupt container {path}: {reason}")]
    CorruptContainer { path: String, reason: String },

    // Handle errors
    #[error("Invalid handle: {0}")]
    InvalidHandle(i32),

    #[error("Handle table is full")]
    HandleTableFull,

    #[error("Stale stream over {0}: its archive was released")]
    StaleHandle(String),

    // Stream errors
    #[error("Seek target {target} is outside stream bounds [0, {length}]")]
    InvalidOffset { target: i64, length: u64 },

    #[error("Invalid scan format: {0}")]
    InvalidScanFormat(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl DxError {
    pub(crate) fn corrupt(path: &str, reason: impl Into<String>) -> Self {
        DxError::CorruptContainer {
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for DxError {
    fn from(err: toml::de::Error) -> Self {
        DxError::Config(err.to_string())
    }
}
