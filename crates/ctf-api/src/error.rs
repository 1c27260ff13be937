use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CtfApiError {
    #[error("Failed to read file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write file {path}: {source}")]
    WriteFile {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config {path}: {source}")]
    ParseConfig {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("Invalid config field {field}: {message}")]
    InvalidConfig { field: String, message: String },
    #[error("Script path does not exist: {path}")]
    SourceNotFound { path: PathBuf },
    #[error("No .json scripts under {path}.")]
    SourceEmpty { path: PathBuf },
    #[error("Failed to serialize {what}: {source}")]
    Serialize {
        what: String,
        source: serde_json::Error,
    },
    #[error("Engine error: {0}")]
    Engine(#[from] ctf_core::CtfError),
}

impl CtfApiError {
    pub(crate) fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }
}
