//! Error types for the grib-output crate.

use thiserror::Error;

/// Errors that can occur while routing a field to the output pipeline.
#[derive(Error, Debug)]
pub enum OutputError {
    #[error("Unknown plan profile: {0} (expected one of to_file, to_fdb, debug)")]
    UnknownProfile(String),

    #[error("Unsupported grid kind: rank {rank} field would need template '{template}'")]
    UnsupportedGridKind { rank: usize, template: String },

    #[error("Invalid field: {0}")]
    InvalidField(String),

    #[error("Output session failed to initialize: {0}")]
    InitializationFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Archive configuration error: {0}")]
    ArchiveConfig(String),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Sink failed: {0}")]
    Sink(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl OutputError {
    /// Create an InvalidField error.
    pub fn invalid_field(msg: impl Into<String>) -> Self {
        Self::InvalidField(msg.into())
    }

    /// Create an InvalidConfig error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create an Encode error.
    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    /// Create a Sink error.
    pub fn sink(msg: impl Into<String>) -> Self {
        Self::Sink(msg.into())
    }

    /// Create a Transport error.
    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }

    /// Whether this error is a caller/configuration mistake that must not be retried.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            OutputError::UnknownProfile(_)
                | OutputError::UnsupportedGridKind { .. }
                | OutputError::InitializationFailed(_)
                | OutputError::InvalidConfig(_)
                | OutputError::ArchiveConfig(_)
        )
    }
}

/// Result type for output operations.
pub type Result<T> = std::result::Result<T, OutputError>;
