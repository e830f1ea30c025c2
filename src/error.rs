use thiserror::Error;

/// Main error type for azxfer operations
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Remote operation '{operation}' failed: {message}")]
    RemoteOperationFailed { operation: String, message: String },

    #[error("Operation cancelled")]
    Canceled,

    #[error("Write of {len} bytes at section offset {offset} exceeds section length {limit}")]
    PartialWrite { offset: u64, len: u64, limit: u64 },

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl TransferError {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn remote<O: Into<String>, M: std::fmt::Display>(operation: O, err: M) -> Self {
        Self::RemoteOperationFailed {
            operation: operation.into(),
            message: err.to_string(),
        }
    }

    pub fn not_found<S: Into<String>>(name: S) -> Self {
        Self::NotFound(name.into())
    }

    pub fn authentication<S: Into<String>>(msg: S) -> Self {
        Self::AuthenticationError(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::SerializationError(msg.into())
    }

    /// True for the error a chunk returns after observing a sibling's failure.
    pub fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled)
    }
}

/// Result type alias for azxfer operations
pub type Result<T> = std::result::Result<T, TransferError>;

/// Convert Azure Core errors to TransferError
impl From<azure_core::Error> for TransferError {
    fn from(error: azure_core::Error) -> Self {
        Self::remote("azure", error)
    }
}
