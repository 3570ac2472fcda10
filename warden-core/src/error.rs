//! Error types for Warden core operations

/// Result type for Warden core operations
pub type Result<T> = std::result::Result<T, WardenError>;

/// Error types shared across the Warden crates
#[derive(Debug, thiserror::Error)]
pub enum WardenError {
    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Configuration loaded but violates a constraint
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl From<String> for WardenError {
    fn from(s: String) -> Self {
        WardenError::Other(s)
    }
}

impl From<&str> for WardenError {
    fn from(s: &str) -> Self {
        WardenError::Other(s.to_string())
    }
}

impl From<anyhow::Error> for WardenError {
    fn from(err: anyhow::Error) -> Self {
        WardenError::Other(err.to_string())
    }
}
