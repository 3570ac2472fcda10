//! Error types for supervisor operations

use thiserror::Error;

/// Result type for supervisor operations
pub type Result<T> = std::result::Result<T, SupervisorError>;

/// Error types for supervisor
///
/// Expected agent failures are reported as `false` from the lifecycle
/// operations; these variants cover collaborator failures and misuse.
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Registry error: {0}")]
    Registry(String),

    #[error("Agent not found: {0}")]
    AgentNotFound(String),

    #[error("Health check error: {0}")]
    HealthCheck(String),

    #[error("Event handler error: {0}")]
    Hook(String),

    #[error("Unknown lifecycle event: {0}")]
    UnknownEvent(String),

    #[error("Lifecycle manager is not initialized")]
    NotInitialized,

    #[error(transparent)]
    Core(#[from] warden_core::error::WardenError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
