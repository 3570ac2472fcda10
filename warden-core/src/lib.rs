//! # Warden Core - shared vocabulary for agent lifecycle supervision
//!
//! Defines the types every Warden component agrees on:
//! - **Lifecycle states** for supervised agents
//! - **Restart strategies** and the resolved [`lifecycle::RestartPolicy`]
//! - **Agent records** as reported by an agent registry
//! - **Configuration** loaded from `warden.toml` and `WARDEN_` environment variables
//!
//! The supervisor itself lives in `warden-supervisor`.

pub mod agent;
pub mod config;
pub mod error;
pub mod lifecycle;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::agent::{AgentConfig, AgentRecord, AgentStatus};
    pub use crate::config::{LifecycleConfig, WardenConfig};
    pub use crate::error::{Result, WardenError};
    pub use crate::lifecycle::{LifecycleState, RestartPolicy, RestartStrategy};
}
