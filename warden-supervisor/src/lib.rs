//! Warden Supervisor - lifecycle supervision for long-running agents
//!
//! Wraps an [`AgentRegistry`] (the component that physically starts and stops
//! agents) with a [`LifecycleManager`] that tracks a lifecycle state machine per
//! agent, records lifecycle metrics, rate-limits restarts, runs periodic health
//! checks with automatic recovery, and dispatches lifecycle events to
//! registered handlers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use warden_core::config::LifecycleConfig;
//! use warden_supervisor::{InMemoryRegistry, LifecycleManager, LoggingHook, LifecycleEventKind};
//!
//! let registry = Arc::new(InMemoryRegistry::new());
//! registry.register("indexer", "Indexer").await;
//!
//! let manager = Arc::new(LifecycleManager::new(LifecycleConfig::default(), registry)?);
//! manager.on(LifecycleEventKind::StartFailed, Arc::new(LoggingHook)).await;
//! manager.initialize().await?;
//!
//! manager.start_agent("indexer", None, true).await;
//! // ...
//! manager.shutdown().await?;
//! ```

mod error;
pub mod events;
pub mod health;
mod lifecycle;
pub mod metrics;
mod monitor;
pub mod registry;

pub use error::{Result, SupervisorError};
pub use events::{
    AsyncFnHook, EventDispatcher, FnHook, LifecycleEvent, LifecycleEventKind, LifecycleHook,
    LoggingHook,
};
pub use health::{DefaultHealthCheck, FnHealthCheck, HealthCheck, HealthCheckRegistry};
pub use lifecycle::{AgentLifecycleInfo, LifecycleManager, StopAllReport};
pub use metrics::LifecycleMetrics;
pub use registry::{AgentRegistry, InMemoryRegistry};
