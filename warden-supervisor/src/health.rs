//! Health checks for running agents

use crate::events::panic_message;
use crate::registry::AgentRegistry;
use crate::Result;
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use warden_core::agent::AgentStatus;

/// Liveness predicate for an agent
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Whether the agent is alive and responsive
    async fn check(&self, agent_id: &str) -> Result<bool>;
}

/// Registry-backed health check.
///
/// An agent is healthy when the registry reports it `Running` and it was seen
/// within twice the health-check interval.
pub struct DefaultHealthCheck {
    registry: Arc<dyn AgentRegistry>,
    stale_after: chrono::Duration,
}

impl DefaultHealthCheck {
    /// Create a check for agents polled every `interval`
    pub fn new(registry: Arc<dyn AgentRegistry>, interval: Duration) -> Self {
        let stale_after = chrono::Duration::from_std(interval.saturating_mul(2))
            .unwrap_or_else(|_| chrono::Duration::MAX);

        Self {
            registry,
            stale_after,
        }
    }
}

#[async_trait]
impl HealthCheck for DefaultHealthCheck {
    async fn check(&self, agent_id: &str) -> Result<bool> {
        let Some(record) = self.registry.get_agent(agent_id).await? else {
            debug!(agent_id = %agent_id, "Agent missing from registry");
            return Ok(false);
        };

        Ok(record.status == AgentStatus::Running
            && record.seen_within(Utc::now(), self.stale_after))
    }
}

/// Boxed future returned by closure health checks
pub type BoxHealthFuture = Pin<Box<dyn Future<Output = Result<bool>> + Send>>;

/// Health check wrapping an async closure
pub struct FnHealthCheck<F> {
    f: F,
}

impl<F> FnHealthCheck<F>
where
    F: Fn(String) -> BoxHealthFuture + Send + Sync + 'static,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wrap a closure, ready for registration
    pub fn arc(f: F) -> Arc<dyn HealthCheck> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F> HealthCheck for FnHealthCheck<F>
where
    F: Fn(String) -> BoxHealthFuture + Send + Sync + 'static,
{
    async fn check(&self, agent_id: &str) -> Result<bool> {
        (self.f)(agent_id.to_string()).await
    }
}

/// Per-agent health checks with a shared default
pub struct HealthCheckRegistry {
    default: Arc<dyn HealthCheck>,
    custom: RwLock<HashMap<String, Arc<dyn HealthCheck>>>,
}

impl HealthCheckRegistry {
    /// Create a registry falling back to `default`
    pub fn new(default: Arc<dyn HealthCheck>) -> Self {
        Self {
            default,
            custom: RwLock::new(HashMap::new()),
        }
    }

    /// Use `check` for `agent_id` instead of the default
    pub async fn register(&self, agent_id: impl Into<String>, check: Arc<dyn HealthCheck>) {
        self.custom.write().await.insert(agent_id.into(), check);
    }

    /// Revert `agent_id` to the default check
    pub async fn remove(&self, agent_id: &str) -> bool {
        self.custom.write().await.remove(agent_id).is_some()
    }

    /// Whether `agent_id` has a custom check
    pub async fn has_custom(&self, agent_id: &str) -> bool {
        self.custom.read().await.contains_key(agent_id)
    }

    /// Run the agent's check; errors and panics count as unhealthy
    pub async fn is_healthy(&self, agent_id: &str) -> bool {
        let check = self
            .custom
            .read()
            .await
            .get(agent_id)
            .cloned()
            .unwrap_or_else(|| self.default.clone());

        match AssertUnwindSafe(check.check(agent_id)).catch_unwind().await {
            Ok(Ok(healthy)) => healthy,
            Ok(Err(e)) => {
                warn!(agent_id = %agent_id, error = %e, "Health check failed");
                false
            }
            Err(panic) => {
                warn!(
                    agent_id = %agent_id,
                    panic = %panic_message(panic.as_ref()),
                    "Health check panicked"
                );
                false
            }
        }
    }
}
