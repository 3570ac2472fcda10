//! Lifecycle events and the handler dispatcher
//!
//! Handlers subscribe to one [`LifecycleEventKind`] each and are invoked in
//! registration order. A handler that returns an error or panics is logged and
//! skipped; it never affects the operation that emitted the event or the
//! handlers after it.
//!
//! # Example
//!
//! ```rust,ignore
//! use warden_supervisor::events::{FnHook, LifecycleEventKind};
//!
//! manager
//!     .on(
//!         LifecycleEventKind::AfterStart,
//!         FnHook::arc(|event| {
//!             println!("{} is up", event.agent_id);
//!             Ok(())
//!         }),
//!     )
//!     .await;
//! ```

use crate::{Result, SupervisorError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEventKind {
    BeforeStart,
    AfterStart,
    StartFailed,
    BeforeStop,
    AfterStop,
    AfterRestart,
    BeforePause,
    AfterPause,
    BeforeResume,
    AfterResume,
}

impl LifecycleEventKind {
    /// Every event kind
    pub const ALL: [LifecycleEventKind; 10] = [
        LifecycleEventKind::BeforeStart,
        LifecycleEventKind::AfterStart,
        LifecycleEventKind::StartFailed,
        LifecycleEventKind::BeforeStop,
        LifecycleEventKind::AfterStop,
        LifecycleEventKind::AfterRestart,
        LifecycleEventKind::BeforePause,
        LifecycleEventKind::AfterPause,
        LifecycleEventKind::BeforeResume,
        LifecycleEventKind::AfterResume,
    ];

    /// Event name, e.g. `after_start`
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEventKind::BeforeStart => "before_start",
            LifecycleEventKind::AfterStart => "after_start",
            LifecycleEventKind::StartFailed => "start_failed",
            LifecycleEventKind::BeforeStop => "before_stop",
            LifecycleEventKind::AfterStop => "after_stop",
            LifecycleEventKind::AfterRestart => "after_restart",
            LifecycleEventKind::BeforePause => "before_pause",
            LifecycleEventKind::AfterPause => "after_pause",
            LifecycleEventKind::BeforeResume => "before_resume",
            LifecycleEventKind::AfterResume => "after_resume",
        }
    }
}

impl std::fmt::Display for LifecycleEventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LifecycleEventKind {
    type Err = SupervisorError;

    fn from_str(s: &str) -> Result<Self> {
        LifecycleEventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| SupervisorError::UnknownEvent(s.to_string()))
    }
}

/// Event emitted by the lifecycle manager
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    /// Event ID
    pub id: Uuid,

    /// Event kind
    pub kind: LifecycleEventKind,

    /// Agent the event concerns
    pub agent_id: String,

    /// Timestamp
    pub timestamp: DateTime<Utc>,

    /// Event-specific details, e.g. `{"reason": ...}` for `start_failed`
    pub details: serde_json::Value,
}

impl LifecycleEvent {
    /// Create an event stamped now
    pub fn new(
        kind: LifecycleEventKind,
        agent_id: impl Into<String>,
        details: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            agent_id: agent_id.into(),
            timestamp: Utc::now(),
            details,
        }
    }
}

/// Result type for hooks
pub type HookResult = Result<()>;

/// Boxed future returned by async closure hooks
pub type BoxHookFuture = Pin<Box<dyn Future<Output = HookResult> + Send>>;

/// Trait for lifecycle event handlers
#[async_trait]
pub trait LifecycleHook: Send + Sync {
    /// Handle an event
    async fn on_event(&self, event: &LifecycleEvent) -> HookResult;
}

/// Hook wrapping a synchronous closure
pub struct FnHook<F> {
    f: F,
}

impl<F> FnHook<F>
where
    F: Fn(&LifecycleEvent) -> HookResult + Send + Sync + 'static,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wrap a closure, ready for registration
    pub fn arc(f: F) -> Arc<dyn LifecycleHook> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F> LifecycleHook for FnHook<F>
where
    F: Fn(&LifecycleEvent) -> HookResult + Send + Sync + 'static,
{
    async fn on_event(&self, event: &LifecycleEvent) -> HookResult {
        (self.f)(event)
    }
}

/// Hook wrapping an async closure; the closure receives its own copy of the event
pub struct AsyncFnHook<F> {
    f: F,
}

impl<F> AsyncFnHook<F>
where
    F: Fn(LifecycleEvent) -> BoxHookFuture + Send + Sync + 'static,
{
    /// Wrap a closure
    pub fn new(f: F) -> Self {
        Self { f }
    }

    /// Wrap a closure, ready for registration
    pub fn arc(f: F) -> Arc<dyn LifecycleHook> {
        Arc::new(Self::new(f))
    }
}

#[async_trait]
impl<F> LifecycleHook for AsyncFnHook<F>
where
    F: Fn(LifecycleEvent) -> BoxHookFuture + Send + Sync + 'static,
{
    async fn on_event(&self, event: &LifecycleEvent) -> HookResult {
        (self.f)(event.clone()).await
    }
}

/// Hook that logs every event it receives
pub struct LoggingHook;

#[async_trait]
impl LifecycleHook for LoggingHook {
    async fn on_event(&self, event: &LifecycleEvent) -> HookResult {
        match event.kind {
            LifecycleEventKind::StartFailed => tracing::warn!(
                agent_id = %event.agent_id,
                details = %event.details,
                "Agent failed to start"
            ),
            kind => tracing::info!(agent_id = %event.agent_id, event = %kind, "Lifecycle event"),
        }
        Ok(())
    }
}

/// Registry of handlers keyed by event kind
#[derive(Default)]
pub struct EventDispatcher {
    handlers: RwLock<HashMap<LifecycleEventKind, Vec<Arc<dyn LifecycleHook>>>>,
}

impl EventDispatcher {
    /// Create an empty dispatcher
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind
    pub async fn on(&self, kind: LifecycleEventKind, hook: Arc<dyn LifecycleHook>) {
        self.handlers.write().await.entry(kind).or_default().push(hook);
    }

    /// Number of handlers registered for `kind`
    pub async fn handler_count(&self, kind: LifecycleEventKind) -> usize {
        self.handlers
            .read()
            .await
            .get(&kind)
            .map_or(0, |hooks| hooks.len())
    }

    /// Invoke every handler registered for the event's kind.
    ///
    /// Returns how many handlers failed.
    pub async fn emit(&self, event: &LifecycleEvent) -> usize {
        let hooks = match self.handlers.read().await.get(&event.kind) {
            Some(hooks) => hooks.clone(),
            None => return 0,
        };

        let mut failures = 0;
        for hook in hooks {
            match AssertUnwindSafe(hook.on_event(event)).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    tracing::warn!(
                        agent_id = %event.agent_id,
                        event = %event.kind,
                        error = %e,
                        "Lifecycle event handler failed"
                    );
                }
                Err(panic) => {
                    failures += 1;
                    tracing::warn!(
                        agent_id = %event.agent_id,
                        event = %event.kind,
                        panic = %panic_message(panic.as_ref()),
                        "Lifecycle event handler panicked"
                    );
                }
            }
        }

        failures
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
