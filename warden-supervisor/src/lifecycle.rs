//! Lifecycle manager: the single authority over agent lifecycle state
//!
//! Every tracked agent owns two locks:
//! - an operation lock held for the whole of a start/stop/restart/pause/resume,
//!   including the awaited registry call, so operations on one agent are
//!   fully serialized while different agents never contend;
//! - a short-lived data lock around its state and metrics, which accessors and
//!   event handlers can read while an operation is in flight.
//!
//! Event handlers run while the operation lock is held. They may read any
//! agent through the accessors but must not start, stop, restart, pause or
//! resume the agent whose event they are handling.

use crate::events::{
    panic_message, EventDispatcher, LifecycleEvent, LifecycleEventKind, LifecycleHook,
};
use crate::health::{DefaultHealthCheck, HealthCheck, HealthCheckRegistry};
use crate::metrics::LifecycleMetrics;
use crate::monitor::MonitorHandle;
use crate::registry::AgentRegistry;
use crate::{Result, SupervisorError};
use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};
use warden_core::agent::AgentConfig;
use warden_core::config::LifecycleConfig;
use warden_core::lifecycle::LifecycleState;

/// Interval between health polls while waiting for a started agent
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Snapshot of one agent's lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentLifecycleInfo {
    pub state: LifecycleState,
    pub metrics: LifecycleMetrics,
}

/// Outcome of stopping every tracked agent
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StopAllReport {
    /// Agents a stop was attempted for
    pub total: usize,
    /// Agents that ended up stopped
    pub stopped: usize,
}

impl StopAllReport {
    /// Whether every agent stopped
    pub fn all_stopped(&self) -> bool {
        self.stopped == self.total
    }
}

#[derive(Debug, Default)]
struct AgentSlot {
    state: LifecycleState,
    metrics: LifecycleMetrics,
    last_config: Option<AgentConfig>,
}

pub(crate) struct TrackedAgent {
    pub(crate) id: String,
    /// Operation lock; holds `true` once the agent has been forgotten
    op: Arc<Mutex<bool>>,
    slot: RwLock<AgentSlot>,
}

impl TrackedAgent {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            op: Arc::new(Mutex::new(false)),
            slot: RwLock::new(AgentSlot::default()),
        }
    }

    pub(crate) async fn state(&self) -> LifecycleState {
        self.slot.read().await.state
    }

    /// Move to `to`; reaching `Stopped` or `Error` ends the current run
    async fn set_state(&self, to: LifecycleState) {
        let mut slot = self.slot.write().await;
        if slot.state != to {
            debug!(agent_id = %self.id, from = %slot.state, to = %to, "State transition");
            slot.state = to;
        }

        if to.is_at_rest() {
            slot.metrics.end_run(Utc::now());
        }
    }

    pub(crate) async fn with_metrics<R>(
        &self,
        f: impl FnOnce(&mut LifecycleMetrics) -> R,
    ) -> R {
        f(&mut self.slot.write().await.metrics)
    }

    async fn info(&self) -> AgentLifecycleInfo {
        let slot = self.slot.read().await;
        AgentLifecycleInfo {
            state: slot.state,
            metrics: slot.metrics.clone(),
        }
    }

    /// Whether an operation currently holds this agent
    pub(crate) fn is_busy(&self) -> bool {
        self.op.try_lock().is_err()
    }
}

/// Supervises agents through an [`AgentRegistry`]
///
/// Build one per host process, share it as `Arc<LifecycleManager>`, call
/// [`LifecycleManager::initialize`] once to discover agents and start the
/// monitor, and [`LifecycleManager::shutdown`] to stop everything.
pub struct LifecycleManager {
    pub(crate) config: LifecycleConfig,
    registry: Arc<dyn AgentRegistry>,
    agents: RwLock<HashMap<String, Arc<TrackedAgent>>>,
    pub(crate) health_checks: HealthCheckRegistry,
    events: EventDispatcher,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl LifecycleManager {
    /// Create a manager.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` fails validation.
    pub fn new(config: LifecycleConfig, registry: Arc<dyn AgentRegistry>) -> Result<Self> {
        config.validate()?;

        let default_check: Arc<dyn HealthCheck> = Arc::new(DefaultHealthCheck::new(
            registry.clone(),
            config.health_check_interval,
        ));

        Ok(Self {
            config,
            registry,
            agents: RwLock::new(HashMap::new()),
            health_checks: HealthCheckRegistry::new(default_check),
            events: EventDispatcher::new(),
            monitor: Mutex::new(None),
        })
    }

    /// Supervision policy in effect
    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Discover agents from the registry and start the monitor.
    ///
    /// Calling this again replaces the running monitor. Returns the number of
    /// agents the registry reported.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot list its agents.
    pub async fn initialize(self: &Arc<Self>) -> Result<usize> {
        let records = self.registry.list_agents().await?;
        for record in &records {
            self.ensure_agent(&record.id).await;
        }

        let mut monitor = self.monitor.lock().await;
        if let Some(previous) = monitor.take() {
            debug!("Replacing running lifecycle monitor");
            previous.stop().await;
        }
        *monitor = Some(MonitorHandle::spawn(Arc::downgrade(self)));

        info!(agents = records.len(), "Lifecycle manager initialized");
        Ok(records.len())
    }

    /// Stop the monitor, wait for it to finish its current pass, then stop
    /// every tracked agent.
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::NotInitialized`] if no monitor is running.
    pub async fn shutdown(&self) -> Result<StopAllReport> {
        let handle = self
            .monitor
            .lock()
            .await
            .take()
            .ok_or(SupervisorError::NotInitialized)?;

        handle.stop().await;
        let report = self.stop_all_agents().await;

        info!(
            stopped = report.stopped,
            total = report.total,
            "Lifecycle manager shut down"
        );
        Ok(report)
    }

    /// Whether the background monitor is running
    pub async fn is_monitoring(&self) -> bool {
        self.monitor
            .lock()
            .await
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Register a handler for one event kind
    pub async fn on(&self, kind: LifecycleEventKind, hook: Arc<dyn LifecycleHook>) {
        self.events.on(kind, hook).await;
    }

    /// Register a handler by event name, e.g. `"after_start"`
    ///
    /// # Errors
    ///
    /// Returns [`SupervisorError::UnknownEvent`] for an unrecognised name.
    pub async fn on_named(&self, event: &str, hook: Arc<dyn LifecycleHook>) -> Result<()> {
        let kind = event.parse::<LifecycleEventKind>()?;
        self.on(kind, hook).await;
        Ok(())
    }

    /// Use a custom health check for one agent
    pub async fn register_health_check(
        &self,
        agent_id: impl Into<String>,
        check: Arc<dyn HealthCheck>,
    ) {
        self.health_checks.register(agent_id, check).await;
    }

    /// Revert an agent to the default health check
    pub async fn remove_health_check(&self, agent_id: &str) -> bool {
        self.health_checks.remove(agent_id).await
    }

    /// Start an agent.
    ///
    /// A no-op returning `true` if the agent is already starting or running.
    /// With `wait_for_healthy`, polls the agent's health check every second for
    /// up to `startup_timeout`; an agent that never turns healthy is moved to
    /// `Error` and `false` is returned.
    pub async fn start_agent(
        &self,
        agent_id: &str,
        config: Option<&AgentConfig>,
        wait_for_healthy: bool,
    ) -> bool {
        let (agent, _op) = self.acquire(agent_id).await;
        self.start_locked(&agent, config, wait_for_healthy).await
    }

    /// Stop an agent.
    ///
    /// With `force`, a failed registry stop still leaves the agent `Stopped`.
    pub async fn stop_agent(&self, agent_id: &str, force: bool) -> bool {
        let (agent, _op) = self.acquire(agent_id).await;
        self.stop_locked(&agent, force).await
    }

    /// Restart an agent, subject to the hourly restart cap.
    ///
    /// Without `config`, the configuration of the agent's last start is reused.
    pub async fn restart_agent(
        &self,
        agent_id: &str,
        config: Option<&AgentConfig>,
        force: bool,
    ) -> bool {
        let (agent, _op) = self.acquire(agent_id).await;
        self.restart_locked(&agent, config, force, self.config.restart_delay)
            .await
    }

    /// Pause a running agent
    pub async fn pause_agent(&self, agent_id: &str) -> bool {
        let (agent, _op) = self.acquire(agent_id).await;

        let state = agent.state().await;
        if matches!(state, LifecycleState::Pausing | LifecycleState::Paused) {
            debug!(agent_id = %agent_id, state = %state, "Agent already paused");
            return true;
        }

        self.emit(
            LifecycleEventKind::BeforePause,
            agent_id,
            json!({ "from": state }),
        )
        .await;
        agent.set_state(LifecycleState::Pausing).await;

        match guarded(self.registry.pause_agent(agent_id)).await {
            Ok(true) => {
                agent.set_state(LifecycleState::Paused).await;
                info!(agent_id = %agent_id, "Agent paused");
                self.emit(LifecycleEventKind::AfterPause, agent_id, json!({}))
                    .await;
                true
            }
            outcome => {
                warn!(
                    agent_id = %agent_id,
                    reason = %failure_reason(&outcome, "pause"),
                    "Failed to pause agent"
                );
                agent.set_state(LifecycleState::Error).await;
                false
            }
        }
    }

    /// Resume a paused agent
    pub async fn resume_agent(&self, agent_id: &str) -> bool {
        let (agent, _op) = self.acquire(agent_id).await;

        let state = agent.state().await;
        if matches!(state, LifecycleState::Resuming | LifecycleState::Running) {
            debug!(agent_id = %agent_id, state = %state, "Agent already running");
            return true;
        }

        self.emit(
            LifecycleEventKind::BeforeResume,
            agent_id,
            json!({ "from": state }),
        )
        .await;
        agent.set_state(LifecycleState::Resuming).await;

        match guarded(self.registry.resume_agent(agent_id)).await {
            Ok(true) => {
                agent.set_state(LifecycleState::Running).await;
                info!(agent_id = %agent_id, "Agent resumed");
                self.emit(LifecycleEventKind::AfterResume, agent_id, json!({}))
                    .await;
                true
            }
            outcome => {
                warn!(
                    agent_id = %agent_id,
                    reason = %failure_reason(&outcome, "resume"),
                    "Failed to resume agent"
                );
                agent.set_state(LifecycleState::Error).await;
                false
            }
        }
    }

    /// Stop every tracked agent concurrently
    pub async fn stop_all_agents(&self) -> StopAllReport {
        let ids = self.tracked_agents().await;

        let results = futures::future::join_all(
            ids.iter()
                .map(|id| AssertUnwindSafe(self.stop_agent(id, false)).catch_unwind()),
        )
        .await;

        let mut report = StopAllReport {
            total: ids.len(),
            stopped: 0,
        };
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(true) => report.stopped += 1,
                Ok(false) => {}
                Err(_) => error!(agent_id = %id, "Stopping agent panicked"),
            }
        }

        info!("Stopped {}/{} agents", report.stopped, report.total);
        report
    }

    /// Drop an agent that is `Stopped` or `Error` from tracking.
    ///
    /// Operations already waiting on the agent run against a fresh entry
    /// afterwards. Returns `false` if the agent is unknown or not at rest.
    pub async fn forget_agent(&self, agent_id: &str) -> bool {
        loop {
            let Some(agent) = self.agents.read().await.get(agent_id).cloned() else {
                return false;
            };

            let mut retired = agent.op.lock().await;
            if *retired {
                continue;
            }

            let state = agent.state().await;
            if !state.is_at_rest() {
                warn!(agent_id = %agent_id, state = %state, "Refusing to forget an active agent");
                return false;
            }

            *retired = true;
            {
                let mut agents = self.agents.write().await;
                if agents
                    .get(agent_id)
                    .is_some_and(|current| Arc::ptr_eq(current, &agent))
                {
                    agents.remove(agent_id);
                }
            }
            self.health_checks.remove(agent_id).await;

            info!(agent_id = %agent_id, "Agent forgotten");
            return true;
        }
    }

    /// Current state of an agent
    pub async fn get_lifecycle_state(&self, agent_id: &str) -> Option<LifecycleState> {
        let agent = self.agents.read().await.get(agent_id).cloned()?;
        Some(agent.state().await)
    }

    /// Snapshot of an agent's metrics
    pub async fn get_lifecycle_metrics(&self, agent_id: &str) -> Option<LifecycleMetrics> {
        let agent = self.agents.read().await.get(agent_id).cloned()?;
        Some(agent.info().await.metrics)
    }

    /// Snapshot of every tracked agent
    pub async fn get_all_lifecycle_info(&self) -> HashMap<String, AgentLifecycleInfo> {
        let agents: Vec<_> = self.agents.read().await.values().cloned().collect();

        let mut info = HashMap::with_capacity(agents.len());
        for agent in agents {
            info.insert(agent.id.clone(), agent.info().await);
        }
        info
    }

    /// IDs of every tracked agent
    pub async fn tracked_agents(&self) -> Vec<String> {
        self.agents.read().await.keys().cloned().collect()
    }

    pub(crate) async fn tracked(&self) -> Vec<Arc<TrackedAgent>> {
        self.agents.read().await.values().cloned().collect()
    }

    async fn ensure_agent(&self, agent_id: &str) -> Arc<TrackedAgent> {
        if let Some(agent) = self.agents.read().await.get(agent_id) {
            return agent.clone();
        }

        self.agents
            .write()
            .await
            .entry(agent_id.to_string())
            .or_insert_with(|| {
                debug!(agent_id = %agent_id, "Tracking agent");
                Arc::new(TrackedAgent::new(agent_id))
            })
            .clone()
    }

    /// Lock an agent for an operation, tracking it first if needed. An entry
    /// retired by `forget_agent` while waiting is swapped for a fresh one.
    async fn acquire(&self, agent_id: &str) -> (Arc<TrackedAgent>, OwnedMutexGuard<bool>) {
        loop {
            let agent = self.ensure_agent(agent_id).await;
            let retired = agent.op.clone().lock_owned().await;
            if !*retired {
                return (agent, retired);
            }

            debug!(agent_id = %agent_id, "Agent forgotten while waiting, tracking it again");
        }
    }

    async fn start_locked(
        &self,
        agent: &TrackedAgent,
        config: Option<&AgentConfig>,
        wait_for_healthy: bool,
    ) -> bool {
        let agent_id = agent.id.as_str();
        let state = agent.state().await;
        if matches!(state, LifecycleState::Starting | LifecycleState::Running) {
            debug!(agent_id = %agent_id, state = %state, "Agent already started");
            return true;
        }

        self.emit(
            LifecycleEventKind::BeforeStart,
            agent_id,
            json!({ "from": state }),
        )
        .await;
        agent.set_state(LifecycleState::Starting).await;
        if let Some(config) = config {
            agent.slot.write().await.last_config = Some(config.clone());
        }

        let requested = Instant::now();
        let outcome = guarded(self.registry.start_agent(agent_id, config)).await;
        if !matches!(outcome, Ok(true)) {
            self.fail_start(agent, failure_reason(&outcome, "start")).await;
            return false;
        }

        agent.with_metrics(|m| m.record_start(Utc::now())).await;
        agent.set_state(LifecycleState::Running).await;

        if wait_for_healthy && !self.wait_until_healthy(agent_id).await {
            self.fail_start(agent, "health check timed out".to_string()).await;
            return false;
        }

        let startup = requested.elapsed().as_secs_f64();
        let start_count = agent
            .with_metrics(|m| {
                m.record_startup_duration(startup);
                m.start_count
            })
            .await;

        info!(agent_id = %agent_id, startup_secs = startup, "Agent started");
        self.emit(
            LifecycleEventKind::AfterStart,
            agent_id,
            json!({ "start_count": start_count, "startup_seconds": startup }),
        )
        .await;
        true
    }

    async fn fail_start(&self, agent: &TrackedAgent, reason: String) {
        warn!(agent_id = %agent.id, reason = %reason, "Agent failed to start");
        agent.set_state(LifecycleState::Error).await;
        agent.with_metrics(|m| m.record_failure(Utc::now())).await;
        self.emit(
            LifecycleEventKind::StartFailed,
            &agent.id,
            json!({ "reason": reason }),
        )
        .await;
    }

    async fn wait_until_healthy(&self, agent_id: &str) -> bool {
        let deadline = Instant::now() + self.config.startup_timeout;

        loop {
            if self.health_checks.is_healthy(agent_id).await {
                return true;
            }

            let now = Instant::now();
            if now >= deadline {
                return false;
            }

            debug!(agent_id = %agent_id, "Waiting for agent to become healthy");
            tokio::time::sleep(HEALTH_POLL_INTERVAL.min(deadline - now)).await;
        }
    }

    async fn stop_locked(&self, agent: &TrackedAgent, force: bool) -> bool {
        let agent_id = agent.id.as_str();
        let state = agent.state().await;
        if matches!(state, LifecycleState::Stopping | LifecycleState::Stopped) {
            debug!(agent_id = %agent_id, state = %state, "Agent already stopped");
            return true;
        }

        self.emit(
            LifecycleEventKind::BeforeStop,
            agent_id,
            json!({ "from": state, "force": force }),
        )
        .await;
        agent.set_state(LifecycleState::Stopping).await;

        let timeout = self.config.shutdown_timeout;
        let stop = guarded(self.registry.stop_agent(agent_id));
        let reason = match tokio::time::timeout(timeout, stop).await {
            Ok(Ok(true)) => {
                agent.set_state(LifecycleState::Stopped).await;
                let uptime = agent
                    .with_metrics(|m| {
                        m.record_stop(Utc::now());
                        m.uptime_seconds
                    })
                    .await;
                info!(agent_id = %agent_id, uptime_secs = uptime, "Agent stopped");
                self.emit(
                    LifecycleEventKind::AfterStop,
                    agent_id,
                    json!({ "uptime_seconds": uptime }),
                )
                .await;
                return true;
            }
            Ok(outcome) => failure_reason(&outcome, "stop"),
            Err(_) => format!("registry stop timed out after {:?}", timeout),
        };

        if force {
            warn!(
                agent_id = %agent_id,
                reason = %reason,
                "Stop failed, forcing agent to stopped"
            );
            agent.set_state(LifecycleState::Stopped).await;
            return true;
        }

        warn!(agent_id = %agent_id, reason = %reason, "Failed to stop agent");
        agent.set_state(LifecycleState::Error).await;
        agent.with_metrics(|m| m.record_failure(Utc::now())).await;
        false
    }

    async fn restart_locked(
        &self,
        agent: &TrackedAgent,
        config: Option<&AgentConfig>,
        force: bool,
        delay: Duration,
    ) -> bool {
        let agent_id = agent.id.as_str();
        let max_per_hour = self.config.max_restarts_per_hour;
        if !agent
            .with_metrics(|m| m.restart_allowed(Utc::now(), max_per_hour))
            .await
        {
            warn!(
                agent_id = %agent_id,
                max_restarts_per_hour = max_per_hour,
                "Restart refused: hourly restart limit reached"
            );
            return false;
        }

        let config = match config {
            Some(config) => Some(config.clone()),
            None => agent.slot.read().await.last_config.clone(),
        };

        info!(agent_id = %agent_id, delay = ?delay, "Restarting agent");
        agent.set_state(LifecycleState::Restarting).await;

        if self.stop_locked(agent, force).await && !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let started = self.start_locked(agent, config.as_ref(), true).await;
        if started {
            let restart_count = agent
                .with_metrics(|m| {
                    m.record_restart(Utc::now());
                    m.restart_count
                })
                .await;
            self.emit(
                LifecycleEventKind::AfterRestart,
                agent_id,
                json!({ "restart_count": restart_count }),
            )
            .await;
        }

        started
    }

    /// Restart an agent the monitor found unhealthy, unless another operation
    /// moved it out of `Running` first
    pub(crate) async fn recover(&self, agent: &TrackedAgent, delay: Duration) -> bool {
        let retired = agent.op.lock().await;
        if *retired {
            return false;
        }

        let state = agent.state().await;
        if state != LifecycleState::Running {
            debug!(agent_id = %agent.id, state = %state, "Skipping recovery");
            return false;
        }

        self.restart_locked(agent, None, false, delay).await
    }

    /// Move a running agent the monitor has given up on to `Error`
    pub(crate) async fn mark_failed(&self, agent: &TrackedAgent, reason: &str) {
        let retired = agent.op.lock().await;
        if *retired || agent.state().await != LifecycleState::Running {
            return;
        }

        error!(agent_id = %agent.id, reason = %reason, "Giving up on agent");
        agent.set_state(LifecycleState::Error).await;
        agent.with_metrics(|m| m.record_failure(Utc::now())).await;
    }

    async fn emit(&self, kind: LifecycleEventKind, agent_id: &str, details: serde_json::Value) {
        let event = LifecycleEvent::new(kind, agent_id, details);
        self.events.emit(&event).await;
    }
}

/// Await a registry call, reporting a panic as a registry error
async fn guarded<F>(call: F) -> Result<bool>
where
    F: Future<Output = Result<bool>>,
{
    match AssertUnwindSafe(call).catch_unwind().await {
        Ok(outcome) => outcome,
        Err(panic) => Err(SupervisorError::Registry(format!(
            "registry panicked: {}",
            panic_message(panic.as_ref())
        ))),
    }
}

fn failure_reason(outcome: &Result<bool>, action: &str) -> String {
    match outcome {
        Ok(true) => format!("{} succeeded", action),
        Ok(false) => format!("registry refused to {} agent", action),
        Err(e) => format!("registry error during {}: {}", action, e),
    }
}
