//! Background health monitor
//!
//! One task per manager. Each pass health-checks every `Running` agent that no
//! operation currently holds, then hands unhealthy agents to the restart
//! policy. Passes are never interrupted; cancellation is observed only while
//! sleeping between them.

use crate::events::panic_message;
use crate::lifecycle::LifecycleManager;
use chrono::Utc;
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Weak;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use warden_core::lifecycle::LifecycleState;

/// Pause after a pass that failed
const ITERATION_BACKOFF: Duration = Duration::from_secs(5);

/// Handle to a running monitor task
pub(crate) struct MonitorHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Spawn a monitor for `manager`. The task holds only a weak reference and
    /// exits on its own once the manager is dropped.
    pub(crate) fn spawn(manager: Weak<LifecycleManager>) -> Self {
        let token = CancellationToken::new();
        let task = tokio::spawn(run(manager, token.clone()));
        Self { token, task }
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Cancel the monitor and wait for it to exit
    pub(crate) async fn stop(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            if !e.is_cancelled() {
                error!(error = %e, "Lifecycle monitor task failed");
            }
        }
    }
}

async fn run(manager: Weak<LifecycleManager>, token: CancellationToken) {
    info!("Lifecycle monitor started");
    let mut attempts: HashMap<String, u32> = HashMap::new();

    while !token.is_cancelled() {
        let Some(strong) = manager.upgrade() else {
            debug!("Lifecycle manager dropped, monitor exiting");
            break;
        };

        let interval = strong.config.health_check_interval;
        let pause = guarded_pass(strong.monitor_pass(&mut attempts), interval).await;
        drop(strong);

        tokio::select! {
            _ = token.cancelled() => break,
            _ = tokio::time::sleep(pause) => {}
        }
    }

    info!("Lifecycle monitor stopped");
}

/// Run one pass and return the pause before the next: `interval` normally,
/// [`ITERATION_BACKOFF`] if the pass panicked
async fn guarded_pass<F>(pass: F, interval: Duration) -> Duration
where
    F: Future<Output = ()>,
{
    match AssertUnwindSafe(pass).catch_unwind().await {
        Ok(()) => interval,
        Err(panic) => {
            error!(
                panic = %panic_message(panic.as_ref()),
                backoff = ?ITERATION_BACKOFF,
                "Lifecycle monitor pass failed"
            );
            ITERATION_BACKOFF
        }
    }
}

impl LifecycleManager {
    /// One monitor pass.
    ///
    /// `attempts` counts consecutive monitor-triggered restarts per agent and
    /// survives across passes.
    pub(crate) async fn monitor_pass(&self, attempts: &mut HashMap<String, u32>) {
        let tracked = self.tracked().await;
        attempts.retain(|id, _| tracked.iter().any(|agent| agent.id == *id));

        let mut candidates = Vec::new();
        for agent in tracked {
            if agent.is_busy() {
                debug!(agent_id = %agent.id, "Agent busy, skipping health check");
                continue;
            }

            if agent.state().await == LifecycleState::Running {
                candidates.push(agent);
            } else {
                attempts.remove(&agent.id);
            }
        }

        let results = futures::future::join_all(candidates.iter().map(|agent| async move {
            let healthy = self.health_checks.is_healthy(&agent.id).await;
            agent
                .with_metrics(|m| m.record_health_check(Utc::now()))
                .await;
            healthy
        }))
        .await;

        let policy = self.config.restart_policy();
        let mut recoveries = Vec::new();

        for (agent, healthy) in candidates.iter().zip(results) {
            if healthy {
                attempts.remove(&agent.id);
                continue;
            }

            let attempt = attempts.get(&agent.id).copied().unwrap_or(0);
            let Some(delay) = policy.next_delay(attempt) else {
                warn!(agent_id = %agent.id, "Agent unhealthy, restart policy forbids restart");
                continue;
            };

            if attempt >= self.config.max_restart_attempts {
                attempts.remove(&agent.id);
                self.mark_failed(
                    agent,
                    &format!("still unhealthy after {} restart attempts", attempt),
                )
                .await;
                continue;
            }

            warn!(
                agent_id = %agent.id,
                attempt = attempt + 1,
                delay = ?delay,
                "Agent unhealthy, restarting"
            );
            attempts.insert(agent.id.clone(), attempt + 1);
            recoveries.push(self.recover(agent, delay));
        }

        if !recoveries.is_empty() {
            let recovered = futures::future::join_all(recoveries)
                .await
                .into_iter()
                .filter(|ok| *ok)
                .count();
            debug!(recovered, "Monitor recoveries finished");
        }
    }
}
