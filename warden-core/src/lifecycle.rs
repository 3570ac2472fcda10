//! Lifecycle states and restart policies

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Lifecycle state of a supervised agent
///
/// A newly tracked agent starts in [`LifecycleState::Stopped`]. There is no
/// terminal state: an agent in [`LifecycleState::Error`] leaves it through an
/// explicit start or stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// Not running
    #[default]
    Stopped,
    /// Start requested, waiting on the registry
    Starting,
    /// Running and subject to health checks
    Running,
    /// Stop requested, waiting on the registry
    Stopping,
    /// Pause requested, waiting on the registry
    Pausing,
    /// Paused by the registry
    Paused,
    /// Resume requested, waiting on the registry
    Resuming,
    /// Between the stop and start halves of a restart
    Restarting,
    /// Last transition failed
    Error,
}

impl LifecycleState {
    /// Whether the state is an in-flight transition
    pub fn is_transitional(&self) -> bool {
        matches!(
            self,
            LifecycleState::Starting
                | LifecycleState::Stopping
                | LifecycleState::Pausing
                | LifecycleState::Resuming
                | LifecycleState::Restarting
        )
    }

    /// Whether the agent may be dropped from tracking in this state
    pub fn is_at_rest(&self) -> bool {
        matches!(self, LifecycleState::Stopped | LifecycleState::Error)
    }

    /// Lowercase name of the state
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Stopped => "stopped",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Pausing => "pausing",
            LifecycleState::Paused => "paused",
            LifecycleState::Resuming => "resuming",
            LifecycleState::Restarting => "restarting",
            LifecycleState::Error => "error",
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Restart strategy as it appears in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartStrategy {
    /// Never restart automatically
    Never,
    /// Restart when a health check fails
    #[default]
    OnFailure,
    /// Restart whenever the agent is found unhealthy
    Always,
    /// Restart with exponentially growing delays
    ExponentialBackoff,
    /// Restart after a fixed interval
    FixedInterval,
}

/// Resolved restart policy
///
/// Built from a [`RestartStrategy`] plus the delays configured next to it.
/// The monitor asks [`RestartPolicy::next_delay`] how long to wait before
/// each automatic restart; `None` means the agent is not restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Never restart
    Never,
    /// Restart after a constant delay when unhealthy
    OnFailure { delay: Duration },
    /// Restart after a constant delay, unconditionally
    Always { delay: Duration },
    /// Restart after `base * 2^attempt`, capped at `max`
    ExponentialBackoff { base: Duration, max: Duration },
    /// Restart after a fixed interval
    FixedInterval { interval: Duration },
}

impl RestartPolicy {
    /// Delay before the restart numbered `attempt` (0-indexed)
    pub fn next_delay(&self, attempt: u32) -> Option<Duration> {
        match *self {
            RestartPolicy::Never => None,
            RestartPolicy::OnFailure { delay } | RestartPolicy::Always { delay } => Some(delay),
            RestartPolicy::FixedInterval { interval } => Some(interval),
            RestartPolicy::ExponentialBackoff { base, max } => {
                let exp = attempt.min(i32::MAX as u32) as i32;
                let secs = base.as_secs_f64() * 2f64.powi(exp);

                if !secs.is_finite() || secs > max.as_secs_f64() {
                    Some(max)
                } else {
                    Some(Duration::from_secs_f64(secs))
                }
            }
        }
    }

    /// Whether this policy ever restarts an agent
    pub fn restarts(&self) -> bool {
        !matches!(self, RestartPolicy::Never)
    }
}
