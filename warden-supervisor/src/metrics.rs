//! Per-agent lifecycle metrics and the restart-rate window

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of restart timestamps kept in `restart_times`
const RESTART_HISTORY_LIMIT: usize = 1000;

/// Lifecycle counters and timestamps for one agent
///
/// Only the lifecycle manager mutates these; callers receive clones.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LifecycleMetrics {
    pub start_count: u64,
    pub stop_count: u64,
    pub restart_count: u64,
    pub failure_count: u64,
    /// Accumulated seconds of completed runs; a run ends when the agent
    /// reaches `Stopped` or `Error`
    pub uptime_seconds: f64,
    pub last_start_time: Option<DateTime<Utc>>,
    pub last_stop_time: Option<DateTime<Utc>>,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub last_health_check: Option<DateTime<Utc>>,
    /// Mean seconds from start request to a started (and, if awaited, healthy) agent
    pub average_startup_time: f64,
    /// Starts folded into `average_startup_time`
    #[serde(default)]
    pub startup_samples: u64,
    pub restart_times: Vec<DateTime<Utc>>,
    /// Sliding one-hour window used for rate limiting
    pub restarts_in_last_hour: Vec<DateTime<Utc>>,
    #[serde(skip)]
    run_started: Option<DateTime<Utc>>,
}

impl LifecycleMetrics {
    /// Create zeroed metrics
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_start(&mut self, at: DateTime<Utc>) {
        self.start_count += 1;
        self.last_start_time = Some(at);
        self.run_started = Some(at);
    }

    /// Fold one startup duration into the running mean over `startup_samples`
    pub(crate) fn record_startup_duration(&mut self, seconds: f64) {
        self.startup_samples += 1;
        self.average_startup_time +=
            (seconds - self.average_startup_time) / self.startup_samples as f64;
    }

    pub(crate) fn record_stop(&mut self, at: DateTime<Utc>) {
        self.stop_count += 1;
        self.last_stop_time = Some(at);
    }

    /// Add the current run, if any, to `uptime_seconds`
    pub(crate) fn end_run(&mut self, at: DateTime<Utc>) {
        if let Some(started) = self.run_started.take() {
            let elapsed = at.signed_duration_since(started);
            self.uptime_seconds += elapsed.num_milliseconds().max(0) as f64 / 1000.0;
        }
    }

    pub(crate) fn record_failure(&mut self, at: DateTime<Utc>) {
        self.failure_count += 1;
        self.last_failure_time = Some(at);
    }

    pub(crate) fn record_health_check(&mut self, at: DateTime<Utc>) {
        self.last_health_check = Some(at);
    }

    pub(crate) fn record_restart(&mut self, at: DateTime<Utc>) {
        self.restart_count += 1;
        self.restart_times.push(at);
        self.restarts_in_last_hour.push(at);

        if self.restart_times.len() > RESTART_HISTORY_LIMIT {
            self.restart_times.remove(0);
        }
    }

    /// Drop window entries older than one hour before `now`
    pub(crate) fn prune_restart_window(&mut self, now: DateTime<Utc>) {
        let cutoff = now - Duration::hours(1);
        self.restarts_in_last_hour.retain(|t| *t > cutoff);
    }

    /// Prune the window, then check it against the hourly cap
    pub(crate) fn restart_allowed(&mut self, now: DateTime<Utc>, max_per_hour: usize) -> bool {
        self.prune_restart_window(now);
        self.restarts_in_last_hour.len() < max_per_hour
    }

    /// Start time of the current run
    pub fn running_since(&self) -> Option<DateTime<Utc>> {
        self.run_started
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uptime_accumulates_per_run() {
        let mut metrics = LifecycleMetrics::new();
        let t0 = Utc::now();

        metrics.record_start(t0);
        metrics.end_run(t0 + Duration::seconds(10));
        assert_eq!(metrics.uptime_seconds, 10.0);

        // Ending again without a start adds nothing
        metrics.end_run(t0 + Duration::seconds(20));
        assert_eq!(metrics.uptime_seconds, 10.0);

        metrics.record_start(t0 + Duration::seconds(30));
        assert_eq!(metrics.running_since(), Some(t0 + Duration::seconds(30)));
        metrics.end_run(t0 + Duration::seconds(35));
        assert_eq!(metrics.uptime_seconds, 15.0);
        assert_eq!(metrics.running_since(), None);
    }

    #[test]
    fn test_average_startup_time() {
        let mut metrics = LifecycleMetrics::new();
        let now = Utc::now();

        metrics.record_start(now);
        metrics.record_startup_duration(2.0);
        metrics.record_start(now);
        metrics.record_startup_duration(4.0);

        assert_eq!(metrics.average_startup_time, 3.0);
        assert_eq!(metrics.startup_samples, 2);
    }

    #[test]
    fn test_average_ignores_starts_without_duration() {
        let mut metrics = LifecycleMetrics::new();
        let now = Utc::now();

        // Started but never became healthy
        metrics.record_start(now);
        metrics.record_start(now);
        metrics.record_startup_duration(2.0);

        assert_eq!(metrics.start_count, 2);
        assert_eq!(metrics.average_startup_time, 2.0);
    }

    #[test]
    fn test_restart_window_prunes_old_entries() {
        let mut metrics = LifecycleMetrics::new();
        let now = Utc::now();

        metrics.restarts_in_last_hour = vec![
            now - Duration::minutes(90),
            now - Duration::minutes(61),
            now - Duration::minutes(59),
            now - Duration::minutes(1),
        ];

        metrics.prune_restart_window(now);
        assert_eq!(
            metrics.restarts_in_last_hour,
            vec![now - Duration::minutes(59), now - Duration::minutes(1)]
        );
    }

    #[test]
    fn test_restart_allowed_respects_cap() {
        let mut metrics = LifecycleMetrics::new();
        let now = Utc::now();

        for minutes in [30, 20, 10] {
            metrics.record_restart(now - Duration::minutes(minutes));
        }

        assert!(!metrics.restart_allowed(now, 3));
        assert!(metrics.restart_allowed(now, 4));

        // Thirty-five minutes later the oldest entry has aged out
        assert!(metrics.restart_allowed(now + Duration::minutes(35), 3));
        assert_eq!(metrics.restarts_in_last_hour.len(), 2);
        assert_eq!(metrics.restart_count, 3);
        assert_eq!(metrics.restart_times.len(), 3);
    }

    #[test]
    fn test_restart_history_is_bounded() {
        let mut metrics = LifecycleMetrics::new();
        let now = Utc::now();

        for _ in 0..(RESTART_HISTORY_LIMIT + 5) {
            metrics.record_restart(now);
        }

        assert_eq!(metrics.restart_times.len(), RESTART_HISTORY_LIMIT);
        assert_eq!(metrics.restart_count, (RESTART_HISTORY_LIMIT + 5) as u64);
    }
}
