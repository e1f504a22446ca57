//! Run metrics.
//!
//! The in-memory [`MetricsCollector`] backs `Engine::metrics()`. Every update
//! is mirrored through the `metrics` facade so a process that installs a
//! recorder (the server installs a Prometheus one) can export it:
//!
//! - `runhub_runs_total{status}`
//! - `runhub_run_duration_seconds`
//! - `runhub_node_executions_total{node_type, status}`
//! - `runhub_active_runs`, `runhub_queued_runs`

use hubcore::RunStatus;
use ::metrics::{counter, gauge, histogram};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Point-in-time view of the run counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub total_runs: u64,
    pub successful_runs: u64,
    /// Failed plus stopped runs
    pub failed_runs: u64,
    pub stopped_runs: u64,
    pub total_duration_ms: u64,
    pub average_duration_ms: f64,
    pub success_rate: f64,
    pub error_types: BTreeMap<String, u64>,
}

#[derive(Debug, Default)]
pub struct MetricsCollector {
    total: u64,
    successful: u64,
    failed: u64,
    stopped: u64,
    total_duration_ms: u64,
    error_types: BTreeMap<String, u64>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Account for one terminal transition
    pub fn record(&mut self, status: RunStatus, duration_ms: u64, error: Option<&str>) {
        self.total += 1;
        self.total_duration_ms = self.total_duration_ms.saturating_add(duration_ms);

        match status {
            RunStatus::Completed => self.successful += 1,
            RunStatus::Stopped => {
                self.failed += 1;
                self.stopped += 1;
            }
            _ => self.failed += 1,
        }

        if let Some(message) = error {
            *self
                .error_types
                .entry(error_type_key(message))
                .or_insert(0) += 1;
        }

        record_run(status, Duration::from_millis(duration_ms));
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let (average_duration_ms, success_rate) = if self.total == 0 {
            (0.0, 0.0)
        } else {
            (
                self.total_duration_ms as f64 / self.total as f64,
                self.successful as f64 / self.total as f64,
            )
        };

        MetricsSnapshot {
            total_runs: self.total,
            successful_runs: self.successful,
            failed_runs: self.failed,
            stopped_runs: self.stopped,
            total_duration_ms: self.total_duration_ms,
            average_duration_ms,
            success_rate,
            error_types: self.error_types.clone(),
        }
    }
}

/// Coarse bucket for an error message: the text before the first `:`.
///
/// Run errors render as `"<Kind> error: <detail>"`, so in practice the key is
/// the error kind. Foreign message formats still land in some bucket, just a
/// less useful one.
pub fn error_type_key(message: &str) -> String {
    let head = message.split(':').next().unwrap_or("").trim();
    if head.is_empty() {
        "Unknown".to_string()
    } else {
        head.to_string()
    }
}

fn record_run(status: RunStatus, duration: Duration) {
    counter!("runhub_runs_total", "status" => status.as_str()).increment(1);
    histogram!("runhub_run_duration_seconds").record(duration.as_secs_f64());
}

pub fn record_node_execution(node_type: &str, status: &'static str) {
    counter!(
        "runhub_node_executions_total",
        "node_type" => node_type.to_string(),
        "status" => status
    )
    .increment(1);
}

pub fn set_load(running: usize, queued: usize) {
    gauge!("runhub_active_runs").set(running as f64);
    gauge!("runhub_queued_runs").set(queued as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_and_averages() {
        let mut metrics = MetricsCollector::new();
        metrics.record(RunStatus::Completed, 10, None);
        metrics.record(RunStatus::Completed, 20, None);
        metrics.record(RunStatus::Failed, 30, Some("Execution error: Node 'a' failed"));
        metrics.record(RunStatus::Stopped, 40, Some("Cancellation error: stopped"));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total_runs, 4);
        assert_eq!(snapshot.successful_runs, 2);
        assert_eq!(snapshot.failed_runs, 2);
        assert_eq!(snapshot.stopped_runs, 1);
        assert_eq!(snapshot.total_duration_ms, 100);
        assert_eq!(snapshot.average_duration_ms, 25.0);
        assert_eq!(snapshot.success_rate, 0.5);
        assert_eq!(snapshot.error_types.get("Execution error"), Some(&1));
        assert_eq!(snapshot.error_types.get("Cancellation error"), Some(&1));
    }

    #[test]
    fn empty_snapshot_has_zero_rates() {
        let snapshot = MetricsCollector::new().snapshot();
        assert_eq!(snapshot.total_runs, 0);
        assert_eq!(snapshot.average_duration_ms, 0.0);
        assert_eq!(snapshot.success_rate, 0.0);
    }

    #[test]
    fn error_keys_split_on_first_colon() {
        assert_eq!(error_type_key("Timeout error: Node 'x' exceeded 5ms"), "Timeout error");
        assert_eq!(error_type_key("no delimiter here"), "no delimiter here");
        assert_eq!(error_type_key(": leading"), "Unknown");
        assert_eq!(error_type_key(""), "Unknown");
    }
}
