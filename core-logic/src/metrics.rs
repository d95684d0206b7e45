use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Serialize)]
pub struct BatchSnapshot {
    pub timestamp: String,
    pub name: String,
    pub total: u64,
    pub completed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub success_rate: f64,
    pub elapsed_ms: u64,
}

/// Running counters for one bulk operation.
///
/// Shared (`Arc`) between the runner and whoever wants to watch the batch.
#[derive(Debug)]
pub struct BatchMetrics {
    name: String,
    total: AtomicU64,
    completed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    task_duration_sum_ms: AtomicU64,
    task_max_duration_ms: AtomicU64,
    start_time: Instant,
}

impl BatchMetrics {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            total: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
            task_duration_sum_ms: AtomicU64::new(0),
            task_max_duration_ms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn add_total(&self, n: u64) {
        self.total.fetch_add(n, Ordering::SeqCst);
    }

    pub fn record_success(&self, duration: Duration) {
        self.record_duration(duration);
        self.succeeded.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self, duration: Duration) {
        self.record_duration(duration);
        self.failed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_skipped(&self, duration: Duration) {
        self.record_duration(duration);
        self.skipped.fetch_add(1, Ordering::SeqCst);
    }

    fn record_duration(&self, duration: Duration) {
        let duration_ms = duration.as_millis() as u64;
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.task_duration_sum_ms
            .fetch_add(duration_ms, Ordering::SeqCst);
        self.task_max_duration_ms
            .fetch_max(duration_ms, Ordering::SeqCst);
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::SeqCst)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::SeqCst)
    }

    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::SeqCst)
    }

    pub fn avg_task_duration_ms(&self) -> f64 {
        let completed = self.completed();
        if completed == 0 {
            return 0.0;
        }
        self.task_duration_sum_ms.load(Ordering::SeqCst) as f64 / completed as f64
    }

    pub fn max_task_duration_ms(&self) -> u64 {
        self.task_max_duration_ms.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> BatchSnapshot {
        let completed = self.completed();
        let succeeded = self.succeeded();

        BatchSnapshot {
            timestamp: Utc::now().to_rfc3339(),
            name: self.name.clone(),
            total: self.total(),
            completed,
            succeeded,
            failed: self.failed(),
            skipped: self.skipped(),
            success_rate: if completed > 0 {
                succeeded as f64 / completed as f64 * 100.0
            } else {
                0.0
            },
            elapsed_ms: self.start_time.elapsed().as_millis() as u64,
        }
    }

    pub fn to_compact_json(&self) -> String {
        serde_json::to_string(&self.snapshot()).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_metrics_counts() {
        let metrics = BatchMetrics::new("bets");
        metrics.add_total(4);

        metrics.record_success(Duration::from_millis(100));
        metrics.record_success(Duration::from_millis(300));
        metrics.record_failure(Duration::from_millis(200));
        metrics.record_skipped(Duration::from_millis(0));

        assert_eq!(metrics.completed(), 4);
        assert_eq!(metrics.succeeded(), 2);
        assert_eq!(metrics.failed(), 1);
        assert_eq!(metrics.skipped(), 1);
        assert_eq!(metrics.max_task_duration_ms(), 300);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.total, 4);
        assert!((snapshot.success_rate - 50.0).abs() < 0.01);
    }

    #[test]
    fn test_json_export() {
        let metrics = BatchMetrics::new("claims");
        metrics.record_success(Duration::from_millis(10));

        let json = metrics.to_compact_json();
        assert!(json.contains("\"name\":\"claims\""));
        assert!(json.contains("succeeded"));
    }
}
