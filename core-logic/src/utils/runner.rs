//! # Core Logic - Bounded Task Runner
//!
//! Runs a batch of independent async tasks under a concurrency ceiling and a
//! minimum launch spacing, and returns every outcome in input order.
//!
//! Tasks are interleaved on the calling task rather than spawned: while the
//! runner waits for the pacer or for a free slot it keeps polling the tasks
//! already in flight. A task failure (or panic) is recorded as
//! [`TaskOutcome::Failure`] and never stops the batch. There is no retry, no
//! per-task timeout and no cancellation here; those belong to the task body.

use crate::config::BatchConfig;
use crate::metrics::BatchMetrics;
use crate::utils::pacer::Pacer;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, Instrument};

/// Tagged result of one task.
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Success(T),
    Failure(anyhow::Error),
    Skipped,
}

impl<T> TaskOutcome<T> {
    fn from_result(result: anyhow::Result<Option<T>>) -> Self {
        match result {
            Ok(Some(value)) => TaskOutcome::Success(value),
            Ok(None) => TaskOutcome::Skipped,
            Err(e) => TaskOutcome::Failure(e),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TaskOutcome::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, TaskOutcome::Failure(_))
    }

    pub fn is_skipped(&self) -> bool {
        matches!(self, TaskOutcome::Skipped)
    }

    pub fn payload(&self) -> Option<&T> {
        match self {
            TaskOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&anyhow::Error> {
        match self {
            TaskOutcome::Failure(e) => Some(e),
            _ => None,
        }
    }
}

/// All outcomes of a batch, in the order the tasks were given.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub outcomes: Vec<TaskOutcome<T>>,
    pub elapsed: Duration,
}

impl<T> BatchReport<T> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    pub fn skipped(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_skipped()).count()
    }

    /// Failures with the index of the task that produced them.
    pub fn failures(&self) -> impl Iterator<Item = (usize, &anyhow::Error)> {
        self.outcomes
            .iter()
            .enumerate()
            .filter_map(|(i, o)| o.error().map(|e| (i, e)))
    }

    pub fn into_payloads(self) -> Vec<T> {
        self.outcomes
            .into_iter()
            .filter_map(|o| match o {
                TaskOutcome::Success(value) => Some(value),
                _ => None,
            })
            .collect()
    }
}

/// Concurrency-capped, paced batch executor.
#[derive(Debug, Clone)]
pub struct BoundedRunner {
    name: String,
    concurrency_limit: usize,
    pace_delay: Duration,
    metrics: Option<Arc<BatchMetrics>>,
    progress_every: usize,
}

impl BoundedRunner {
    /// A limit of zero is treated as one.
    pub fn new(name: &str, concurrency_limit: usize, pace_delay: Duration) -> Self {
        Self {
            name: name.to_string(),
            concurrency_limit: concurrency_limit.max(1),
            pace_delay,
            metrics: None,
            progress_every: 100,
        }
    }

    pub fn from_config(name: &str, config: &BatchConfig) -> Self {
        Self::new(name, config.concurrency_limit, config.pace_delay())
    }

    /// Report running counters into `metrics`.
    pub fn with_metrics(mut self, metrics: Arc<BatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Log a progress line every `n` settled tasks.
    pub fn with_progress_every(mut self, n: usize) -> Self {
        self.progress_every = n.max(1);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn concurrency_limit(&self) -> usize {
        self.concurrency_limit
    }

    pub fn pace_delay(&self) -> Duration {
        self.pace_delay
    }

    /// Execute every task and collect the outcomes in input order.
    ///
    /// A task returns `Ok(Some(v))` for success, `Ok(None)` when it had
    /// nothing to do, and `Err` for failure.
    pub async fn run<T, F, Fut>(&self, tasks: Vec<F>) -> BatchReport<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<Option<T>>>,
    {
        let total = tasks.len();
        let started = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.add_total(total as u64);
        }

        // With C >= N the gate can never close, pacing alone decides.
        let gated = self.concurrency_limit < total;
        let mut slots: Vec<Option<TaskOutcome<T>>> = Vec::with_capacity(total);
        slots.resize_with(total, || None);

        let mut in_flight = FuturesUnordered::new();
        let mut pacer = Pacer::new(self.pace_delay);
        let mut settled = 0usize;

        debug!(
            "[{}] launching {} tasks (limit {}, pace {:?})",
            self.name, total, self.concurrency_limit, self.pace_delay
        );

        for (index, task) in tasks.into_iter().enumerate() {
            if gated {
                while in_flight.len() >= self.concurrency_limit {
                    if let Some((i, outcome, took)) = in_flight.next().await {
                        self.settle(&mut slots, i, outcome, took, &mut settled);
                    }
                }
            }

            if !pacer.is_ready() {
                let ready_at = pacer.ready_at();
                loop {
                    tokio::select! {
                        _ = sleep_until(ready_at) => break,
                        Some((i, outcome, took)) = in_flight.next(), if !in_flight.is_empty() => {
                            self.settle(&mut slots, i, outcome, took, &mut settled);
                        }
                    }
                }
            }

            pacer.mark_launch();
            let span = tracing::debug_span!("task", batch = %self.name, index);
            in_flight.push(launch(index, task).instrument(span));
        }

        while let Some((i, outcome, took)) = in_flight.next().await {
            self.settle(&mut slots, i, outcome, took, &mut settled);
        }

        let outcomes: Vec<TaskOutcome<T>> = slots.into_iter().flatten().collect();
        debug_assert_eq!(outcomes.len(), total);

        let report = BatchReport {
            outcomes,
            elapsed: started.elapsed(),
        };

        info!(
            target: "batch",
            "[{}] batch done in {:.1}s | Success: {} | Failed: {} | Skipped: {}",
            self.name,
            report.elapsed.as_secs_f64(),
            report.succeeded(),
            report.failed(),
            report.skipped()
        );

        report
    }

    fn settle<T>(
        &self,
        slots: &mut [Option<TaskOutcome<T>>],
        index: usize,
        outcome: TaskOutcome<T>,
        took: Duration,
        settled: &mut usize,
    ) {
        if let Some(metrics) = &self.metrics {
            match &outcome {
                TaskOutcome::Success(_) => metrics.record_success(took),
                TaskOutcome::Failure(_) => metrics.record_failure(took),
                TaskOutcome::Skipped => metrics.record_skipped(took),
            }
        }

        if let TaskOutcome::Failure(e) = &outcome {
            debug!("[{}] task {} failed: {:#}", self.name, index, e);
        }

        slots[index] = Some(outcome);
        *settled += 1;

        if *settled % self.progress_every == 0 || *settled == slots.len() {
            debug!("[{}] progress: {}/{}", self.name, settled, slots.len());
        }
    }
}

/// Start a task (on first poll) and capture its outcome, including panics.
async fn launch<T, F, Fut>(index: usize, task: F) -> (usize, TaskOutcome<T>, Duration)
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = anyhow::Result<Option<T>>>,
{
    let started = Instant::now();
    let outcome = match AssertUnwindSafe(async move { task().await })
        .catch_unwind()
        .await
    {
        Ok(result) => TaskOutcome::from_result(result),
        Err(panic) => {
            let reason = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            TaskOutcome::Failure(anyhow::anyhow!("task panicked: {}", reason))
        }
    };
    (index, outcome, started.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_batch() {
        let runner = BoundedRunner::new("empty", 4, Duration::ZERO);
        let tasks: Vec<fn() -> std::future::Ready<anyhow::Result<Option<u8>>>> = Vec::new();
        let report = runner.run(tasks).await;
        assert!(report.is_empty());
    }

    fn scripted(kind: u8) -> futures::future::BoxFuture<'static, anyhow::Result<Option<u32>>> {
        async move {
            match kind {
                0 => Ok(Some(1)),
                1 => panic!("boom"),
                _ => Ok(None),
            }
        }
        .boxed()
    }

    #[tokio::test]
    async fn test_panic_is_captured_as_failure() {
        let runner = BoundedRunner::new("panics", 2, Duration::ZERO);
        let tasks: Vec<_> = (0..3u8).map(|kind| move || scripted(kind)).collect();

        let report = runner.run(tasks).await;
        assert_eq!(report.len(), 3);
        assert!(report.outcomes[0].is_success());
        assert!(report.outcomes[1].is_failure());
        assert!(report.outcomes[2].is_skipped());
        let msg = format!("{}", report.outcomes[1].error().unwrap());
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_zero_limit_is_clamped() {
        let runner = BoundedRunner::new("clamp", 0, Duration::ZERO);
        assert_eq!(runner.concurrency_limit(), 1);
    }
}
