//! Round lifecycle driver.
//!
//! Each cycle polls the game session, maps the observed status onto a
//! [`Transition`] with [`plan`], performs it and polls again. There is no
//! terminal state. Failures are classified and recovered from inside
//! [`RoundController::cycle`], so the loop only stops when it is cancelled.

use crate::actions::{Action, ActionSubmitter};
use crate::bets::BetDispatcher;
use crate::claims::{ClaimReconciler, ClaimReport};
use crate::client::RpcPool;
use crate::config::Timings;
use crate::error::classify;
use crate::state::{RoundSource, RoundState, RoundStatus};
use anyhow::Context;
use core_logic::{ErrorKind, Notifier, RetryConfig, failed_endpoint, with_retry};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// What one cycle does for the observed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Round is idle or finished: open a new one.
    StartRound,
    /// Bets are open: optionally launch the bot bets, wait, then close.
    Betting {
        round: u64,
        dispatch_bets: bool,
        wait: Duration,
    },
    /// Bets are closed: request the winning number and claim.
    Reveal { round: u64 },
}

/// Count a failure against the active RPC endpoint, only when it is the one
/// that failed. Game API and relay failures leave RPC health alone.
fn blame(pool: &RpcPool, endpoint: Option<&str>) {
    if let Some(endpoint) = endpoint.filter(|e| *e == pool.current_url()) {
        pool.record_failure(endpoint);
    }
}

/// Pure transition function.
///
/// `bets_dispatched_for` is the round whose bets were already launched.
/// A `round_start_time` of zero means the program does not track it and the
/// full betting duration is waited.
pub fn plan(
    state: &RoundState,
    bets_dispatched_for: Option<u64>,
    timings: &Timings,
    now_unix_ms: i64,
) -> Transition {
    match state.status {
        RoundStatus::NotStarted | RoundStatus::Completed => Transition::StartRound,
        RoundStatus::AcceptingBets => {
            let wait = if state.round_start_time == 0 {
                timings.betting_duration()
            } else {
                let deadline = state
                    .round_start_time
                    .saturating_mul(1000)
                    .saturating_add(timings.betting_duration_ms as i64);
                Duration::from_millis(deadline.saturating_sub(now_unix_ms).max(0) as u64)
            };
            Transition::Betting {
                round: state.current_round,
                dispatch_bets: bets_dispatched_for != Some(state.current_round),
                wait,
            }
        }
        RoundStatus::BetsClosed => Transition::Reveal {
            round: state.current_round,
        },
    }
}

pub struct RoundController {
    source: Arc<dyn RoundSource>,
    submitter: Arc<dyn ActionSubmitter>,
    reconciler: Arc<ClaimReconciler>,
    bets: Arc<BetDispatcher>,
    pool: Arc<RpcPool>,
    notifier: Arc<dyn Notifier>,
    timings: Timings,
    reveal: RetryConfig,
    alert_after_failures: u32,
    failures_tx: mpsc::UnboundedSender<String>,
    failures_rx: Option<mpsc::UnboundedReceiver<String>>,
    bets_dispatched_for: Option<u64>,
    consecutive_failures: u32,
}

impl RoundController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        source: Arc<dyn RoundSource>,
        submitter: Arc<dyn ActionSubmitter>,
        reconciler: Arc<ClaimReconciler>,
        bets: Arc<BetDispatcher>,
        pool: Arc<RpcPool>,
        notifier: Arc<dyn Notifier>,
        timings: Timings,
        reveal: RetryConfig,
        alert_after_failures: u32,
    ) -> Self {
        let (failures_tx, failures_rx) = mpsc::unbounded_channel();
        Self {
            source,
            submitter,
            reconciler,
            bets,
            pool,
            notifier,
            timings,
            reveal,
            alert_after_failures: alert_after_failures.max(1),
            failures_tx,
            failures_rx: Some(failures_rx),
            bets_dispatched_for: None,
            consecutive_failures: 0,
        }
    }

    pub fn pool(&self) -> &RpcPool {
        &self.pool
    }

    pub fn bets_dispatched_for(&self) -> Option<u64> {
        self.bets_dispatched_for
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Forward background bet failures to the notifier. Only the first call
    /// gets a handle.
    pub fn spawn_failure_monitor(&mut self) -> Option<JoinHandle<()>> {
        let mut failures = self.failures_rx.take()?;
        let notifier = Arc::clone(&self.notifier);
        Some(tokio::spawn(async move {
            while let Some(message) = failures.recv().await {
                error!(target: "round", "{}", message);
                notifier.notify(&message).await;
            }
        }))
    }

    /// Poll once and perform the planned transition. Errors are not recovered here.
    pub async fn tick(&mut self) -> anyhow::Result<Transition> {
        let state = self
            .source
            .fetch()
            .await
            .context("reading round state")?;

        if self
            .bets_dispatched_for
            .is_some_and(|round| round != state.current_round)
        {
            self.bets_dispatched_for = None;
        }

        let transition = plan(
            &state,
            self.bets_dispatched_for,
            &self.timings,
            chrono::Utc::now().timestamp_millis(),
        );
        info!(
            target: "round",
            "Round #{} is {} | endpoint [{}] {}",
            state.current_round,
            state.status,
            self.pool.active_index(),
            self.pool.current_url()
        );

        match &transition {
            Transition::StartRound => {
                info!(target: "round", "Starting a new round...");
                let signature = self.submit(Action::StartRound).await?;
                info!(target: "round", "start_new_round SUCCESS: {}", signature);
                sleep(self.timings.start_settle()).await;
            }
            Transition::Betting {
                round,
                dispatch_bets,
                wait,
            } => {
                if *dispatch_bets {
                    self.launch_bets(*round);
                    self.bets_dispatched_for = Some(*round);
                }
                info!(
                    target: "round",
                    "Round #{}: accepting bets, closing in {:.1}s",
                    round,
                    wait.as_secs_f64()
                );
                sleep(*wait).await;

                info!(target: "round", "Round #{}: time is up, closing bets...", round);
                let signature = self.submit(Action::CloseBets).await?;
                info!(target: "round", "close_bets SUCCESS: {}", signature);
                sleep(self.timings.close_settle()).await;
            }
            Transition::Reveal { round } => {
                info!(
                    target: "round",
                    "Round #{}: bets closed, waiting {:?} before get_random",
                    round,
                    self.timings.cooldown_after_close()
                );
                sleep(self.timings.cooldown_after_close()).await;

                let signature = self.request_random().await?;
                info!(target: "round", "get_random SUCCESS: {}", signature);

                let report = self.claim_until_done(*round).await;
                info!(
                    target: "round",
                    "Round #{}: {} claims submitted, next round in {:?}",
                    round,
                    report.claimed,
                    self.timings.cooldown_after_random()
                );
                sleep(self.timings.cooldown_after_random()).await;
            }
        }

        Ok(transition)
    }

    /// One tick plus recovery. Returns the failure kind when the tick failed.
    pub async fn cycle(&mut self) -> Result<Transition, ErrorKind> {
        match self.tick().await {
            Ok(transition) => {
                self.consecutive_failures = 0;
                Ok(transition)
            }
            Err(e) => Err(self.recover(&e).await),
        }
    }

    /// Drive cycles until `shutdown` fires. A cycle in progress is abandoned.
    pub async fn run(mut self, shutdown: CancellationToken) {
        let monitor = self.spawn_failure_monitor();
        info!(
            target: "round",
            "Round keeper started | {} endpoints | active {}",
            self.pool.len(),
            self.pool.current_url()
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!(target: "round", "Round keeper stopping (cancelled).");
                    break;
                }
                _ = self.cycle() => {}
            }
        }

        if let Some(monitor) = monitor {
            monitor.abort();
        }
    }

    async fn submit(&self, action: Action) -> anyhow::Result<String> {
        let tag = action.tag();
        self.submitter
            .submit(&action)
            .await
            .with_context(|| format!("submitting {}", tag))
    }

    /// Bounded retry of get_random. Rotates before the next attempt on transient kinds.
    async fn request_random(&self) -> anyhow::Result<String> {
        with_retry(&self.reveal, "get_random", || {
            let submitter = Arc::clone(&self.submitter);
            let pool = Arc::clone(&self.pool);
            async move {
                match submitter.submit(&Action::RequestRandom).await {
                    Ok(signature) => Ok(signature),
                    Err(e) => {
                        if e.kind().should_rotate() {
                            blame(&pool, e.endpoint());
                            pool.rotate().await;
                        }
                        Err(anyhow::Error::new(e))
                    }
                }
            }
        })
        .await
    }

    /// Reconcile `round` until a pass completes. Alerts every
    /// `alert_after_failures` incomplete passes, and once when a completed
    /// pass left identities unchecked.
    async fn claim_until_done(&self, round: u64) -> ClaimReport {
        let mut passes = 0u32;
        loop {
            let err = match self.reconciler.reconcile(round).await {
                Ok(report) => {
                    if report.check_failed > 0 {
                        self.notifier
                            .notify(&format!(
                                "Round #{}: {} identities could not be checked for winnings and were not claimed",
                                round, report.check_failed
                            ))
                            .await;
                    }
                    return report;
                }
                Err(e) => e,
            };

            passes += 1;
            warn!(
                target: "round",
                "Round #{}: {} (pass {}). Retrying in {:?}",
                round,
                err,
                passes,
                self.timings.claim_retry_delay()
            );

            if err.kind().should_rotate() {
                for endpoint in err.endpoints() {
                    blame(&self.pool, Some(endpoint.as_str()));
                }
                self.pool.rotate().await;
            }
            if passes % self.alert_after_failures == 0 {
                self.notifier
                    .notify(&format!(
                        "Claims for round #{} still incomplete after {} passes: {}",
                        round, passes, err
                    ))
                    .await;
            }

            sleep(self.timings.claim_retry_delay()).await;
        }
    }

    /// Launch the bet batch in the background. Failures and panics go down
    /// the failure channel.
    fn launch_bets(&self, round: u64) {
        let bets = Arc::clone(&self.bets);
        let failures = self.failures_tx.clone();
        info!(target: "round", "Round #{}: launching bot bets in the background", round);

        tokio::spawn(async move {
            let message = match AssertUnwindSafe(bets.dispatch(round)).catch_unwind().await {
                Ok(Ok(summary)) => {
                    info!(
                        target: "round",
                        "Round #{} bets done | Placed: {} | Failed: {} | Planned: {}",
                        round, summary.placed, summary.failed, summary.planned
                    );
                    return;
                }
                Ok(Err(e)) => format!("Bet batch for round #{} failed: {:#}", round, e),
                Err(_) => format!("Bet batch for round #{} panicked", round),
            };
            // Receiver gone means the controller is shutting down.
            let _ = failures.send(message);
        });
    }

    async fn recover(&mut self, err: &anyhow::Error) -> ErrorKind {
        let kind = classify(err);
        self.consecutive_failures += 1;
        error!(
            target: "round",
            "Cycle FAILED ({}, {} in a row): {:#}",
            kind,
            self.consecutive_failures,
            err
        );

        match kind {
            ErrorKind::Transient | ErrorKind::RateLimited => {
                blame(&self.pool, failed_endpoint(err));
                self.pool.rotate().await;
                sleep(self.timings.rate_limit_pause()).await;
                if self.consecutive_failures % self.alert_after_failures == 0 {
                    self.notifier
                        .notify(&format!(
                            "{} consecutive failed cycles. Last error: {:#}",
                            self.consecutive_failures, err
                        ))
                        .await;
                }
            }
            ErrorKind::NotFound => {
                sleep(self.timings.error_backoff()).await;
            }
            ErrorKind::Fatal => {
                self.notifier.notify(&format!("{:#}", err)).await;
                sleep(self.timings.error_backoff()).await;
            }
        }

        kind
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::rpc_pool;
    use core_logic::EndpointConfig;

    fn state(status: RoundStatus, round: u64, start: i64) -> RoundState {
        let mut state = RoundState::new(status, round);
        state.round_start_time = start;
        state
    }

    #[test]
    fn test_idle_and_completed_start_a_round() {
        let timings = Timings::default();
        for status in [RoundStatus::NotStarted, RoundStatus::Completed] {
            assert_eq!(
                plan(&state(status, 3, 0), None, &timings, 0),
                Transition::StartRound
            );
        }
    }

    #[test]
    fn test_betting_wait_uses_start_time() {
        let timings = Timings::default();
        let now = 1_700_000_020_000;
        let transition = plan(
            &state(RoundStatus::AcceptingBets, 8, 1_700_000_000),
            None,
            &timings,
            now,
        );
        assert_eq!(
            transition,
            Transition::Betting {
                round: 8,
                dispatch_bets: true,
                wait: Duration::from_secs(40),
            }
        );
    }

    #[test]
    fn test_betting_wait_never_negative() {
        let transition = plan(
            &state(RoundStatus::AcceptingBets, 8, 1_700_000_000),
            Some(8),
            &Timings::default(),
            1_800_000_000_000,
        );
        assert_eq!(
            transition,
            Transition::Betting {
                round: 8,
                dispatch_bets: false,
                wait: Duration::ZERO,
            }
        );
    }

    #[test]
    fn test_untracked_start_time_waits_full_duration() {
        let timings = Timings::default();
        let transition = plan(
            &state(RoundStatus::AcceptingBets, 9, 0),
            Some(8),
            &timings,
            1_700_000_000_000,
        );
        assert_eq!(
            transition,
            Transition::Betting {
                round: 9,
                dispatch_bets: true,
                wait: timings.betting_duration(),
            }
        );
    }

    #[test]
    fn test_bets_closed_reveals_current_round() {
        assert_eq!(
            plan(
                &state(RoundStatus::BetsClosed, 12, 0),
                Some(12),
                &Timings::default(),
                0
            ),
            Transition::Reveal { round: 12 }
        );
    }

    #[test]
    fn test_blame_only_charges_the_active_endpoint() {
        let config = EndpointConfig {
            urls: vec![
                "https://rpc-a.example.com".to_string(),
                "https://rpc-b.example.com".to_string(),
            ],
            settle_delay_ms: 0,
        };
        let pool = rpc_pool(&config, reqwest::Client::new(), Duration::from_secs(5)).unwrap();

        blame(&pool, None);
        blame(&pool, Some("https://relay.example.com"));
        blame(&pool, Some("https://rpc-b.example.com"));
        assert!(pool.health_status().iter().all(|h| h.failure_count == 0));

        blame(&pool, Some("https://rpc-a.example.com"));
        assert_eq!(pool.health_status()[0].failure_count, 1);
        assert_eq!(pool.health_status()[1].failure_count, 0);
    }
}
