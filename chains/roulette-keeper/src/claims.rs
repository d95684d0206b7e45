//! Claim reconciliation: find every tracked identity with an unclaimed
//! payout for a round and claim it exactly once.
//!
//! Two phases, both through the bounded runner:
//!
//! 1. eligibility check against the game API (read-only, wide)
//! 2. claim submission, skipping identities whose claim record already exists
//!
//! A pass that hit transient or rate-limit failures returns
//! [`ClaimError::Incomplete`] and the caller runs the whole pass again. Both
//! phases are idempotent for an unchanged `(identity, round)`. Identities
//! whose check failed for good are counted in [`ClaimReport::check_failed`].

use crate::actions::{Action, ActionSubmitter};
use crate::api::{EligibilityApi, PlayerRoundBets};
use crate::error::classify;
use crate::state::RoundSource;
use anyhow::Context;
use core_logic::{BoundedRunner, ErrorKind, failed_endpoint};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// An identity with something to claim for a round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimCandidate {
    pub identity: String,
    pub round: u64,
    pub eligible_payout_total: u128,
    pub already_claimed: bool,
    pub token_mint: String,
}

impl ClaimCandidate {
    /// `None` unless there is a positive, unclaimed payout.
    pub fn from_bets(identity: &str, round: u64, bets: &PlayerRoundBets) -> Option<Self> {
        let total = bets.total_payout();
        if total == 0 || bets.already_claimed {
            return None;
        }
        Some(Self {
            identity: identity.to_string(),
            round,
            eligible_payout_total: total,
            already_claimed: false,
            token_mint: bets.token_mint()?.to_string(),
        })
    }

    pub fn to_action(&self) -> Action {
        Action::ClaimWinnings {
            identity: self.identity.clone(),
            round: self.round,
            token_mint: self.token_mint.clone(),
        }
    }
}

/// An identity whose eligibility check failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckFailure {
    pub identity: String,
    pub kind: ErrorKind,
    pub endpoint: Option<String>,
}

/// Result of the eligibility phase.
#[derive(Debug, Default)]
pub struct EligibilityScan {
    pub checked: usize,
    pub candidates: Vec<ClaimCandidate>,
    pub failures: Vec<CheckFailure>,
}

/// Counts of one complete pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimReport {
    pub round: u64,
    pub checked: usize,
    pub candidates: usize,
    pub claimed: usize,
    pub duplicates: usize,
    /// Claims the program refused; not retried
    pub rejected: usize,
    /// Identities whose check failed with a non-retryable error. Their
    /// winnings, if any, were not claimed.
    pub check_failed: usize,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClaimError {
    #[error("Claims for round {round} incomplete: {failures} retryable failures ({kind})")]
    Incomplete {
        round: u64,
        kind: ErrorKind,
        failures: usize,
        /// Endpoints the retryable failures came from
        endpoints: Vec<String>,
    },
}

impl ClaimError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClaimError::Incomplete { kind, .. } => *kind,
        }
    }

    pub fn endpoints(&self) -> &[String] {
        match self {
            ClaimError::Incomplete { endpoints, .. } => endpoints,
        }
    }
}

/// Rate limiting wins over plain transient when both occurred.
fn worst_kind(kinds: &[ErrorKind]) -> ErrorKind {
    if kinds.contains(&ErrorKind::RateLimited) {
        ErrorKind::RateLimited
    } else {
        ErrorKind::Transient
    }
}

/// Retryable failures of one pass.
#[derive(Debug, Default)]
struct Retryable {
    kinds: Vec<ErrorKind>,
    endpoints: Vec<String>,
}

impl Retryable {
    fn push(&mut self, kind: ErrorKind, endpoint: Option<&str>) {
        self.kinds.push(kind);
        self.note(endpoint.into_iter());
    }

    fn extend(&mut self, other: Retryable) {
        self.kinds.extend(other.kinds);
        self.note(other.endpoints.iter().map(String::as_str));
    }

    fn note<'a>(&mut self, endpoints: impl Iterator<Item = &'a str>) {
        for endpoint in endpoints {
            if !self.endpoints.iter().any(|e| e == endpoint) {
                self.endpoints.push(endpoint.to_string());
            }
        }
    }

    fn into_error(self, round: u64) -> Option<ClaimError> {
        if self.kinds.is_empty() {
            return None;
        }
        Some(ClaimError::Incomplete {
            round,
            kind: worst_kind(&self.kinds),
            failures: self.kinds.len(),
            endpoints: self.endpoints,
        })
    }
}

pub struct ClaimReconciler {
    identities: Vec<String>,
    api: Arc<dyn EligibilityApi>,
    submitter: Arc<dyn ActionSubmitter>,
    check_runner: BoundedRunner,
    submit_runner: BoundedRunner,
}

impl ClaimReconciler {
    pub fn new(
        identities: Vec<String>,
        api: Arc<dyn EligibilityApi>,
        submitter: Arc<dyn ActionSubmitter>,
        check_runner: BoundedRunner,
        submit_runner: BoundedRunner,
    ) -> Self {
        Self {
            identities,
            api,
            submitter,
            check_runner,
            submit_runner,
        }
    }

    pub fn identities(&self) -> &[String] {
        &self.identities
    }

    pub async fn check_eligibility(&self, round: u64) -> EligibilityScan {
        let tasks: Vec<_> = self
            .identities
            .iter()
            .cloned()
            .map(|identity| {
                let api = Arc::clone(&self.api);
                move || async move {
                    let bets = api
                        .player_round_bets(&identity, round)
                        .await
                        .with_context(|| format!("eligibility check for {}", identity))?;
                    anyhow::Ok(ClaimCandidate::from_bets(&identity, round, &bets))
                }
            })
            .collect();

        let report = self.check_runner.run(tasks).await;

        let failures: Vec<CheckFailure> = report
            .failures()
            .map(|(i, e)| {
                warn!(target: "claims", "API error for {}: {:#}", self.identities[i], e);
                CheckFailure {
                    identity: self.identities[i].clone(),
                    kind: classify(e),
                    endpoint: failed_endpoint(e).map(str::to_string),
                }
            })
            .collect();

        EligibilityScan {
            checked: report.len(),
            candidates: report.into_payloads(),
            failures,
        }
    }

    /// Submit one claim per candidate. Existing claim records are skipped.
    async fn submit_claims(&self, round: u64, candidates: &[ClaimCandidate]) -> SubmitPass {
        let tasks: Vec<_> = candidates
            .iter()
            .cloned()
            .map(|candidate| {
                let submitter = Arc::clone(&self.submitter);
                move || async move {
                    if submitter
                        .claim_record_exists(&candidate.identity, round)
                        .await?
                    {
                        warn!(
                            target: "claims",
                            "Claim record for {} round #{} already exists. Skipping.",
                            candidate.identity, round
                        );
                        return anyhow::Ok(None);
                    }

                    let signature = submitter.submit(&candidate.to_action()).await?;
                    info!(
                        target: "claims",
                        "Claim for {} ({} base units) SUCCESS: {}",
                        candidate.identity, candidate.eligible_payout_total, signature
                    );
                    anyhow::Ok(Some(signature))
                }
            })
            .collect();

        let report = self.submit_runner.run(tasks).await;

        let mut pass = SubmitPass {
            claimed: report.succeeded(),
            duplicates: report.skipped(),
            ..SubmitPass::default()
        };
        for (i, e) in report.failures() {
            let kind = classify(e);
            if kind.should_rotate() {
                warn!(target: "claims", "Claim for {} will be retried: {:#}", candidates[i].identity, e);
                pass.retryable.push(kind, failed_endpoint(e));
            } else {
                warn!(target: "claims", "Claim for {} FAILED: {:#}", candidates[i].identity, e);
                pass.rejected += 1;
            }
        }
        pass
    }

    /// One full two-phase pass for `round`.
    pub async fn reconcile(&self, round: u64) -> Result<ClaimReport, ClaimError> {
        info!(
            target: "claims",
            "Round #{}: checking {} identities for winnings",
            round,
            self.identities.len()
        );
        let scan = self.check_eligibility(round).await;

        let mut report = ClaimReport {
            round,
            checked: scan.checked,
            candidates: scan.candidates.len(),
            ..ClaimReport::default()
        };

        let mut retryable = Retryable::default();
        for failure in &scan.failures {
            if failure.kind.should_rotate() {
                retryable.push(failure.kind, failure.endpoint.as_deref());
            } else {
                report.check_failed += 1;
            }
        }
        if report.check_failed > 0 {
            warn!(
                target: "claims",
                "Round #{}: {} identities could not be checked ({}), their winnings stay unclaimed",
                round,
                report.check_failed,
                scan.failures
                    .iter()
                    .filter(|f| !f.kind.should_rotate())
                    .map(|f| f.identity.as_str())
                    .collect::<Vec<_>>()
                    .join(", ")
            );
        }

        if scan.candidates.is_empty() {
            info!(target: "claims", "Round #{}: no winners among tracked identities", round);
        } else {
            info!(
                target: "claims",
                "Round #{}: {} winners, submitting claims",
                round,
                scan.candidates.len()
            );
            let pass = self.submit_claims(round, &scan.candidates).await;
            report.claimed = pass.claimed;
            report.duplicates = pass.duplicates;
            report.rejected = pass.rejected;
            retryable.extend(pass.retryable);
        }

        if let Some(err) = retryable.into_error(round) {
            return Err(err);
        }

        info!(
            target: "claims",
            "Round #{} claims done | Claimed: {} | Duplicates: {} | Rejected: {} | Unchecked: {}",
            round, report.claimed, report.duplicates, report.rejected, report.check_failed
        );
        Ok(report)
    }

    /// Reconcile the last completed round, if it has a winning number.
    pub async fn reconcile_latest(
        &self,
        source: &dyn RoundSource,
    ) -> anyhow::Result<Option<ClaimReport>> {
        let state = source.fetch().await.context("reading round state")?;
        let Some(round) = state.claimable_round() else {
            info!(target: "claims", "No completed round with a winning number yet");
            return Ok(None);
        };
        Ok(Some(self.reconcile(round).await?))
    }
}

#[derive(Debug, Default)]
struct SubmitPass {
    claimed: usize,
    duplicates: usize,
    rejected: usize,
    retryable: Retryable,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::PlacedBet;

    fn bets(amounts: &[u128], claimed: bool) -> PlayerRoundBets {
        PlayerRoundBets {
            bets: amounts
                .iter()
                .map(|a| PlacedBet {
                    payout_amount: *a,
                    token_mint: "OLS".to_string(),
                })
                .collect(),
            already_claimed: claimed,
        }
    }

    #[test]
    fn test_candidate_requires_unclaimed_positive_payout() {
        assert!(ClaimCandidate::from_bets("a", 4, &bets(&[], false)).is_none());
        assert!(ClaimCandidate::from_bets("a", 4, &bets(&[0, 0], false)).is_none());
        assert!(ClaimCandidate::from_bets("a", 4, &bets(&[10], true)).is_none());

        let candidate = ClaimCandidate::from_bets("a", 4, &bets(&[10, 5], false)).unwrap();
        assert_eq!(candidate.eligible_payout_total, 15);
        assert_eq!(candidate.token_mint, "OLS");
        assert!(!candidate.already_claimed);
    }

    #[test]
    fn test_rate_limit_dominates() {
        assert_eq!(
            worst_kind(&[ErrorKind::Transient, ErrorKind::RateLimited]),
            ErrorKind::RateLimited
        );
        assert_eq!(worst_kind(&[ErrorKind::Transient]), ErrorKind::Transient);
    }

    #[test]
    fn test_retryable_endpoints_listed_once() {
        let mut checks = Retryable::default();
        checks.push(ErrorKind::Transient, Some("https://api.example.com"));
        checks.push(ErrorKind::Transient, None);
        let mut submits = Retryable::default();
        submits.push(ErrorKind::RateLimited, Some("https://api.example.com"));
        submits.push(ErrorKind::Transient, Some("https://rpc-a.example.com"));
        checks.extend(submits);

        let err = checks.into_error(3).unwrap();
        assert_eq!(err.kind(), ErrorKind::RateLimited);
        assert_eq!(
            err.endpoints(),
            ["https://api.example.com", "https://rpc-a.example.com"]
        );
        assert!(Retryable::default().into_error(3).is_none());
    }
}
