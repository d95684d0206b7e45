//! Player-account initialization for the bot identities.
//!
//! Every identity needs its player-bets account before its first bet. The
//! pass is idempotent: identities whose account already exists are skipped.

use crate::actions::{Action, ActionSubmitter};
use crate::state::RoundSource;
use anyhow::Context;
use core_logic::BoundedRunner;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitSummary {
    pub total: usize,
    pub initialized: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct PlayerInitializer {
    identities: Vec<String>,
    submitter: Arc<dyn ActionSubmitter>,
    runner: BoundedRunner,
}

impl PlayerInitializer {
    pub fn new(
        identities: Vec<String>,
        submitter: Arc<dyn ActionSubmitter>,
        runner: BoundedRunner,
    ) -> Self {
        Self {
            identities,
            submitter,
            runner,
        }
    }

    /// Initialize every identity that has no player-bets account yet.
    ///
    /// Fails before submitting anything when the game session cannot be read.
    pub async fn run(&self, source: &dyn RoundSource) -> anyhow::Result<InitSummary> {
        source
            .fetch()
            .await
            .context("game session must exist before players are initialized")?;

        info!(
            "Initializing {} players (limit {}, pace {:?})",
            self.identities.len(),
            self.runner.concurrency_limit(),
            self.runner.pace_delay()
        );

        let tasks: Vec<_> = self
            .identities
            .iter()
            .cloned()
            .map(|identity| {
                let submitter = Arc::clone(&self.submitter);
                move || async move {
                    if submitter.player_account_exists(&identity).await? {
                        info!("Player account for {} already exists. Skipping.", identity);
                        return anyhow::Ok(None);
                    }

                    let action = Action::InitPlayer {
                        identity: identity.clone(),
                    };
                    match submitter.submit(&action).await {
                        Ok(signature) => {
                            info!("Player {} initialized SUCCESS: {}", identity, signature);
                            Ok(Some(signature))
                        }
                        Err(e) => {
                            error!("Player {} initialization FAILED: {}", identity, e);
                            for line in e.logs() {
                                error!("  program log: {}", line);
                            }
                            Err(anyhow::Error::new(e))
                        }
                    }
                }
            })
            .collect();

        let report = self.runner.run(tasks).await;
        let summary = InitSummary {
            total: report.len(),
            initialized: report.succeeded(),
            skipped: report.skipped(),
            failed: report.failed(),
        };
        info!(
            "Players done | Initialized: {} | Skipped: {} | Failed: {}",
            summary.initialized, summary.skipped, summary.failed
        );
        Ok(summary)
    }
}
