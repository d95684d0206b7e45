//! Builds every component from a [`KeeperConfig`].

use crate::actions::{ActionSubmitter, RelaySubmitter};
use crate::api::{EligibilityApi, HttpEligibilityApi};
use crate::bets::{BetDispatcher, LoadedGroup};
use crate::bot::notifier_from_config;
use crate::claims::ClaimReconciler;
use crate::client::{RpcPool, rpc_pool};
use crate::config::{KeeperConfig, load_identities};
use crate::controller::RoundController;
use crate::players::PlayerInitializer;
use crate::state::{RoundSource, RpcRoundSource};
use anyhow::{Context, Result};
use core_logic::{BatchMetrics, BoundedRunner, Notifier};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Shared components of one keeper process.
pub struct Keeper {
    pub config: KeeperConfig,
    pub pool: Arc<RpcPool>,
    pub source: Arc<dyn RoundSource>,
    pub submitter: Arc<dyn ActionSubmitter>,
    pub reconciler: Arc<ClaimReconciler>,
    pub bets: Arc<BetDispatcher>,
    pub players: PlayerInitializer,
    pub notifier: Arc<dyn Notifier>,
    pub bet_metrics: Arc<BatchMetrics>,
}

/// Read every group's identity file.
pub fn load_groups(config: &KeeperConfig) -> Result<Vec<LoadedGroup>> {
    config
        .groups
        .iter()
        .map(|group| {
            let path = config.identities_path(group);
            let identities = load_identities(&path)
                .with_context(|| format!("loading identities for group {}", group.name))?;
            info!("Group {}: {} identities", group.name, identities.len());
            Ok(LoadedGroup {
                group: group.clone(),
                identities,
            })
        })
        .collect()
}

/// Every identity across groups, first occurrence wins.
pub fn tracked_identities(groups: &[LoadedGroup]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut identities = Vec::new();
    for identity in groups.iter().flat_map(|loaded| &loaded.identities) {
        if seen.insert(identity.as_str()) {
            identities.push(identity.clone());
        }
    }
    identities
}

impl Keeper {
    pub fn build(config: KeeperConfig) -> Result<Self> {
        let timeout = config.request_timeout();
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        let pool = Arc::new(rpc_pool(&config.endpoints, http.clone(), timeout)?);
        let groups = load_groups(&config)?;
        let identities = tracked_identities(&groups);

        let source: Arc<dyn RoundSource> = Arc::new(RpcRoundSource::new(
            Arc::clone(&pool),
            &config.game_session_address,
        ));
        let submitter: Arc<dyn ActionSubmitter> = Arc::new(RelaySubmitter::new(
            http.clone(),
            &config.relay_url,
            Arc::clone(&pool),
            identities.clone(),
            config.confirm.clone(),
            timeout,
        ));
        let api: Arc<dyn EligibilityApi> = Arc::new(HttpEligibilityApi::new(
            http.clone(),
            &config.api_base_url,
            timeout,
        ));

        let players = PlayerInitializer::new(
            identities.clone(),
            Arc::clone(&submitter),
            BoundedRunner::from_config("init-players", &config.init_players)
                .with_progress_every(50),
        );

        let reconciler = Arc::new(ClaimReconciler::new(
            identities,
            api,
            Arc::clone(&submitter),
            BoundedRunner::from_config("claims-check", &config.claims.check)
                .with_progress_every(50),
            BoundedRunner::from_config("claims-submit", &config.claims.submit),
        ));

        let bet_metrics = Arc::new(BatchMetrics::new("bets"));
        let bets = Arc::new(BetDispatcher::new(
            groups,
            Arc::clone(&submitter),
            BoundedRunner::from_config("bets", &config.betting)
                .with_metrics(Arc::clone(&bet_metrics)),
        ));

        let notifier = notifier_from_config(http, config.slack_webhook_url.as_deref());

        Ok(Self {
            config,
            pool,
            source,
            submitter,
            reconciler,
            bets,
            players,
            notifier,
            bet_metrics,
        })
    }

    pub fn controller(&self) -> RoundController {
        RoundController::new(
            Arc::clone(&self.source),
            Arc::clone(&self.submitter),
            Arc::clone(&self.reconciler),
            Arc::clone(&self.bets),
            Arc::clone(&self.pool),
            Arc::clone(&self.notifier),
            self.config.timings.clone(),
            self.config.reveal.clone(),
            self.config.alert_after_failures,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenGroup;

    fn loaded(name: &str, identities: &[&str]) -> LoadedGroup {
        LoadedGroup {
            group: TokenGroup {
                name: name.to_string(),
                mint: format!("{}-mint", name),
                decimals: 9,
                identities: String::new(),
                amounts: vec![[1, 2]],
            },
            identities: identities.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_identities_deduplicated_in_order() {
        let groups = vec![loaded("GRN", &["a", "b"]), loaded("USDC", &["b", "c"])];
        assert_eq!(tracked_identities(&groups), vec!["a", "b", "c"]);
    }
}
