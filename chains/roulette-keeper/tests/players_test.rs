use async_trait::async_trait;
use core_logic::BoundedRunner;
use roulette_keeper::actions::{Action, ActionError, ActionSubmitter};
use roulette_keeper::players::{InitSummary, PlayerInitializer};
use roulette_keeper::state::{RoundSource, RoundState, RoundStatus, StateError};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Player accounts appear once an InitPlayer lands.
#[derive(Default)]
struct StubSubmitter {
    accounts: Mutex<HashSet<String>>,
    rejecting: HashSet<String>,
    submitted: Mutex<Vec<Action>>,
    lookups: AtomicUsize,
}

impl StubSubmitter {
    fn with_accounts(existing: &[&str]) -> Self {
        Self {
            accounts: Mutex::new(existing.iter().map(|s| s.to_string()).collect()),
            ..Self::default()
        }
    }

    fn submitted(&self) -> Vec<Action> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionSubmitter for StubSubmitter {
    async fn submit(&self, action: &Action) -> Result<String, ActionError> {
        let Action::InitPlayer { identity } = action else {
            panic!("unexpected action {:?}", action);
        };
        if self.rejecting.contains(identity) {
            return Err(ActionError::Rejected {
                tag: action.tag(),
                reason: "insufficient lamports".to_string(),
                logs: vec!["Program log: Error: insufficient lamports".to_string()],
            });
        }
        self.submitted.lock().unwrap().push(action.clone());
        self.accounts.lock().unwrap().insert(identity.clone());
        Ok(format!("sig-init-{}", identity))
    }

    async fn claim_record_exists(&self, _identity: &str, _round: u64) -> Result<bool, ActionError> {
        Ok(false)
    }

    async fn player_account_exists(&self, identity: &str) -> Result<bool, ActionError> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        Ok(self.accounts.lock().unwrap().contains(identity))
    }
}

struct Session(Option<RoundState>);

#[async_trait]
impl RoundSource for Session {
    async fn fetch(&self) -> Result<RoundState, StateError> {
        self.0.clone().ok_or_else(|| StateError::Unavailable {
            address: "GameSession".to_string(),
        })
    }
}

fn live_session() -> Session {
    Session(Some(RoundState::new(RoundStatus::NotStarted, 0)))
}

fn initializer(identities: &[&str], submitter: Arc<StubSubmitter>) -> PlayerInitializer {
    PlayerInitializer::new(
        identities.iter().map(|s| s.to_string()).collect(),
        submitter,
        BoundedRunner::new("init-players", 2, Duration::from_millis(200)),
    )
}

#[tokio::test(start_paused = true)]
async fn test_existing_accounts_are_skipped() {
    let submitter = Arc::new(StubSubmitter::with_accounts(&["bot-b"]));
    let players = initializer(&["bot-a", "bot-b", "bot-c"], Arc::clone(&submitter));

    let summary = players.run(&live_session()).await.unwrap();

    assert_eq!(
        summary,
        InitSummary {
            total: 3,
            initialized: 2,
            skipped: 1,
            failed: 0,
        }
    );
    assert_eq!(
        submitter.submitted(),
        vec![
            Action::InitPlayer {
                identity: "bot-a".to_string()
            },
            Action::InitPlayer {
                identity: "bot-c".to_string()
            },
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn test_second_pass_submits_nothing() {
    let submitter = Arc::new(StubSubmitter::default());
    let players = initializer(&["bot-a", "bot-b"], Arc::clone(&submitter));

    players.run(&live_session()).await.unwrap();
    let again = players.run(&live_session()).await.unwrap();

    assert_eq!(again.initialized, 0);
    assert_eq!(again.skipped, 2);
    assert_eq!(submitter.submitted().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_rejected_player_is_counted_and_others_continue() {
    let submitter = Arc::new(StubSubmitter {
        rejecting: HashSet::from(["bot-b".to_string()]),
        ..StubSubmitter::default()
    });
    let players = initializer(&["bot-a", "bot-b", "bot-c"], Arc::clone(&submitter));

    let summary = players.run(&live_session()).await.unwrap();

    assert_eq!(summary.initialized, 2);
    assert_eq!(summary.failed, 1);
}

#[tokio::test(start_paused = true)]
async fn test_missing_game_session_stops_before_any_lookup() {
    let submitter = Arc::new(StubSubmitter::default());
    let players = initializer(&["bot-a"], Arc::clone(&submitter));

    let err = players.run(&Session(None)).await.unwrap_err();

    assert!(matches!(
        err.downcast_ref::<StateError>(),
        Some(StateError::Unavailable { .. })
    ));
    assert_eq!(submitter.lookups.load(Ordering::SeqCst), 0);
    assert!(submitter.submitted().is_empty());
}
