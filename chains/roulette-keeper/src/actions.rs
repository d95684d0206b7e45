//! On-chain actions and their submission through the signing relay.
//!
//! The keeper never holds keys. It sends the relay an action tag, the signer
//! identity and a little-endian payload, then confirms the returned signature
//! itself on the active RPC session.

use crate::bets::BetType;
use crate::client::{RpcPool, network_error};
use crate::config::ConfirmConfig;
use async_trait::async_trait;
use core_logic::{ErrorKind, NetworkError};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// One instruction the keeper can ask the relay to sign and send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    StartRound,
    CloseBets,
    RequestRandom,
    /// Create the identity's player-bets account, needed before its first bet.
    InitPlayer {
        identity: String,
    },
    PlaceBet {
        identity: String,
        token_mint: String,
        amount: u64,
        bet_type: BetType,
        numbers: [u8; 4],
    },
    ClaimWinnings {
        identity: String,
        round: u64,
        token_mint: String,
    },
}

impl Action {
    pub fn tag(&self) -> &'static str {
        match self {
            Action::StartRound => "start_new_round",
            Action::CloseBets => "close_bets",
            Action::RequestRandom => "get_random",
            Action::InitPlayer { .. } => "initialize_player_bets",
            Action::PlaceBet { .. } => "place_bet",
            Action::ClaimWinnings { .. } => "claim_my_winnings",
        }
    }

    /// Instruction arguments, little-endian.
    pub fn payload(&self) -> Vec<u8> {
        match self {
            Action::StartRound
            | Action::CloseBets
            | Action::RequestRandom
            | Action::InitPlayer { .. } => Vec::new(),
            Action::PlaceBet {
                amount,
                bet_type,
                numbers,
                ..
            } => {
                let mut buf = Vec::with_capacity(13);
                buf.extend_from_slice(&amount.to_le_bytes());
                buf.push(bet_type.code());
                buf.extend_from_slice(numbers);
                buf
            }
            Action::ClaimWinnings { round, .. } => round.to_le_bytes().to_vec(),
        }
    }

    /// Identity that must sign, `None` for lifecycle actions any operator may send.
    pub fn signer(&self) -> Option<&str> {
        match self {
            Action::InitPlayer { identity }
            | Action::PlaceBet { identity, .. }
            | Action::ClaimWinnings { identity, .. } => Some(identity.as_str()),
            _ => None,
        }
    }

    pub fn token_mint(&self) -> Option<&str> {
        match self {
            Action::PlaceBet { token_mint, .. } | Action::ClaimWinnings { token_mint, .. } => {
                Some(token_mint.as_str())
            }
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum ActionError {
    #[error("{tag} rejected by program: {reason}")]
    Rejected {
        tag: &'static str,
        reason: String,
        logs: Vec<String>,
    },

    #[error("{tag} not confirmed after {polls} status polls (signature {signature})")]
    Unconfirmed {
        tag: &'static str,
        signature: String,
        polls: u32,
    },

    #[error("Relay refused {tag}: {reason}")]
    Relay { tag: &'static str, reason: String },

    #[error("No operator identity available to sign {tag}")]
    NoOperator { tag: &'static str },

    #[error("Action transport failed: {0}")]
    Network(#[from] NetworkError),
}

impl ActionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::Unconfirmed { .. } => ErrorKind::Transient,
            ActionError::Network(e) => e.kind(),
            ActionError::Rejected { .. }
            | ActionError::Relay { .. }
            | ActionError::NoOperator { .. } => ErrorKind::Fatal,
        }
    }

    /// Endpoint of a transport failure.
    pub fn endpoint(&self) -> Option<&str> {
        match self {
            ActionError::Network(e) => Some(e.endpoint()),
            _ => None,
        }
    }

    /// Program log lines attached to a rejection.
    pub fn logs(&self) -> &[String] {
        match self {
            ActionError::Rejected { logs, .. } => logs,
            _ => &[],
        }
    }
}

/// Sends actions and answers account-existence lookups.
#[async_trait]
pub trait ActionSubmitter: Send + Sync {
    /// Submit and confirm one action. Returns the transaction signature.
    async fn submit(&self, action: &Action) -> Result<String, ActionError>;

    /// Whether the claim record for `(identity, round)` already exists on chain.
    async fn claim_record_exists(&self, identity: &str, round: u64) -> Result<bool, ActionError>;

    /// Whether the identity's player-bets account already exists on chain.
    async fn player_account_exists(&self, identity: &str) -> Result<bool, ActionError>;
}

#[derive(Debug, Serialize)]
struct SubmitRequest<'a> {
    action: &'a str,
    signer: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    token_mint: Option<&'a str>,
    payload: String,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    #[serde(default)]
    signature: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    logs: Vec<String>,
}

/// Address the relay derived for a program account.
#[derive(Debug, Deserialize)]
struct DerivedAddress {
    address: String,
}

/// Interpret the relay's answer to `/submit`.
///
/// A success status with an unreadable body is an invalid response. Any other
/// status with an unreadable body is a relay refusal quoting the body.
fn parse_submit_response(
    tag: &'static str,
    status: u16,
    body: &[u8],
    endpoint: &str,
) -> Result<String, ActionError> {
    let success = (200..300).contains(&status);
    let parsed: SubmitResponse = match serde_json::from_slice(body) {
        Ok(parsed) => parsed,
        Err(e) if success => {
            return Err(NetworkError::InvalidResponse {
                endpoint: endpoint.to_string(),
                reason: format!("{} response: {}", tag, e),
            }
            .into());
        }
        Err(_) => {
            let excerpt = String::from_utf8_lossy(&body[..body.len().min(200)]);
            return Err(ActionError::Relay {
                tag,
                reason: format!("HTTP {}: {}", status, excerpt.trim()),
            });
        }
    };

    if let Some(reason) = parsed.error {
        return Err(ActionError::Rejected {
            tag,
            reason,
            logs: parsed.logs,
        });
    }
    match parsed.signature {
        Some(signature) if success => Ok(signature),
        _ => Err(ActionError::Relay {
            tag,
            reason: format!("HTTP {} without signature", status),
        }),
    }
}

/// [`ActionSubmitter`] backed by the HTTP signing relay.
pub struct RelaySubmitter {
    http: reqwest::Client,
    relay_url: String,
    pool: Arc<RpcPool>,
    operators: Vec<String>,
    confirm: ConfirmConfig,
    timeout: Duration,
}

impl RelaySubmitter {
    pub fn new(
        http: reqwest::Client,
        relay_url: &str,
        pool: Arc<RpcPool>,
        operators: Vec<String>,
        confirm: ConfirmConfig,
        timeout: Duration,
    ) -> Self {
        Self {
            http,
            relay_url: relay_url.trim_end_matches('/').to_string(),
            pool,
            operators,
            confirm,
            timeout,
        }
    }

    fn pick_operator(&self, tag: &'static str) -> Result<String, ActionError> {
        self.operators
            .choose(&mut rand::thread_rng())
            .cloned()
            .ok_or(ActionError::NoOperator { tag })
    }

    async fn send(&self, action: &Action, signer: &str) -> Result<String, ActionError> {
        let tag = action.tag();
        let request = SubmitRequest {
            action: tag,
            signer,
            token_mint: action.token_mint(),
            payload: hex::encode(action.payload()),
        };

        let url = format!("{}/submit", self.relay_url);
        let response = self
            .http
            .post(&url)
            .timeout(self.timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| network_error(e, &self.relay_url, self.timeout))?;

        let status = response.status();
        if status.is_server_error() || matches!(status.as_u16(), 408 | 429) {
            return Err(NetworkError::from_status(status.as_u16(), &self.relay_url).into());
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| network_error(e, &self.relay_url, self.timeout))?;
        parse_submit_response(tag, status.as_u16(), &body, &self.relay_url)
    }

    /// Ask the relay to derive an account address, then look it up on the
    /// active RPC session.
    async fn account_exists(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<bool, ActionError> {
        let url = format!("{}/{}", self.relay_url, path);
        let response = self
            .http
            .get(&url)
            .timeout(self.timeout)
            .query(query)
            .send()
            .await
            .map_err(|e| network_error(e, &self.relay_url, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            return Err(NetworkError::from_status(status.as_u16(), &self.relay_url).into());
        }
        let derived: DerivedAddress = response
            .json()
            .await
            .map_err(|e| network_error(e, &self.relay_url, self.timeout))?;

        let client = self.pool.current();
        let account = client.get_account_info(&derived.address).await?;
        Ok(account.is_some())
    }

    /// Poll the signature status on whichever session is active at each poll.
    async fn confirm(&self, tag: &'static str, signature: &str) -> Result<(), ActionError> {
        for poll in 1..=self.confirm.polls {
            let client = self.pool.current();
            match client.get_signature_status(signature).await {
                Ok(Some(status)) => {
                    if let Some(err) = status.err {
                        let logs = client
                            .get_transaction_logs(signature)
                            .await
                            .unwrap_or_default();
                        return Err(ActionError::Rejected {
                            tag,
                            reason: err.to_string(),
                            logs,
                        });
                    }
                    if status.is_confirmed() {
                        debug!("{} {} confirmed after {} polls", tag, signature, poll);
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) if e.kind().should_rotate() => {
                    debug!("Status poll {} for {} failed: {}", poll, signature, e);
                }
                Err(e) => return Err(e.into()),
            }
            tokio::time::sleep(self.confirm.interval()).await;
        }

        warn!("{} {} still unconfirmed", tag, signature);
        Err(ActionError::Unconfirmed {
            tag,
            signature: signature.to_string(),
            polls: self.confirm.polls,
        })
    }
}

#[async_trait]
impl ActionSubmitter for RelaySubmitter {
    async fn submit(&self, action: &Action) -> Result<String, ActionError> {
        let signer = match action.signer() {
            Some(identity) => identity.to_string(),
            None => self.pick_operator(action.tag())?,
        };

        let signature = self.send(action, &signer).await?;
        self.confirm(action.tag(), &signature).await?;
        Ok(signature)
    }

    async fn claim_record_exists(&self, identity: &str, round: u64) -> Result<bool, ActionError> {
        let round = round.to_string();
        self.account_exists(
            "claim-record",
            &[("player", identity), ("round", round.as_str())],
        )
        .await
    }

    async fn player_account_exists(&self, identity: &str) -> Result<bool, ActionError> {
        self.account_exists("player-bets", &[("player", identity)]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_place_bet_payload_layout() {
        let action = Action::PlaceBet {
            identity: "bot-1".to_string(),
            token_mint: "mint".to_string(),
            amount: 800_000_000_000,
            bet_type: BetType::Split,
            numbers: [4, 7, 0, 0],
        };
        let payload = action.payload();
        assert_eq!(payload.len(), 13);
        assert_eq!(&payload[..8], &800_000_000_000u64.to_le_bytes());
        assert_eq!(payload[8], 1);
        assert_eq!(&payload[9..], &[4, 7, 0, 0]);
        assert_eq!(action.signer(), Some("bot-1"));
    }

    #[test]
    fn test_lifecycle_actions_have_no_payload_or_signer() {
        for action in [Action::StartRound, Action::CloseBets, Action::RequestRandom] {
            assert!(action.payload().is_empty());
            assert!(action.signer().is_none());
        }
        assert_eq!(Action::RequestRandom.tag(), "get_random");
    }

    #[test]
    fn test_init_player_is_signed_by_its_identity() {
        let action = Action::InitPlayer {
            identity: "bot-3".to_string(),
        };
        assert_eq!(action.tag(), "initialize_player_bets");
        assert_eq!(action.signer(), Some("bot-3"));
        assert!(action.payload().is_empty());
        assert!(action.token_mint().is_none());
    }

    #[test]
    fn test_claim_payload_is_round_le() {
        let action = Action::ClaimWinnings {
            identity: "bot-2".to_string(),
            round: 4,
            token_mint: "mint".to_string(),
        };
        assert_eq!(action.payload(), vec![4, 0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(action.tag(), "claim_my_winnings");
    }

    #[test]
    fn test_error_kinds() {
        let unconfirmed = ActionError::Unconfirmed {
            tag: "close_bets",
            signature: "sig".to_string(),
            polls: 30,
        };
        assert_eq!(unconfirmed.kind(), ErrorKind::Transient);

        let rejected = ActionError::Rejected {
            tag: "place_bet",
            reason: "custom program error: 0x1771".to_string(),
            logs: vec!["Program log: BetsClosed".to_string()],
        };
        assert_eq!(rejected.kind(), ErrorKind::Fatal);
        assert_eq!(rejected.logs().len(), 1);
    }

    #[test]
    fn test_submit_response_signature() {
        let body = br#"{"signature":"5xSig"}"#;
        let signature = parse_submit_response("close_bets", 200, body, "relay").unwrap();
        assert_eq!(signature, "5xSig");
    }

    #[test]
    fn test_unreadable_success_body_is_invalid_response() {
        let err = parse_submit_response("get_random", 200, b"<html>ok</html>", "relay").unwrap_err();
        match &err {
            ActionError::Network(NetworkError::InvalidResponse { endpoint, reason }) => {
                assert_eq!(endpoint, "relay");
                assert!(reason.starts_with("get_random response: expected value"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(err.kind(), ErrorKind::Fatal);
        assert_eq!(err.endpoint(), Some("relay"));
    }

    #[test]
    fn test_refusals_keep_status_and_logs() {
        let err = parse_submit_response("place_bet", 400, b"bad signer\n", "relay").unwrap_err();
        assert!(
            matches!(&err, ActionError::Relay { reason, .. } if reason == "HTTP 400: bad signer")
        );

        let body = br#"{"error":"custom program error: 0x1771","logs":["Program log: BetsClosed"]}"#;
        let err = parse_submit_response("place_bet", 400, body, "relay").unwrap_err();
        assert_eq!(err.logs(), ["Program log: BetsClosed"]);

        let err = parse_submit_response("close_bets", 200, b"{}", "relay").unwrap_err();
        assert!(
            matches!(&err, ActionError::Relay { reason, .. } if reason == "HTTP 200 without signature")
        );
    }
}
