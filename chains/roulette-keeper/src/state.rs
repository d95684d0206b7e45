//! Game session account: fetch and decode.

use crate::client::RpcPool;
use async_trait::async_trait;
use core_logic::{ErrorKind, NetworkError};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Bytes of account discriminator before the first field.
const DISCRIMINATOR_LEN: usize = 8;

/// Round status, stored as a one-byte ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoundStatus {
    NotStarted,
    AcceptingBets,
    BetsClosed,
    Completed,
}

const STATUS_TABLE: [RoundStatus; 4] = [
    RoundStatus::NotStarted,
    RoundStatus::AcceptingBets,
    RoundStatus::BetsClosed,
    RoundStatus::Completed,
];

impl RoundStatus {
    pub fn from_ordinal(ordinal: u8) -> Result<Self, StateError> {
        STATUS_TABLE
            .get(ordinal as usize)
            .copied()
            .ok_or(StateError::InvalidStatus(ordinal))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::NotStarted => "NotStarted",
            RoundStatus::AcceptingBets => "AcceptingBets",
            RoundStatus::BetsClosed => "BetsClosed",
            RoundStatus::Completed => "Completed",
        }
    }
}

impl fmt::Display for RoundStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded game session record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundState {
    pub authority: [u8; 32],
    pub current_round: u64,
    /// Unix seconds; zero when the program does not track it.
    pub round_start_time: i64,
    pub status: RoundStatus,
    pub winning_number: Option<u8>,
    pub bets_closed_timestamp: i64,
    pub get_random_timestamp: i64,
    /// Layout version byte
    pub bump: u8,
    pub last_bettor: Option<[u8; 32]>,
    pub last_completed_round: u64,
}

impl RoundState {
    /// A state with every optional field empty and counters at zero.
    pub fn new(status: RoundStatus, current_round: u64) -> Self {
        Self {
            authority: [0; 32],
            current_round,
            round_start_time: 0,
            status,
            winning_number: None,
            bets_closed_timestamp: 0,
            get_random_timestamp: 0,
            bump: 0,
            last_bettor: None,
            last_completed_round: 0,
        }
    }

    /// Round whose winnings can be claimed, if any.
    pub fn claimable_round(&self) -> Option<u64> {
        match (self.winning_number, self.last_completed_round) {
            (Some(_), round) if round > 0 => Some(round),
            _ => None,
        }
    }
}

#[derive(Error, Debug)]
pub enum StateError {
    #[error("Game session account {address} not found")]
    Unavailable { address: String },

    #[error("Game session decode failed: {reason}")]
    Decode { reason: String },

    #[error("Game session carries unknown status ordinal {0}")]
    InvalidStatus(u8),

    #[error("Game session fetch failed: {0}")]
    Network(#[from] NetworkError),
}

impl StateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StateError::Network(e) => e.kind(),
            _ => ErrorKind::Fatal,
        }
    }
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize, field: &str) -> Result<&'a [u8], StateError> {
        let end = self.pos + len;
        if end > self.data.len() {
            return Err(StateError::Decode {
                reason: format!(
                    "truncated at {}: need {} bytes at offset {}, have {}",
                    field,
                    len,
                    self.pos,
                    self.data.len()
                ),
            });
        }
        let bytes = &self.data[self.pos..end];
        self.pos = end;
        Ok(bytes)
    }

    fn array<const N: usize>(&mut self, field: &str) -> Result<[u8; N], StateError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn u8(&mut self, field: &str) -> Result<u8, StateError> {
        Ok(self.take(1, field)?[0])
    }

    fn u64(&mut self, field: &str) -> Result<u64, StateError> {
        Ok(u64::from_le_bytes(self.array(field)?))
    }

    fn i64(&mut self, field: &str) -> Result<i64, StateError> {
        Ok(i64::from_le_bytes(self.array(field)?))
    }

    fn tag(&mut self, field: &str) -> Result<bool, StateError> {
        match self.u8(field)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(StateError::Decode {
                reason: format!("invalid option tag {} for {}", other, field),
            }),
        }
    }

    fn option_u8(&mut self, field: &str) -> Result<Option<u8>, StateError> {
        if self.tag(field)? {
            Ok(Some(self.u8(field)?))
        } else {
            Ok(None)
        }
    }

    fn option_key(&mut self, field: &str) -> Result<Option<[u8; 32]>, StateError> {
        if self.tag(field)? {
            Ok(Some(self.array(field)?))
        } else {
            Ok(None)
        }
    }
}

/// Decode raw account data. Trailing bytes are ignored.
pub fn decode_round_state(data: &[u8]) -> Result<RoundState, StateError> {
    let mut reader = Reader { data, pos: 0 };
    reader.take(DISCRIMINATOR_LEN, "discriminator")?;

    let authority = reader.array("authority")?;
    let current_round = reader.u64("current_round")?;
    let round_start_time = reader.i64("round_start_time")?;
    let status = RoundStatus::from_ordinal(reader.u8("round_status")?)?;
    let winning_number = reader.option_u8("winning_number")?;
    let bets_closed_timestamp = reader.i64("bets_closed_timestamp")?;
    let get_random_timestamp = reader.i64("get_random_timestamp")?;
    let bump = reader.u8("bump")?;
    let last_bettor = reader.option_key("last_bettor")?;
    let last_completed_round = reader.u64("last_completed_round")?;

    Ok(RoundState {
        authority,
        current_round,
        round_start_time,
        status,
        winning_number,
        bets_closed_timestamp,
        get_random_timestamp,
        bump,
        last_bettor,
        last_completed_round,
    })
}

/// Where the controller and reconciler read the round from.
#[async_trait]
pub trait RoundSource: Send + Sync {
    async fn fetch(&self) -> Result<RoundState, StateError>;
}

/// Reads the game session account through the active RPC session.
pub struct RpcRoundSource {
    pool: Arc<RpcPool>,
    address: String,
}

impl RpcRoundSource {
    pub fn new(pool: Arc<RpcPool>, address: &str) -> Self {
        Self {
            pool,
            address: address.to_string(),
        }
    }
}

#[async_trait]
impl RoundSource for RpcRoundSource {
    async fn fetch(&self) -> Result<RoundState, StateError> {
        // Failures are charged to the endpoint by whoever recovers from them.
        let client = self.pool.current();
        let data = client.get_account_info(&self.address).await?;
        self.pool.record_success(client.url());

        let data = data.ok_or_else(|| StateError::Unavailable {
            address: self.address.clone(),
        })?;
        decode_round_state(&data)
    }
}
