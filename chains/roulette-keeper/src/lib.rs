//! Roulette Keeper - Autonomous round keeper for an on-chain roulette game
//!
//! Drives the game session through its lifecycle, places bets for a set of
//! bot identities while bets are open, and claims their winnings once a
//! round has a winning number.
//!
//! # Architecture
//!
//! - **[`RoundController`]**: polls the round state and performs one
//!   [`Transition`] per cycle (start, bet and close, reveal and claim)
//! - **[`ClaimReconciler`]**: two-phase claim process (eligibility check, then
//!   claim submission) through the shared bounded runner
//! - **[`BetDispatcher`]**: plans a shuffled bet queue from the token groups
//!   and places it in the background
//! - **[`PlayerInitializer`]**: one-off pass creating the player accounts the
//!   bot identities need before they can bet
//! - **[`RelaySubmitter`]**: sends actions to the signing relay and confirms
//!   them on the active RPC endpoint
//! - **[`RpcPool`]**: RPC sessions with failover, shared by every component
//!
//! Bounded execution, endpoint rotation, retry and error classification come
//! from `core_logic`.
//!
//! # Quick Start
//!
//! ```bash
//! # Run the keeper with default configuration
//! cargo run -p roulette-keeper -- run
//!
//! # Print the current round state and endpoint health
//! cargo run -p roulette-keeper -- status
//!
//! # Claim a specific round once
//! cargo run -p roulette-keeper -- claim --round 41
//!
//! # Create missing player accounts before the first run
//! cargo run -p roulette-keeper -- init-players
//! ```
//!
//! # Configuration
//!
//! Configuration is loaded from `config/config.toml`. `SLACK_WEBHOOK_URL` and
//! `RELAY_URL` from the environment (or `.env`) override the file. See the
//! [`config`] module for every option.

pub mod actions;
pub mod api;
pub mod bets;
pub mod bot;
pub mod claims;
pub mod client;
pub mod config;
pub mod controller;
pub mod error;
pub mod keeper;
pub mod players;
pub mod state;

pub use actions::{Action, ActionError, ActionSubmitter, RelaySubmitter};
pub use api::{EligibilityApi, HttpEligibilityApi, PlayerRoundBets};
pub use bets::{BetDispatcher, BetSummary, BetType, LoadedGroup, PlannedBet};
pub use claims::{ClaimCandidate, ClaimError, ClaimReconciler, ClaimReport};
pub use client::{RpcClient, RpcPool};
pub use config::{KeeperConfig, Timings};
pub use controller::{RoundController, Transition};
pub use error::classify;
pub use keeper::Keeper;
pub use players::{InitSummary, PlayerInitializer};
pub use state::{RoundSource, RoundState, RoundStatus, StateError};
