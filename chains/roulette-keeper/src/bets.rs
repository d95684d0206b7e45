//! Bet planning and dispatch for the bot identities.

use crate::actions::{Action, ActionSubmitter};
use crate::config::TokenGroup;
use core_logic::BoundedRunner;
use rand::Rng;
use rand::seq::SliceRandom;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

/// Roulette bet kinds, in on-chain ordinal order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum BetType {
    Straight = 0,
    Split = 1,
    Corner = 2,
    Street = 3,
    SixLine = 4,
    FirstFour = 5,
    Red = 6,
    Black = 7,
    Even = 8,
    Odd = 9,
    Manque = 10,
    Passe = 11,
    Column = 12,
    P12 = 13,
    M12 = 14,
    D12 = 15,
}

pub const ALL_BET_TYPES: [BetType; 16] = [
    BetType::Straight,
    BetType::Split,
    BetType::Corner,
    BetType::Street,
    BetType::SixLine,
    BetType::FirstFour,
    BetType::Red,
    BetType::Black,
    BetType::Even,
    BetType::Odd,
    BetType::Manque,
    BetType::Passe,
    BetType::Column,
    BetType::P12,
    BetType::M12,
    BetType::D12,
];

impl BetType {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        ALL_BET_TYPES[rng.gen_range(0..ALL_BET_TYPES.len())]
    }

    /// Numbers for this bet. Kinds that cover a fixed set of the table get zeros.
    pub fn random_numbers<R: Rng + ?Sized>(self, rng: &mut R) -> [u8; 4] {
        let mut numbers = [0u8; 4];
        match self {
            BetType::Straight => numbers[0] = rng.gen_range(0..=36),
            BetType::Split => {
                if rng.gen_bool(0.5) {
                    // vertical
                    let first = rng.gen_range(1..=33);
                    numbers[0] = first;
                    numbers[1] = first + 3;
                } else {
                    // horizontal, never across a row end
                    let first = 1 + 3 * rng.gen_range(0..=11) + rng.gen_range(0..=1);
                    numbers[0] = first;
                    numbers[1] = first + 1;
                }
            }
            BetType::Corner => numbers[0] = 1 + 3 * rng.gen_range(0..=10) + rng.gen_range(0..=1),
            BetType::Street => numbers[0] = 1 + 3 * rng.gen_range(0..=11),
            BetType::SixLine => numbers[0] = 1 + 3 * rng.gen_range(0..=10),
            BetType::Column => numbers[0] = rng.gen_range(1..=3),
            _ => {}
        }
        numbers
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BetError {
    #[error("Amount {amount} with {decimals} decimals overflows u64 base units")]
    AmountOverflow { amount: u64, decimals: u32 },
}

/// Convert whole tokens to base units.
pub fn to_base_units(amount: u64, decimals: u32) -> Result<u64, BetError> {
    10u64
        .checked_pow(decimals)
        .and_then(|factor| amount.checked_mul(factor))
        .ok_or(BetError::AmountOverflow { amount, decimals })
}

/// A token group with its identities read from disk.
#[derive(Debug, Clone)]
pub struct LoadedGroup {
    pub group: TokenGroup,
    pub identities: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBet {
    pub group: String,
    pub identity: String,
    pub token_mint: String,
    /// Whole tokens, for logs
    pub tokens: u64,
    /// Base units, as sent
    pub amount: u64,
    pub bet_type: BetType,
    pub numbers: [u8; 4],
}

impl PlannedBet {
    pub fn to_action(&self) -> Action {
        Action::PlaceBet {
            identity: self.identity.clone(),
            token_mint: self.token_mint.clone(),
            amount: self.amount,
            bet_type: self.bet_type,
            numbers: self.numbers,
        }
    }
}

/// One bet per amount range per identity, shuffled.
pub fn build_queue<R: Rng + ?Sized>(
    groups: &[LoadedGroup],
    rng: &mut R,
) -> Result<Vec<PlannedBet>, BetError> {
    let mut queue = Vec::new();
    for loaded in groups {
        let group = &loaded.group;
        for identity in &loaded.identities {
            for [min, max] in &group.amounts {
                let tokens = rng.gen_range(*min..=*max);
                let bet_type = BetType::random(rng);
                queue.push(PlannedBet {
                    group: group.name.clone(),
                    identity: identity.clone(),
                    token_mint: group.mint.clone(),
                    tokens,
                    amount: to_base_units(tokens, group.decimals)?,
                    bet_type,
                    numbers: bet_type.random_numbers(rng),
                });
            }
        }
    }
    queue.shuffle(rng);
    Ok(queue)
}

/// Per-group bet counts of a queue.
pub fn queue_sizes(queue: &[PlannedBet]) -> BTreeMap<String, usize> {
    let mut sizes = BTreeMap::new();
    for bet in queue {
        *sizes.entry(bet.group.clone()).or_insert(0) += 1;
    }
    sizes
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BetSummary {
    pub round: u64,
    pub planned: usize,
    pub placed: usize,
    pub failed: usize,
}

/// Plans a round's bets and pushes them through the bounded runner.
pub struct BetDispatcher {
    groups: Vec<LoadedGroup>,
    submitter: Arc<dyn ActionSubmitter>,
    runner: BoundedRunner,
}

impl BetDispatcher {
    pub fn new(
        groups: Vec<LoadedGroup>,
        submitter: Arc<dyn ActionSubmitter>,
        runner: BoundedRunner,
    ) -> Self {
        Self {
            groups,
            submitter,
            runner,
        }
    }

    pub fn groups(&self) -> &[LoadedGroup] {
        &self.groups
    }

    pub fn plan(&self) -> Result<Vec<PlannedBet>, BetError> {
        build_queue(&self.groups, &mut rand::thread_rng())
    }

    /// Place every planned bet. Individual failures are logged and counted.
    ///
    /// Fails when planning fails or when not a single bet went through.
    pub async fn dispatch(&self, round: u64) -> anyhow::Result<BetSummary> {
        let queue = self.plan()?;
        let planned = queue.len();
        info!(
            target: "round",
            "Round #{}: placing {} bets (limit {}, pace {:?})",
            round,
            planned,
            self.runner.concurrency_limit(),
            self.runner.pace_delay()
        );

        let tasks: Vec<_> = queue
            .into_iter()
            .map(|bet| {
                let submitter = Arc::clone(&self.submitter);
                move || async move {
                    match submitter.submit(&bet.to_action()).await {
                        Ok(signature) => Ok(Some(signature)),
                        Err(e) => {
                            error!(
                                "Bet from {} [{}] FAILED: {} tokens as {:?} {:?}: {}",
                                bet.identity,
                                bet.group,
                                bet.tokens,
                                bet.bet_type,
                                bet.numbers,
                                e
                            );
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
        let summary = BetSummary {
            round,
            planned,
            placed: report.succeeded(),
            failed: report.failed(),
        };

        if summary.placed == 0 && summary.failed > 0 {
            anyhow::bail!("all {} bets for round #{} failed", summary.failed, round);
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn group(name: &str, decimals: u32, amounts: Vec<[u64; 2]>, identities: &[&str]) -> LoadedGroup {
        LoadedGroup {
            group: TokenGroup {
                name: name.to_string(),
                mint: format!("{}-mint", name),
                decimals,
                identities: String::new(),
                amounts,
            },
            identities: identities.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_base_units() {
        assert_eq!(to_base_units(800, 9).unwrap(), 800_000_000_000);
        assert_eq!(to_base_units(3, 6).unwrap(), 3_000_000);
        assert!(to_base_units(u64::MAX, 1).is_err());
        assert!(to_base_units(1, 20).is_err());
    }

    #[test]
    fn test_numbers_stay_on_the_table() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..2000 {
            let bet_type = BetType::random(&mut rng);
            let numbers = bet_type.random_numbers(&mut rng);
            assert!(numbers.iter().all(|n| *n <= 36), "{:?} {:?}", bet_type, numbers);
            match bet_type {
                BetType::Split => {
                    let gap = numbers[1] - numbers[0];
                    assert!(gap == 1 || gap == 3);
                    if gap == 1 {
                        assert_ne!(numbers[0] % 3, 0);
                    }
                }
                BetType::Street | BetType::SixLine => assert_eq!(numbers[0] % 3, 1),
                BetType::Corner => assert!(numbers[0] <= 32 && numbers[0] % 3 != 0),
                BetType::Column => assert!((1..=3).contains(&numbers[0])),
                BetType::Straight => {}
                _ => assert_eq!(numbers, [0, 0, 0, 0]),
            }
        }
    }

    #[test]
    fn test_queue_covers_every_range_and_identity() {
        let groups = vec![
            group("GRN", 9, vec![[400, 600], [600, 800]], &["a", "b"]),
            group("USDC", 6, vec![[2, 3]], &["c"]),
        ];
        let mut rng = StdRng::seed_from_u64(1);
        let queue = build_queue(&groups, &mut rng).unwrap();

        assert_eq!(queue.len(), 5);
        let sizes = queue_sizes(&queue);
        assert_eq!(sizes["GRN"], 4);
        assert_eq!(sizes["USDC"], 1);

        for bet in &queue {
            match bet.group.as_str() {
                "GRN" => {
                    assert!((400..=800).contains(&bet.tokens));
                    assert_eq!(bet.amount, bet.tokens * 1_000_000_000);
                }
                _ => assert_eq!(bet.amount, bet.tokens * 1_000_000),
            }
        }
    }
}
