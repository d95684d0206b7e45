//! Game HTTP API: per-player bets and payouts for a round.

use crate::client::network_error;
use async_trait::async_trait;
use core_logic::NetworkError;
use serde::Deserialize;
use std::str::FromStr;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayerRoundBets {
    #[serde(default)]
    pub bets: Vec<PlacedBet>,
    #[serde(rename = "alreadyClaimed", default)]
    pub already_claimed: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PlacedBet {
    #[serde(rename = "payoutAmount", default, deserialize_with = "deserialize_amount")]
    pub payout_amount: u128,
    #[serde(rename = "tokenMint")]
    pub token_mint: String,
}

impl PlayerRoundBets {
    pub fn total_payout(&self) -> u128 {
        self.bets
            .iter()
            .fold(0u128, |sum, bet| sum.saturating_add(bet.payout_amount))
    }

    /// Mint of the first bet; a player bets one token per round.
    pub fn token_mint(&self) -> Option<&str> {
        self.bets.first().map(|bet| bet.token_mint.as_str())
    }
}

/// Payouts arrive as numbers or numeric strings. Anything unparsable counts as zero.
fn deserialize_amount<'de, D>(deserializer: D) -> Result<u128, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct AmountVisitor;

    impl<'de> serde::de::Visitor<'de> for AmountVisitor {
        type Value = u128;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or number payout amount")
        }

        fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            let trimmed = value.trim();
            Ok(u128::from_str(trimmed)
                .ok()
                .or_else(|| f64::from_str(trimmed).ok().map(float_amount))
                .unwrap_or(0))
        }

        fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value as u128)
        }

        fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(value.max(0) as u128)
        }

        fn visit_f64<E>(self, value: f64) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(float_amount(value))
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(0)
        }

        fn visit_bool<E>(self, _value: bool) -> Result<Self::Value, E>
        where
            E: serde::de::Error,
        {
            Ok(0)
        }
    }

    deserializer.deserialize_any(AmountVisitor)
}

fn float_amount(value: f64) -> u128 {
    if value.is_finite() && value > 0.0 {
        value as u128
    } else {
        0
    }
}

/// Eligibility query for one `(identity, round)`.
#[async_trait]
pub trait EligibilityApi: Send + Sync {
    /// A 404 is an empty result, never an error.
    async fn player_round_bets(
        &self,
        identity: &str,
        round: u64,
    ) -> Result<PlayerRoundBets, NetworkError>;
}

pub struct HttpEligibilityApi {
    http: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpEligibilityApi {
    pub fn new(http: reqwest::Client, base_url: &str, timeout: Duration) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
        }
    }

    fn endpoint(&self, identity: &str, round: u64) -> Result<Url, NetworkError> {
        let round = round.to_string();
        Url::parse_with_params(
            &format!("{}/player-round-bets", self.base_url),
            &[("player", identity), ("round", round.as_str())],
        )
        .map_err(|e| NetworkError::InvalidResponse {
            endpoint: self.base_url.clone(),
            reason: format!("cannot build query URL: {}", e),
        })
    }
}

#[async_trait]
impl EligibilityApi for HttpEligibilityApi {
    async fn player_round_bets(
        &self,
        identity: &str,
        round: u64,
    ) -> Result<PlayerRoundBets, NetworkError> {
        let url = self.endpoint(identity, round)?;
        let response = self
            .http
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|e| network_error(e, &self.base_url, self.timeout))?;

        let status = response.status();
        if status.as_u16() == 404 {
            return Ok(PlayerRoundBets::default());
        }
        if !status.is_success() {
            return Err(NetworkError::from_status(status.as_u16(), &self.base_url));
        }

        response
            .json()
            .await
            .map_err(|e| network_error(e, &self.base_url, self.timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payout_accepts_numbers_and_strings() {
        let raw = r#"{
            "bets": [
                { "payoutAmount": "3500000000", "tokenMint": "GRN" },
                { "payoutAmount": 1500000000, "tokenMint": "GRN" },
                { "payoutAmount": null, "tokenMint": "GRN" },
                { "payoutAmount": "n/a", "tokenMint": "GRN" },
                { "tokenMint": "GRN" }
            ],
            "alreadyClaimed": false
        }"#;
        let parsed: PlayerRoundBets = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.total_payout(), 5_000_000_000);
        assert_eq!(parsed.token_mint(), Some("GRN"));
        assert!(!parsed.already_claimed);
    }

    #[test]
    fn test_missing_fields_default_to_empty() {
        let parsed: PlayerRoundBets = serde_json::from_str("{}").unwrap();
        assert!(parsed.bets.is_empty());
        assert_eq!(parsed.total_payout(), 0);
        assert_eq!(parsed.token_mint(), None);
    }

    #[test]
    fn test_query_is_encoded() {
        let api = HttpEligibilityApi::new(
            reqwest::Client::new(),
            "https://api.example.com/api/",
            Duration::from_secs(5),
        );
        let url = api.endpoint("7ckK q4", 4).unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.example.com/api/player-round-bets?player=7ckK+q4&round=4"
        );
    }
}
