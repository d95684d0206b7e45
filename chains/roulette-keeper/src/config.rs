//! Configuration loader for roulette-keeper

use anyhow::{Context, Result};
use core_logic::{BatchConfig, ConfigError, EndpointConfig, RetryConfig};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variables that take precedence over the file.
pub const SLACK_WEBHOOK_ENV: &str = "SLACK_WEBHOOK_URL";
pub const RELAY_URL_ENV: &str = "RELAY_URL";

/// Configuration for the round keeper
#[derive(Debug, Clone, Deserialize)]
pub struct KeeperConfig {
    /// RPC endpoints in failover order
    pub endpoints: EndpointConfig,
    /// Address of the game session account
    pub game_session_address: String,
    /// Base URL of the game HTTP API (eligibility queries)
    pub api_base_url: String,
    /// Base URL of the signing relay
    pub relay_url: String,
    #[serde(default)]
    pub slack_webhook_url: Option<String>,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    /// Per-request timeout for every HTTP call
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Consecutive failures before an alert is raised
    #[serde(default = "default_alert_after_failures")]
    pub alert_after_failures: u32,
    #[serde(default)]
    pub timings: Timings,
    #[serde(default = "default_reveal")]
    pub reveal: RetryConfig,
    #[serde(default)]
    pub confirm: ConfirmConfig,
    #[serde(default = "default_betting")]
    pub betting: BatchConfig,
    #[serde(default)]
    pub claims: ClaimsConfig,
    /// Player-account initialization pass (`init-players`)
    #[serde(default = "default_init_players")]
    pub init_players: BatchConfig,
    #[serde(default)]
    pub groups: Vec<TokenGroup>,
    /// Directory relative identity files are resolved against.
    #[serde(skip)]
    base_dir: PathBuf,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_alert_after_failures() -> u32 {
    5
}

fn default_reveal() -> RetryConfig {
    RetryConfig::fixed(3, 2000)
}

fn default_betting() -> BatchConfig {
    BatchConfig::new(40, 80)
}

fn default_init_players() -> BatchConfig {
    BatchConfig::new(15, 200)
}

/// Phase waits, all in milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Timings {
    pub betting_duration_ms: u64,
    pub start_settle_ms: u64,
    pub close_settle_ms: u64,
    pub cooldown_after_close_ms: u64,
    pub cooldown_after_random_ms: u64,
    pub error_backoff_ms: u64,
    pub rate_limit_pause_ms: u64,
    pub claim_retry_delay_ms: u64,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            betting_duration_ms: 60_000,
            start_settle_ms: 5_000,
            close_settle_ms: 5_000,
            cooldown_after_close_ms: 15_000,
            cooldown_after_random_ms: 30_000,
            error_backoff_ms: 30_000,
            rate_limit_pause_ms: 5_000,
            claim_retry_delay_ms: 10_000,
        }
    }
}

impl Timings {
    /// Every wait set to zero.
    pub fn immediate() -> Self {
        Self {
            betting_duration_ms: 0,
            start_settle_ms: 0,
            close_settle_ms: 0,
            cooldown_after_close_ms: 0,
            cooldown_after_random_ms: 0,
            error_backoff_ms: 0,
            rate_limit_pause_ms: 0,
            claim_retry_delay_ms: 0,
        }
    }

    pub fn betting_duration(&self) -> Duration {
        Duration::from_millis(self.betting_duration_ms)
    }

    pub fn start_settle(&self) -> Duration {
        Duration::from_millis(self.start_settle_ms)
    }

    pub fn close_settle(&self) -> Duration {
        Duration::from_millis(self.close_settle_ms)
    }

    pub fn cooldown_after_close(&self) -> Duration {
        Duration::from_millis(self.cooldown_after_close_ms)
    }

    pub fn cooldown_after_random(&self) -> Duration {
        Duration::from_millis(self.cooldown_after_random_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn rate_limit_pause(&self) -> Duration {
        Duration::from_millis(self.rate_limit_pause_ms)
    }

    pub fn claim_retry_delay(&self) -> Duration {
        Duration::from_millis(self.claim_retry_delay_ms)
    }
}

/// Signature status polling after a relay submission.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConfirmConfig {
    pub polls: u32,
    pub interval_ms: u64,
}

impl Default for ConfirmConfig {
    fn default() -> Self {
        Self {
            polls: 30,
            interval_ms: 1000,
        }
    }
}

impl ConfirmConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Batch settings for the two claim phases.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClaimsConfig {
    /// Read-only eligibility queries
    pub check: BatchConfig,
    /// Claim submissions (sequential by default)
    pub submit: BatchConfig,
}

impl Default for ClaimsConfig {
    fn default() -> Self {
        Self {
            check: BatchConfig::new(20, 80),
            submit: BatchConfig::new(1, 0),
        }
    }
}

/// One token group: a mint, its identities and their bet amount ranges.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenGroup {
    pub name: String,
    pub mint: String,
    pub decimals: u32,
    /// File with one identity per line
    pub identities: String,
    /// Inclusive `[min, max]` ranges in whole tokens, one bet per range
    pub amounts: Vec<[u64; 2]>,
}

impl KeeperConfig {
    /// Load configuration from a TOML file
    ///
    /// # Example
    /// ```ignore
    /// let config = KeeperConfig::from_path("config/config.toml")?;
    /// ```
    pub fn from_path(path: &str) -> Result<Self> {
        let content =
            fs::read_to_string(path).context(format!("Failed to read config from {}", path))?;
        let mut config: KeeperConfig =
            toml::from_str(&content).context("Failed to parse config TOML")?;
        config.base_dir = Path::new(path)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        config.validate()?;
        Ok(config)
    }

    /// [`from_path`](Self::from_path) with process environment overrides applied.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = Self::from_path(path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    /// Replace the webhook and relay URL with non-empty values from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(webhook) = lookup(SLACK_WEBHOOK_ENV).filter(|v| !v.trim().is_empty()) {
            self.slack_webhook_url = Some(webhook);
        }
        if let Some(relay) = lookup(RELAY_URL_ENV).filter(|v| !v.trim().is_empty()) {
            self.relay_url = relay;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.endpoints.validate()?;
        for url in [&self.api_base_url, &self.relay_url] {
            Url::parse(url).map_err(|_| ConfigError::InvalidEndpointUrl { url: url.clone() })?;
        }

        if self.game_session_address.trim().is_empty() {
            return Err(ConfigError::MissingField {
                field: "game_session_address".to_string(),
            });
        }
        if self.reveal.max_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                field: "reveal.max_attempts".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.confirm.polls == 0 {
            return Err(ConfigError::InvalidValue {
                field: "confirm.polls".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.alert_after_failures == 0 {
            return Err(ConfigError::InvalidValue {
                field: "alert_after_failures".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }

        self.betting.validate("betting")?;
        self.claims.check.validate("claims.check")?;
        self.claims.submit.validate("claims.submit")?;
        self.init_players.validate("init_players")?;

        for group in &self.groups {
            for [min, max] in &group.amounts {
                if min > max {
                    return Err(ConfigError::InvalidValue {
                        field: format!("groups.{}.amounts", group.name),
                        reason: format!("range [{}, {}] is inverted", min, max),
                    });
                }
            }
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Resolve a group's identity file against the config directory.
    pub fn identities_path(&self, group: &TokenGroup) -> PathBuf {
        let path = Path::new(&group.identities);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }
}

/// Read identities, one per line. Blank lines and `#` comments are skipped.
pub fn load_identities(path: &Path) -> Result<Vec<String>, ConfigError> {
    let display = path.display().to_string();
    if !path.exists() {
        return Err(ConfigError::FileNotFound { path: display });
    }
    let content = fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: display,
        msg: e.to_string(),
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}
