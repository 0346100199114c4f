//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! All values are fixed at startup; nothing here is mutable at runtime.

use anyhow::{ensure, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::fs;

use crate::types::Outcome;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub game: GameConfig,
    pub settlement: SettlementConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
}

/// Round timing, payout and participant defaults.
#[derive(Debug, Deserialize, Clone)]
pub struct GameConfig {
    pub name: String,
    pub round_duration_secs: u64,
    pub cooldown_secs: u64,
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
    pub payout_multiplier: Decimal,
    pub outcomes: Vec<Outcome>,
    pub starting_balance: Decimal,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SettlementConfig {
    /// Retry attempts for a failed wager before it is escalated.
    pub max_retries: u32,
    pub retry_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    pub snapshot_path: String,
    pub journal_path: String,
    pub snapshot_interval_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            name: "TRICOLOR".to_string(),
            round_duration_secs: 60,
            cooldown_secs: 5,
            tick_interval_ms: default_tick_interval_ms(),
            payout_multiplier: dec!(2),
            outcomes: Outcome::ALL.to_vec(),
            starting_balance: dec!(1000),
        }
    }
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_interval_secs: 10,
        }
    }
}

impl GameConfig {
    pub fn round_duration(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.round_duration_secs as i64)
    }

    pub fn cooldown(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cooldown_secs as i64)
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::from_toml_str(&contents)
            .with_context(|| format!("Failed to load config file: {path}"))
    }

    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        let game = &self.game;
        ensure!(game.round_duration_secs > 0, "round_duration_secs must be positive");
        ensure!(game.tick_interval_ms > 0, "tick_interval_ms must be positive");
        ensure!(
            game.payout_multiplier > Decimal::ZERO,
            "payout_multiplier must be positive, got {}",
            game.payout_multiplier
        );
        ensure!(!game.outcomes.is_empty(), "at least one outcome must be configured");
        ensure!(
            game.starting_balance >= Decimal::ZERO,
            "starting_balance cannot be negative"
        );
        ensure!(self.settlement.max_retries > 0, "max_retries must be at least 1");
        ensure!(
            self.settlement.retry_interval_secs > 0,
            "retry_interval_secs must be positive"
        );
        Ok(())
    }
}
