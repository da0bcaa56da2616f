//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section is optional and falls back to the stock defaults.
//! The API token is referenced by env-var name in the config and
//! resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use secrecy::SecretString;
use serde::Deserialize;
use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use crate::engine::executor::ExecutorConfig;
use crate::engine::{default_roster, EngineConfig};
use crate::platforms::deriv::{DerivConfig, DEFAULT_APP_ID, DEFAULT_ENDPOINT};
use crate::stats::probability::DEFAULT_DOMINANCE_MARGIN;
use crate::stats::SampleSize;
use crate::strategy::stake::MIN_STAKE;
use crate::strategy::{StakeConfig, DEFAULT_TRIGGER_THRESHOLD};
use crate::types::{Bot, BotKind};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineSection,
    pub stake: StakeSection,
    pub risk: RiskConfig,
    pub settlement: SettlementConfig,
    pub deriv: DerivSection,
    pub dashboard: DashboardConfig,
    /// Bot roster. Empty means the six stock bots.
    pub bots: Vec<BotConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineSection {
    pub symbol: String,
    pub currency: String,
    pub sample_size: SampleSize,
    pub trigger_threshold: f64,
    pub dominance_margin: u64,
    /// Trade against the in-process paper book instead of the live API.
    pub dry_run: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            symbol: "R_100".to_string(),
            currency: "USD".to_string(),
            sample_size: SampleSize::default(),
            trigger_threshold: DEFAULT_TRIGGER_THRESHOLD,
            dominance_margin: DEFAULT_DOMINANCE_MARGIN,
            dry_run: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StakeSection {
    pub amount: Decimal,
    pub martingale_enabled: bool,
    pub martingale_multiplier: Decimal,
    pub max_stake: Option<Decimal>,
}

impl Default for StakeSection {
    fn default() -> Self {
        Self {
            amount: dec!(1),
            martingale_enabled: false,
            martingale_multiplier: dec!(2),
            max_stake: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RiskConfig {
    pub take_profit: Decimal,
    /// Positive amount; the session halts once profit falls to `-stop_loss`.
    pub stop_loss: Decimal,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            take_profit: dec!(10),
            stop_loss: dec!(10),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SettlementConfig {
    pub delay_ms: u64,
    pub max_attempts: u32,
    pub retry_interval_ms: u64,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            delay_ms: 3000,
            max_attempts: 1,
            retry_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DerivSection {
    pub endpoint: String,
    pub app_id: String,
    pub api_token_env: String,
    pub request_timeout_secs: u64,
    pub history_count: u32,
}

impl Default for DerivSection {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            app_id: DEFAULT_APP_ID.to_string(),
            api_token_env: "DERIV_API_TOKEN".to_string(),
            request_timeout_secs: 10,
            history_count: 5000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8080,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct BotConfig {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    pub kind: BotKind,
    pub prediction: u8,
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config: AppConfig = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for bot in &self.bots {
            if bot.prediction > 9 {
                bail!("Bot {} has prediction {}, expected 0-9", bot.id, bot.prediction);
            }
            if !seen.insert(bot.id.as_str()) {
                bail!("Duplicate bot id: {}", bot.id);
            }
        }
        if self.risk.take_profit <= Decimal::ZERO || self.risk.stop_loss <= Decimal::ZERO {
            bail!("risk.take_profit and risk.stop_loss must be positive");
        }
        if self.stake.amount < MIN_STAKE {
            bail!(
                "stake.amount must be at least {MIN_STAKE}, got {}",
                self.stake.amount
            );
        }
        if !(0.0..=100.0).contains(&self.engine.trigger_threshold) {
            bail!(
                "engine.trigger_threshold must be a percentage, got {}",
                self.engine.trigger_threshold
            );
        }
        Ok(())
    }

    pub fn roster(&self) -> Vec<Bot> {
        if self.bots.is_empty() {
            return default_roster();
        }
        self.bots
            .iter()
            .map(|b| {
                let name = b
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("{} {}", b.kind, b.prediction));
                Bot::new(&b.id, &name, b.kind, b.prediction)
            })
            .collect()
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            symbol: self.engine.symbol.clone(),
            sample_size: self.engine.sample_size,
            trigger_threshold: self.engine.trigger_threshold,
            dominance_margin: self.engine.dominance_margin,
            bots: self.roster(),
            stake: StakeConfig {
                base: self.stake.amount,
                martingale_enabled: self.stake.martingale_enabled,
                martingale_multiplier: self.stake.martingale_multiplier,
                max_stake: self.stake.max_stake,
            },
            take_profit: self.risk.take_profit,
            stop_loss: self.risk.stop_loss,
            executor: ExecutorConfig {
                currency: self.engine.currency.clone(),
                settle_delay: Duration::from_millis(self.settlement.delay_ms),
                settle_attempts: self.settlement.max_attempts.max(1),
                retry_interval: Duration::from_millis(self.settlement.retry_interval_ms),
            },
        }
    }

    /// Deriv connection settings. The token is read from the configured
    /// env var; a missing or empty token means unauthenticated (ticks only).
    pub fn deriv_config(&self) -> DerivConfig {
        let token = Self::resolve_env(&self.deriv.api_token_env)
            .ok()
            .filter(|t| !t.trim().is_empty())
            .map(SecretString::new);
        DerivConfig {
            endpoint: self.deriv.endpoint.clone(),
            app_id: self.deriv.app_id.clone(),
            token,
            request_timeout: Duration::from_secs(self.deriv.request_timeout_secs),
            history_count: self.deriv.history_count,
        }
    }
}
