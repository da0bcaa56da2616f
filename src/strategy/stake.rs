//! Stake sizing.
//!
//! Flat stake by default. With martingale enabled, a bot's stake grows by
//! `multiplier` for every consecutive loss and falls back to the base
//! stake after a win, capped at `max_stake`.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::debug;

use crate::types::Bot;

/// Smallest stake the trading API accepts.
pub const MIN_STAKE: Decimal = dec!(0.35);

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StakeConfig {
    /// Base stake per trade.
    pub base: Decimal,
    pub martingale_enabled: bool,
    pub martingale_multiplier: Decimal,
    /// Upper bound for a scaled stake.
    pub max_stake: Option<Decimal>,
}

impl Default for StakeConfig {
    fn default() -> Self {
        Self {
            base: dec!(1),
            martingale_enabled: false,
            martingale_multiplier: dec!(2),
            max_stake: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StakePolicy {
    config: StakeConfig,
}

impl StakePolicy {
    pub fn new(config: StakeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StakeConfig {
        &self.config
    }

    /// Stake for the bot's next trade, rounded to cents.
    pub fn stake_for(&self, bot: &Bot) -> Decimal {
        let base = self.config.base;
        if !self.config.martingale_enabled || bot.consecutive_losses == 0 {
            return base.round_dp(2);
        }

        let mut stake = base;
        for _ in 0..bot.consecutive_losses {
            stake *= self.config.martingale_multiplier;
            if let Some(max) = self.config.max_stake {
                if stake >= max {
                    stake = max;
                    break;
                }
            }
        }

        debug!(
            bot_id = %bot.id,
            losses = bot.consecutive_losses,
            stake = %stake,
            "Martingale stake"
        );
        stake.round_dp(2)
    }
}
