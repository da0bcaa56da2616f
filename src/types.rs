//! Shared types for the DIGITBOT engine.
//!
//! These types form the data model used across all modules.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Ticks
// ---------------------------------------------------------------------------

/// A single quote delivered by the tick source.
///
/// `raw` is the quote exactly as formatted by the feed (pip-size aware),
/// because the last digit is read from its final character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: String,
    pub raw: String,
    /// Feed timestamp (seconds since epoch), if the feed supplies one.
    pub epoch: Option<i64>,
}

impl Quote {
    pub fn new(symbol: &str, raw: impl Into<String>) -> Self {
        Self {
            symbol: symbol.to_string(),
            raw: raw.into(),
            epoch: None,
        }
    }
}

impl fmt::Display for Quote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.symbol, self.raw)
    }
}

/// One bucket of the digit histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DigitStat {
    pub digit: u8,
    pub count: u64,
    /// Share of the window, 0–100.
    pub percentage: f64,
}

impl DigitStat {
    pub fn empty(digit: u8) -> Self {
        Self {
            digit,
            count: 0,
            percentage: 0.0,
        }
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Direction a digit bot bets on relative to its prediction digit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BotKind {
    Over,
    Under,
}

impl BotKind {
    /// Contract type submitted with the proposal.
    pub fn contract_type(&self) -> ContractType {
        match self {
            BotKind::Over => ContractType::DigitOver,
            BotKind::Under => ContractType::DigitUnder,
        }
    }
}

impl fmt::Display for BotKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotKind::Over => write!(f, "Over"),
            BotKind::Under => write!(f, "Under"),
        }
    }
}

impl std::str::FromStr for BotKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "over" => Ok(BotKind::Over),
            "under" => Ok(BotKind::Under),
            _ => Err(anyhow::anyhow!("Unknown bot kind: {s}")),
        }
    }
}

/// Contract type on the trading API wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContractType {
    #[serde(rename = "DIGITOVER")]
    DigitOver,
    #[serde(rename = "DIGITUNDER")]
    DigitUnder,
}

impl fmt::Display for ContractType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContractType::DigitOver => write!(f, "DIGITOVER"),
            ContractType::DigitUnder => write!(f, "DIGITUNDER"),
        }
    }
}

/// Bot lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BotStatus {
    /// Not trading.
    Idle,
    /// Eligible to trigger.
    Running,
    /// One trade in flight.
    Waiting,
}

impl fmt::Display for BotStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BotStatus::Idle => write!(f, "Idle"),
            BotStatus::Running => write!(f, "Running"),
            BotStatus::Waiting => write!(f, "Waiting"),
        }
    }
}

/// Coarse parity imbalance of the current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Dominance {
    Even,
    Odd,
    Neutral,
}

impl fmt::Display for Dominance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dominance::Even => write!(f, "EVEN"),
            Dominance::Odd => write!(f, "ODD"),
            Dominance::Neutral => write!(f, "NEUTRAL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TradeOutcome {
    Won,
    Lost,
}

impl fmt::Display for TradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeOutcome::Won => write!(f, "WON"),
            TradeOutcome::Lost => write!(f, "LOST"),
        }
    }
}

// ---------------------------------------------------------------------------
// Bots & session
// ---------------------------------------------------------------------------

/// A digit bot and its performance counters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bot {
    pub id: String,
    pub name: String,
    pub kind: BotKind,
    /// Barrier digit, 0–9.
    pub prediction: u8,
    pub status: BotStatus,
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    /// Losses since the last win (drives the martingale stake policy).
    pub consecutive_losses: u32,
}

impl fmt::Display for Bot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} {} {} ({}W/{}L of {})",
            self.id, self.kind, self.prediction, self.status, self.wins, self.losses, self.trades,
        )
    }
}

impl Bot {
    pub fn new(id: &str, name: &str, kind: BotKind, prediction: u8) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            kind,
            prediction,
            status: BotStatus::Idle,
            trades: 0,
            wins: 0,
            losses: 0,
            consecutive_losses: 0,
        }
    }

    /// Wins as a fraction of settled trades (0.0 when none).
    pub fn win_rate(&self) -> f64 {
        if self.trades == 0 {
            0.0
        } else {
            self.wins as f64 / self.trades as f64
        }
    }

    pub(crate) fn clear_counters(&mut self) {
        self.trades = 0;
        self.wins = 0;
        self.losses = 0;
        self.consecutive_losses = 0;
    }
}

/// Session-wide profit accumulators and limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRisk {
    pub session_profit: Decimal,
    pub total_profit: Decimal,
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
}

impl SessionRisk {
    pub fn new(take_profit: Decimal, stop_loss: Decimal) -> Self {
        Self {
            session_profit: Decimal::ZERO,
            total_profit: Decimal::ZERO,
            take_profit,
            stop_loss,
        }
    }

    /// Add a settled profit (negative for a loss) to both accumulators.
    pub fn record(&mut self, profit: Decimal) {
        self.session_profit += profit;
        self.total_profit += profit;
    }

    /// Zero both accumulators. Limits are kept.
    pub fn reset(&mut self) {
        self.session_profit = Decimal::ZERO;
        self.total_profit = Decimal::ZERO;
    }
}

impl fmt::Display for SessionRisk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "session=${:.2} total=${:.2} (TP ${:.2} / SL ${:.2})",
            self.session_profit, self.total_profit, self.take_profit, self.stop_loss,
        )
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

/// Monetary result of one settled contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub outcome: TradeOutcome,
    pub profit: Decimal,
}

impl Settlement {
    pub fn is_win(&self) -> bool {
        self.outcome == TradeOutcome::Won
    }
}

/// In-memory record of a settled trade, kept for the dashboard only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub timestamp: DateTime<Utc>,
    pub bot_id: String,
    pub contract_type: ContractType,
    pub barrier: String,
    pub stake: Decimal,
    pub contract_id: u64,
    pub outcome: TradeOutcome,
    pub profit: Decimal,
}

impl fmt::Display for TradeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.profit >= Decimal::ZERO { "+" } else { "" };
        write!(
            f,
            "[{}] {} {} stake=${:.2} {} {sign}{:.2} (#{})",
            self.bot_id,
            self.contract_type,
            self.barrier,
            self.stake,
            self.outcome,
            self.profit,
            self.contract_id,
        )
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for the engine's operator API.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("Unknown bot: {0}")]
    UnknownBot(String),

    #[error("Bot {id} cannot go from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: BotStatus,
        to: BotStatus,
    },

    #[error("Unsupported sample size: {0}")]
    InvalidSampleSize(usize),

    #[error("Configuration error: {0}")]
    Config(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
