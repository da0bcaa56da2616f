//! Platform integrations.
//!
//! Defines the `TradingClient` and `TickSource` traits the engine is built
//! against, the request/response shapes exchanged with the trading API,
//! and two implementations:
//! - Deriv: websocket API for live ticks and real contracts
//! - Paper: in-memory contracts settled against observed ticks (dry run)

pub mod deriv;
pub mod paper;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;

use crate::types::{ContractType, Quote};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum TradingError {
    #[error("Trading API not ready")]
    NotReady,

    #[error("Rejected by trading API ({code}): {message}")]
    Rejected { code: String, message: String },

    #[error("Response missing field: {0}")]
    MissingField(&'static str),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Failed to decode response: {0}")]
    Decode(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

pub const BASIS_STAKE: &str = "stake";
pub const DURATION_UNIT_TICKS: &str = "t";

/// Price a digit contract for a given stake.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProposalRequest {
    pub proposal: u8,
    pub amount: Decimal,
    pub basis: &'static str,
    pub contract_type: ContractType,
    pub currency: String,
    pub duration: u32,
    pub duration_unit: &'static str,
    pub symbol: String,
    pub barrier: String,
}

impl ProposalRequest {
    /// One-tick digit contract priced by stake.
    pub fn digit(
        contract_type: ContractType,
        stake: Decimal,
        currency: &str,
        symbol: &str,
        barrier: &str,
    ) -> Self {
        Self {
            proposal: 1,
            amount: stake,
            basis: BASIS_STAKE,
            contract_type,
            currency: currency.to_string(),
            duration: 1,
            duration_unit: DURATION_UNIT_TICKS,
            symbol: symbol.to_string(),
            barrier: barrier.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Proposal {
    pub id: String,
    #[serde(default)]
    pub ask_price: Option<Decimal>,
    #[serde(default)]
    pub payout: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuyRequest {
    /// Proposal id being purchased.
    pub buy: String,
    /// Maximum price; the stake.
    pub price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BuyReceipt {
    pub contract_id: u64,
    #[serde(default)]
    pub buy_price: Option<Decimal>,
    #[serde(default)]
    pub payout: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContractStatusRequest {
    pub proposal_open_contract: u8,
    pub contract_id: u64,
}

impl ContractStatusRequest {
    pub fn new(contract_id: u64) -> Self {
        Self {
            proposal_open_contract: 1,
            contract_id,
        }
    }
}

/// Current state of a purchased contract.
/// One tradable market from the `active_symbols` listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveSymbol {
    pub symbol: String,
    pub display_name: String,
    #[serde(default)]
    pub market: String,
    #[serde(default)]
    pub market_display_name: String,
    #[serde(default, deserialize_with = "flag")]
    pub is_trading_suspended: bool,
}

/// The API sends flags as 0/1.
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_u64().is_some_and(|n| n != 0),
        _ => false,
    })
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ContractStatus {
    /// "open", "won", "lost", "sold", ...
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub profit: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// Contract lifecycle calls against a trading API.
///
/// Implementors report explicit API rejections as `TradingError::Rejected`
/// and an unavailable transport as `TradingError::NotReady`.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TradingClient: Send + Sync {
    async fn proposal(&self, request: &ProposalRequest) -> Result<Proposal, TradingError>;

    async fn buy(&self, request: &BuyRequest) -> Result<BuyReceipt, TradingError>;

    async fn contract_status(
        &self,
        request: &ContractStatusRequest,
    ) -> Result<ContractStatus, TradingError>;

    /// Markets currently offered by the broker.
    async fn active_symbols(&self) -> Result<Vec<ActiveSymbol>, TradingError>;
}

/// A live quote subscription.
pub struct TickSubscription {
    pub key: String,
    /// Each message is one delivery from the feed: the history snapshot
    /// first, then single live ticks.
    pub quotes: mpsc::Receiver<Vec<Quote>>,
}

/// Source of live quotes for a symbol.
#[async_trait]
pub trait TickSource: Send + Sync {
    async fn monitor(&self, symbol: &str) -> Result<TickSubscription, TradingError>;

    async fn stop_monitor(&self, symbol: &str, key: &str) -> Result<(), TradingError>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
