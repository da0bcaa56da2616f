//! Turns a contract-status response into a settlement.
//!
//! `won` and `lost` are terminal; `sold` is terminal and classified by the
//! sign of its profit. Anything else (including `open`) is not settled yet.
//! When the response carries no profit, a synthetic payout model is used:
//! a win pays `stake * 0.9`, a loss costs the full stake.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::platforms::ContractStatus;
use crate::types::{Settlement, TradeOutcome};

/// Net return on a win when the API omits profit.
pub const SYNTHETIC_WIN_PAYOUT: Decimal = dec!(0.9);

pub struct Accountant;

impl Accountant {
    /// `None` while the contract is still open or in an unrecognised state.
    pub fn classify(status: &ContractStatus, stake: Decimal) -> Option<Settlement> {
        let state = status.status.as_deref()?.to_ascii_lowercase();
        let outcome = match state.as_str() {
            "won" => TradeOutcome::Won,
            "lost" => TradeOutcome::Lost,
            "sold" => match status.profit {
                Some(p) if p > Decimal::ZERO => TradeOutcome::Won,
                Some(_) => TradeOutcome::Lost,
                None => {
                    debug!("Sold contract without profit, treating as unsettled");
                    return None;
                }
            },
            _ => return None,
        };

        let profit = status
            .profit
            .unwrap_or_else(|| Self::synthetic_profit(outcome, stake));

        Some(Settlement { outcome, profit })
    }

    pub fn synthetic_profit(outcome: TradeOutcome, stake: Decimal) -> Decimal {
        match outcome {
            TradeOutcome::Won => (stake * SYNTHETIC_WIN_PAYOUT).round_dp(2),
            TradeOutcome::Lost => -stake,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
