//! Session risk guard.
//!
//! Compares cumulative session profit against the take-profit and
//! stop-loss limits. The registry calls this inside the same critical
//! section that applies a settlement, so a breach halts every bot before
//! any other settlement can observe the pre-breach profit.

use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;

use crate::types::SessionRisk;

/// Which limit was crossed, with the profit that crossed it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Breach {
    TakeProfit { profit: Decimal, limit: Decimal },
    StopLoss { profit: Decimal, limit: Decimal },
}

impl fmt::Display for Breach {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Breach::TakeProfit { profit, limit } => {
                write!(f, "take-profit reached: ${profit:.2} >= ${limit:.2}")
            }
            Breach::StopLoss { profit, limit } => {
                write!(f, "stop-loss reached: ${profit:.2} <= -${limit:.2}")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RiskGuard;

impl RiskGuard {
    pub fn new() -> Self {
        RiskGuard
    }

    /// `Some(breach)` once the session is at or beyond either limit.
    pub fn evaluate(&self, session: &SessionRisk) -> Option<Breach> {
        let profit = session.session_profit;
        if profit >= session.take_profit {
            Some(Breach::TakeProfit {
                profit,
                limit: session.take_profit,
            })
        } else if profit <= -session.stop_loss {
            Some(Breach::StopLoss {
                profit,
                limit: session.stop_loss,
            })
        } else {
            None
        }
    }
}
