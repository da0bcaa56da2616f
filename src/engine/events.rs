//! Engine events.
//!
//! Every state change (histogram update, status transition, settlement,
//! halt) is published explicitly on a broadcast channel. Listeners such
//! as the dashboard only observe; they never mutate engine state.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::broadcast;

use crate::stats::Streak;
use crate::strategy::Breach;
use crate::types::{BotStatus, DigitStat, Dominance, SessionRisk, TradeRecord};

use super::executor::TradeStage;

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    HistogramUpdated {
        stats: [DigitStat; 10],
        total: u64,
        last_digit: Option<u8>,
        dominance: Dominance,
        streak: Streak,
    },
    BotStatusChanged {
        bot_id: String,
        from: BotStatus,
        to: BotStatus,
    },
    TradeOpened {
        bot_id: String,
        contract_id: u64,
        stake: Decimal,
    },
    TradeSettled {
        record: TradeRecord,
        session: SessionRisk,
    },
    TradeFailed {
        bot_id: String,
        stage: TradeStage,
        error: String,
    },
    SessionHalted {
        breach: Breach,
    },
    SessionReset,
    ConnectionChanged {
        connected: bool,
    },
}

/// Cloneable publisher handle.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    /// Deliver to current subscribers. Having none is not an error.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }
}
