//! Bot registry: the roster, its status state machine, and session risk.
//!
//! ```text
//!   Idle ──start──▶ Running ──begin_trade──▶ Waiting
//!    ▲                 ▲                        │
//!    │                 └──settle / abandon──────┘
//!    └──── stop / stop_all / risk halt (from Running or Waiting)
//! ```
//!
//! All bots and the `SessionRisk` counters live behind one mutex. Settlement
//! and the risk-guard check run under a single acquisition, so concurrent
//! settlements are serialized and a breach idles every bot before the next
//! settlement is applied. The lock is never held across an `.await`.
//!
//! Each bot carries at most one outstanding trade ticket. A stop does not
//! cancel it; when it settles the counters are still updated, but the bot
//! is only returned to `Running` if it is still `Waiting` on that ticket.

use rust_decimal::Decimal;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::events::{EngineEvent, EventBus};
use crate::strategy::{Breach, RiskGuard, StakePolicy};
use crate::types::{Bot, BotKind, BotStatus, EngineError, SessionRisk, Settlement, TradeOutcome};

/// Handle for one in-flight trade.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeTicket {
    pub id: u64,
    pub bot_id: String,
    pub kind: BotKind,
    pub prediction: u8,
    pub stake: Decimal,
}

/// Result of applying a settlement.
#[derive(Debug, Clone)]
pub struct SettlementReport {
    pub bot: Bot,
    pub session: SessionRisk,
    pub breach: Option<Breach>,
}

#[derive(Debug)]
struct Slot {
    bot: Bot,
    in_flight: Option<u64>,
}

#[derive(Debug)]
struct RegistryState {
    slots: Vec<Slot>,
    session: SessionRisk,
    next_ticket: u64,
}

impl RegistryState {
    fn slot_mut(&mut self, id: &str) -> Result<&mut Slot, EngineError> {
        self.slots
            .iter_mut()
            .find(|s| s.bot.id == id)
            .ok_or_else(|| EngineError::UnknownBot(id.to_string()))
    }

    /// Force every bot to Idle, returning the transitions made.
    fn halt_all(&mut self) -> Vec<EngineEvent> {
        let mut events = Vec::new();
        for slot in self.slots.iter_mut() {
            if let Some(e) = transition(&mut slot.bot, BotStatus::Idle) {
                events.push(e);
            }
        }
        events
    }
}

fn transition(bot: &mut Bot, to: BotStatus) -> Option<EngineEvent> {
    let from = bot.status;
    if from == to {
        return None;
    }
    bot.status = to;
    debug!(bot_id = %bot.id, %from, %to, "Bot status changed");
    Some(EngineEvent::BotStatusChanged {
        bot_id: bot.id.clone(),
        from,
        to,
    })
}

pub struct BotRegistry {
    state: Mutex<RegistryState>,
    guard: RiskGuard,
    events: EventBus,
}

impl BotRegistry {
    pub fn new(bots: Vec<Bot>, session: SessionRisk, events: EventBus) -> Self {
        let slots = bots
            .into_iter()
            .map(|mut bot| {
                bot.status = BotStatus::Idle;
                Slot {
                    bot,
                    in_flight: None,
                }
            })
            .collect();
        Self {
            state: Mutex::new(RegistryState {
                slots,
                session,
                next_ticket: 1,
            }),
            guard: RiskGuard::new(),
            events,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish_all(&self, events: Vec<EngineEvent>) {
        for event in events {
            self.events.publish(event);
        }
    }

    // -- Reads ---------------------------------------------------------------

    pub fn bots(&self) -> Vec<Bot> {
        self.lock().slots.iter().map(|s| s.bot.clone()).collect()
    }

    pub fn bot(&self, id: &str) -> Option<Bot> {
        self.lock()
            .slots
            .iter()
            .find(|s| s.bot.id == id)
            .map(|s| s.bot.clone())
    }

    pub fn session(&self) -> SessionRisk {
        self.lock().session.clone()
    }

    /// Number of trades currently in flight across all bots.
    pub fn in_flight(&self) -> usize {
        self.lock()
            .slots
            .iter()
            .filter(|s| s.in_flight.is_some())
            .count()
    }

    // -- Operator transitions ------------------------------------------------

    /// Idle → Running.
    pub fn start(&self, id: &str) -> Result<Bot, EngineError> {
        let (bot, event) = {
            let mut st = self.lock();
            let slot = st.slot_mut(id)?;
            if slot.bot.status != BotStatus::Idle {
                return Err(EngineError::InvalidTransition {
                    id: id.to_string(),
                    from: slot.bot.status,
                    to: BotStatus::Running,
                });
            }
            let event = transition(&mut slot.bot, BotStatus::Running);
            (slot.bot.clone(), event)
        };
        info!(bot_id = %id, "Bot started");
        self.publish_all(event.into_iter().collect());
        Ok(bot)
    }

    /// Running | Waiting → Idle. Stopping an idle bot is a no-op.
    pub fn stop(&self, id: &str) -> Result<Bot, EngineError> {
        let (bot, event) = {
            let mut st = self.lock();
            let slot = st.slot_mut(id)?;
            let event = transition(&mut slot.bot, BotStatus::Idle);
            (slot.bot.clone(), event)
        };
        if event.is_some() {
            info!(bot_id = %id, "Bot stopped");
        }
        self.publish_all(event.into_iter().collect());
        Ok(bot)
    }

    /// Start every idle bot. Returns how many were started.
    pub fn start_all(&self) -> usize {
        let events: Vec<EngineEvent> = {
            let mut st = self.lock();
            st.slots
                .iter_mut()
                .filter(|s| s.bot.status == BotStatus::Idle)
                .filter_map(|s| transition(&mut s.bot, BotStatus::Running))
                .collect()
        };
        let started = events.len();
        info!(started, "Started all idle bots");
        self.publish_all(events);
        started
    }

    /// Stop every bot. Returns how many changed state.
    pub fn stop_all(&self) -> usize {
        let events = self.lock().halt_all();
        let stopped = events.len();
        info!(stopped, "Stopped all bots");
        self.publish_all(events);
        stopped
    }

    pub fn set_limits(&self, take_profit: Decimal, stop_loss: Decimal) {
        let mut st = self.lock();
        st.session.take_profit = take_profit;
        st.session.stop_loss = stop_loss;
        info!(%take_profit, %stop_loss, "Session limits updated");
    }

    /// Zero session profit and bot counters, and idle every bot.
    /// Trades already in flight still settle into the fresh counters.
    pub fn reset_session(&self) {
        let mut events = {
            let mut st = self.lock();
            st.session.reset();
            for slot in st.slots.iter_mut() {
                slot.bot.clear_counters();
            }
            st.halt_all()
        };
        info!("Session reset");
        events.push(EngineEvent::SessionReset);
        self.publish_all(events);
    }

    // -- Trade lifecycle -----------------------------------------------------

    /// Running → Waiting for a fired trigger.
    ///
    /// Refused (`None`) when the bot is not Running or still has a trade
    /// outstanding. If the session is already past a limit, every bot is
    /// idled instead.
    pub fn begin_trade(&self, id: &str, stakes: &StakePolicy) -> Option<TradeTicket> {
        let (ticket, events) = {
            let mut st = self.lock();

            if let Some(breach) = self.guard.evaluate(&st.session) {
                let mut events = st.halt_all();
                if !events.is_empty() {
                    warn!(%breach, "Session limit already reached, halting bots");
                    events.push(EngineEvent::SessionHalted { breach });
                }
                (None, events)
            } else {
                let ticket_id = st.next_ticket;
                let slot = match st.slot_mut(id) {
                    Ok(slot) => slot,
                    Err(e) => {
                        warn!(error = %e, "Trigger for unknown bot");
                        return None;
                    }
                };
                if slot.bot.status != BotStatus::Running || slot.in_flight.is_some() {
                    return None;
                }
                slot.in_flight = Some(ticket_id);
                let stake = stakes.stake_for(&slot.bot);
                let ticket = TradeTicket {
                    id: ticket_id,
                    bot_id: slot.bot.id.clone(),
                    kind: slot.bot.kind,
                    prediction: slot.bot.prediction,
                    stake,
                };
                let events: Vec<EngineEvent> =
                    transition(&mut slot.bot, BotStatus::Waiting).into_iter().collect();
                st.next_ticket += 1;
                (Some(ticket), events)
            }
        };
        self.publish_all(events);
        ticket
    }

    /// Give up on a trade without accounting (rejection, lost settlement).
    /// Returns true if the bot was returned to Running.
    pub fn abandon(&self, ticket: &TradeTicket) -> bool {
        let event = {
            let mut st = self.lock();
            let Ok(slot) = st.slot_mut(&ticket.bot_id) else {
                return false;
            };
            if slot.in_flight != Some(ticket.id) {
                return false;
            }
            slot.in_flight = None;
            if slot.bot.status == BotStatus::Waiting {
                transition(&mut slot.bot, BotStatus::Running)
            } else {
                None
            }
        };
        let reverted = event.is_some();
        self.publish_all(event.into_iter().collect());
        reverted
    }

    /// Apply a settled trade: counters, session profit, status, risk guard.
    pub fn settle(&self, ticket: &TradeTicket, settlement: Settlement) -> Option<SettlementReport> {
        let (report, events) = {
            let mut st = self.lock();
            let guard = self.guard;
            let slot = match st.slot_mut(&ticket.bot_id) {
                Ok(slot) => slot,
                Err(e) => {
                    warn!(error = %e, "Settlement for unknown bot");
                    return None;
                }
            };

            let mut events = Vec::new();
            if slot.in_flight == Some(ticket.id) {
                slot.in_flight = None;
                if slot.bot.status == BotStatus::Waiting {
                    events.extend(transition(&mut slot.bot, BotStatus::Running));
                }
            }

            slot.bot.trades += 1;
            match settlement.outcome {
                TradeOutcome::Won => {
                    slot.bot.wins += 1;
                    slot.bot.consecutive_losses = 0;
                }
                TradeOutcome::Lost => {
                    slot.bot.losses += 1;
                    slot.bot.consecutive_losses += 1;
                }
            }
            let bot = slot.bot.clone();

            st.session.record(settlement.profit);
            let breach = guard.evaluate(&st.session);
            if let Some(breach) = breach {
                events.extend(st.halt_all());
                events.push(EngineEvent::SessionHalted { breach });
            }

            let bot = st
                .slots
                .iter()
                .find(|s| s.bot.id == bot.id)
                .map(|s| s.bot.clone())
                .unwrap_or(bot);
            let report = SettlementReport {
                bot,
                session: st.session.clone(),
                breach,
            };
            (report, events)
        };

        if let Some(breach) = report.breach {
            warn!(%breach, session = %report.session, "Session limit reached, all bots halted");
        }
        self.publish_all(events);
        Some(report)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
