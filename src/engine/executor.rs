//! Trade executor.
//!
//! One spawned task per fired trigger, running propose → buy → settle in
//! sequence. Outcomes flow back only through the bot registry and the
//! event bus; a failed stage is logged, abandoned, and never retried.

use chrono::Utc;
use rust_decimal::Decimal;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::accountant::Accountant;
use super::events::{EngineEvent, EventBus};
use super::registry::{BotRegistry, TradeTicket};
use crate::platforms::{
    BuyRequest, ContractStatusRequest, ProposalRequest, TradingClient, TradingError,
};
use crate::types::{ContractType, Settlement, TradeRecord};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub currency: String,
    /// Wait between purchase and the first status query.
    pub settle_delay: Duration,
    /// Status queries before giving up. 1 = single shot.
    pub settle_attempts: u32,
    /// Wait between further status queries.
    pub retry_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            currency: "USD".to_string(),
            settle_delay: Duration::from_secs(3),
            settle_attempts: 1,
            retry_interval: Duration::from_secs(1),
        }
    }
}

// ---------------------------------------------------------------------------
// Trade state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStage {
    Proposal,
    Buy,
    Settlement,
}

impl fmt::Display for TradeStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeStage::Proposal => write!(f, "proposal"),
            TradeStage::Buy => write!(f, "buy"),
            TradeStage::Settlement => write!(f, "settlement"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TradeFailure {
    #[error("{stage} request failed: {source}")]
    Client {
        stage: TradeStage,
        #[source]
        source: TradingError,
    },

    #[error("Contract {contract_id} not settled after {attempts} status check(s)")]
    Unsettled { contract_id: u64, attempts: u32 },

    #[error("Cancelled during {stage} by shutdown")]
    Cancelled { stage: TradeStage },
}

impl TradeFailure {
    pub fn stage(&self) -> TradeStage {
        match self {
            TradeFailure::Client { stage, .. } | TradeFailure::Cancelled { stage } => *stage,
            TradeFailure::Unsettled { .. } => TradeStage::Settlement,
        }
    }

    fn at(stage: TradeStage) -> impl FnOnce(TradingError) -> Self {
        move |source| TradeFailure::Client { stage, source }
    }
}

/// A trade as it moves through the pipeline.
#[derive(Debug, Clone)]
pub struct Trade {
    pub ticket: TradeTicket,
    pub symbol: String,
    pub contract_type: ContractType,
    pub barrier: String,
    pub proposal_id: Option<String>,
    pub contract_id: Option<u64>,
    pub settlement: Option<Settlement>,
}

impl Trade {
    pub fn new(ticket: TradeTicket, symbol: String) -> Self {
        Self {
            symbol,
            contract_type: ticket.kind.contract_type(),
            barrier: ticket.prediction.to_string(),
            ticket,
            proposal_id: None,
            contract_id: None,
            settlement: None,
        }
    }

    pub fn stake(&self) -> Decimal {
        self.ticket.stake
    }
}

// ---------------------------------------------------------------------------
// Executor
// ---------------------------------------------------------------------------

pub struct TradeExecutor {
    client: Arc<dyn TradingClient>,
    registry: Arc<BotRegistry>,
    events: EventBus,
    config: ExecutorConfig,
    /// Market traded by new pipelines. A running trade keeps the symbol it
    /// opened with.
    symbol: watch::Receiver<String>,
    shutdown: watch::Receiver<bool>,
}

impl TradeExecutor {
    pub fn new(
        client: Arc<dyn TradingClient>,
        registry: Arc<BotRegistry>,
        events: EventBus,
        config: ExecutorConfig,
        symbol: watch::Receiver<String>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            client,
            registry,
            events,
            config,
            symbol,
            shutdown,
        }
    }

    /// Spawn the pipeline for a ticket issued by the registry.
    pub fn execute(self: &Arc<Self>, ticket: TradeTicket) -> JoinHandle<Option<TradeRecord>> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(ticket).await })
    }

    /// Run one trade to completion and apply the result.
    pub async fn run(&self, ticket: TradeTicket) -> Option<TradeRecord> {
        let symbol = self.symbol.borrow().clone();
        let mut trade = Trade::new(ticket, symbol);
        info!(
            bot_id = %trade.ticket.bot_id,
            symbol = %trade.symbol,
            contract_type = %trade.contract_type,
            barrier = %trade.barrier,
            stake = format!("${:.2}", trade.stake()),
            "Opening trade"
        );

        match self.drive(&mut trade).await {
            Ok(settlement) => self.apply(&trade, settlement),
            Err(failure) => {
                warn!(
                    bot_id = %trade.ticket.bot_id,
                    stage = %failure.stage(),
                    contract_id = ?trade.contract_id,
                    error = %failure,
                    "Trade failed"
                );
                self.registry.abandon(&trade.ticket);
                self.events.publish(EngineEvent::TradeFailed {
                    bot_id: trade.ticket.bot_id.clone(),
                    stage: failure.stage(),
                    error: failure.to_string(),
                });
                None
            }
        }
    }

    async fn drive(&self, trade: &mut Trade) -> Result<Settlement, TradeFailure> {
        // 1. Proposal
        let request = ProposalRequest::digit(
            trade.contract_type,
            trade.stake(),
            &self.config.currency,
            &trade.symbol,
            &trade.barrier,
        );
        let proposal = self
            .client
            .proposal(&request)
            .await
            .map_err(TradeFailure::at(TradeStage::Proposal))?;
        if proposal.id.is_empty() {
            return Err(TradeFailure::Client {
                stage: TradeStage::Proposal,
                source: TradingError::MissingField("proposal.id"),
            });
        }
        debug!(bot_id = %trade.ticket.bot_id, proposal_id = %proposal.id, "Proposal received");
        trade.proposal_id = Some(proposal.id.clone());

        // 2. Buy
        let receipt = self
            .client
            .buy(&BuyRequest {
                buy: proposal.id,
                price: trade.stake(),
            })
            .await
            .map_err(TradeFailure::at(TradeStage::Buy))?;
        let contract_id = receipt.contract_id;
        trade.contract_id = Some(contract_id);
        info!(bot_id = %trade.ticket.bot_id, contract_id, "Contract purchased");
        self.events.publish(EngineEvent::TradeOpened {
            bot_id: trade.ticket.bot_id.clone(),
            contract_id,
            stake: trade.stake(),
        });

        // 3. Settle
        let max_attempts = self.config.settle_attempts.max(1);
        let mut wait = self.config.settle_delay;
        let mut attempts = 0;
        loop {
            if !self.pause(wait).await {
                return Err(TradeFailure::Cancelled {
                    stage: TradeStage::Settlement,
                });
            }
            attempts += 1;

            let status = self
                .client
                .contract_status(&ContractStatusRequest::new(contract_id))
                .await
                .map_err(TradeFailure::at(TradeStage::Settlement))?;

            if let Some(settlement) = Accountant::classify(&status, trade.stake()) {
                trade.settlement = Some(settlement);
                return Ok(settlement);
            }
            if attempts >= max_attempts {
                return Err(TradeFailure::Unsettled {
                    contract_id,
                    attempts,
                });
            }
            debug!(
                contract_id,
                attempts,
                status = ?status.status,
                "Contract still open"
            );
            wait = self.config.retry_interval;
        }
    }

    fn apply(&self, trade: &Trade, settlement: Settlement) -> Option<TradeRecord> {
        let report = self.registry.settle(&trade.ticket, settlement)?;
        let record = TradeRecord {
            timestamp: Utc::now(),
            bot_id: trade.ticket.bot_id.clone(),
            contract_type: trade.contract_type,
            barrier: trade.barrier.clone(),
            stake: trade.stake(),
            contract_id: trade.contract_id.unwrap_or_default(),
            outcome: settlement.outcome,
            profit: settlement.profit,
        };

        info!(
            bot_id = %record.bot_id,
            contract_id = record.contract_id,
            outcome = %record.outcome,
            profit = format!("${:.2}", record.profit),
            session_profit = format!("${:.2}", report.session.session_profit),
            win_rate = format!("{:.1}%", report.bot.win_rate() * 100.0),
            "Trade settled"
        );

        self.events.publish(EngineEvent::TradeSettled {
            record: record.clone(),
            session: report.session,
        });
        Some(record)
    }

    /// Sleep unless shutdown arrives first. Returns false on shutdown.
    async fn pause(&self, duration: Duration) -> bool {
        if *self.shutdown.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = shutdown_signal(self.shutdown.clone()) => false,
        }
    }
}

/// Resolves once the flag flips to true. Never resolves if the sender is gone.
pub(crate) async fn shutdown_signal(mut rx: watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
