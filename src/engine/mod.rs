//! Core engine: ticks → histogram → triggers → trades.
//!
//! `Engine` is the one context object handed to the binary and the
//! dashboard. It owns the aggregator, bot registry, trigger scheduler and
//! executor, and publishes every state change on its `EventBus`.

pub mod accountant;
pub mod events;
pub mod executor;
pub mod registry;

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::platforms::{ActiveSymbol, TickSource, TradingClient, TradingError};
use crate::stats::probability::{EvenOdd, ProbabilityEngine, DEFAULT_DOMINANCE_MARGIN};
use crate::stats::{SampleSize, Streak, TickAggregator};
use crate::strategy::stake::MIN_STAKE;
use crate::strategy::{StakeConfig, StakePolicy, TriggerScheduler, DEFAULT_TRIGGER_THRESHOLD};
use crate::types::{
    Bot, BotKind, DigitStat, Dominance, EngineError, Quote, SessionRisk, TradeRecord,
};

use events::{EngineEvent, EventBus};
use executor::{ExecutorConfig, TradeExecutor};
use registry::BotRegistry;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub symbol: String,
    pub sample_size: SampleSize,
    pub trigger_threshold: f64,
    pub dominance_margin: u64,
    pub bots: Vec<Bot>,
    pub stake: StakeConfig,
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    pub executor: ExecutorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            symbol: "R_100".to_string(),
            sample_size: SampleSize::default(),
            trigger_threshold: DEFAULT_TRIGGER_THRESHOLD,
            dominance_margin: DEFAULT_DOMINANCE_MARGIN,
            bots: default_roster(),
            stake: StakeConfig::default(),
            take_profit: dec!(10),
            stop_loss: dec!(10),
            executor: ExecutorConfig::default(),
        }
    }
}

/// The six stock bots: over 1/2/3 and under 8/7/6.
pub fn default_roster() -> Vec<Bot> {
    let mut bots = Vec::with_capacity(6);
    for p in [1u8, 2, 3] {
        bots.push(Bot::new(&format!("over-{p}"), &format!("Over {p}"), BotKind::Over, p));
    }
    for p in [8u8, 7, 6] {
        bots.push(Bot::new(&format!("under-{p}"), &format!("Under {p}"), BotKind::Under, p));
    }
    bots
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// Current probability for one bot's direction and barrier.
#[derive(Debug, Clone, Serialize)]
pub struct BotProbability {
    pub bot_id: String,
    pub kind: BotKind,
    pub prediction: u8,
    pub probability: f64,
}

/// Point-in-time view of the statistics, for the dashboard.
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub symbol: String,
    pub sample_size: usize,
    pub total: u64,
    pub stats: [DigitStat; 10],
    pub last_digit: Option<u8>,
    pub last_quote: Option<String>,
    pub even_odd: EvenOdd,
    pub dominance: Dominance,
    pub streak: Streak,
    pub hottest: Option<u8>,
    pub coldest: Option<u8>,
    pub trigger_threshold: f64,
    pub probabilities: Vec<BotProbability>,
    pub connected: bool,
}

/// Why `Engine::run` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Shutdown,
    FeedClosed,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

pub struct Engine {
    /// Active market. The tick loop and the executor follow changes.
    symbol: watch::Sender<String>,
    client: Arc<dyn TradingClient>,
    aggregator: Mutex<TickAggregator>,
    registry: Arc<BotRegistry>,
    scheduler: TriggerScheduler,
    stakes: Mutex<StakePolicy>,
    executor: Arc<TradeExecutor>,
    events: EventBus,
    connected: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl Engine {
    pub fn new(config: EngineConfig, client: Arc<dyn TradingClient>) -> Self {
        let events = EventBus::new();
        let registry = Arc::new(BotRegistry::new(
            config.bots,
            SessionRisk::new(config.take_profit, config.stop_loss),
            events.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (symbol, symbol_rx) = watch::channel(config.symbol);
        let executor = Arc::new(TradeExecutor::new(
            Arc::clone(&client),
            Arc::clone(&registry),
            events.clone(),
            config.executor,
            symbol_rx,
            shutdown_rx,
        ));

        Self {
            symbol,
            client,
            aggregator: Mutex::new(TickAggregator::new(config.sample_size)),
            registry,
            scheduler: TriggerScheduler::new(
                ProbabilityEngine::new(config.dominance_margin),
                config.trigger_threshold,
            ),
            stakes: Mutex::new(StakePolicy::new(config.stake)),
            executor,
            events,
            connected: AtomicBool::new(true),
            shutdown_tx,
        }
    }

    fn aggregator(&self) -> MutexGuard<'_, TickAggregator> {
        self.aggregator
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn stakes(&self) -> MutexGuard<'_, StakePolicy> {
        self.stakes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn symbol(&self) -> String {
        self.symbol.borrow().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &Arc<BotRegistry> {
        &self.registry
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    // -- Tick path -----------------------------------------------------------

    /// Ingest one feed delivery, publish the histogram, and fire triggers.
    ///
    /// Returns the handles of any trades spawned. No trades are opened while
    /// the transport is down or the window is empty. A multi-quote delivery
    /// is a history snapshot and replaces the window. Deliveries for any
    /// symbol other than the active one are dropped.
    pub fn on_quotes(&self, quotes: &[Quote]) -> Vec<JoinHandle<Option<TradeRecord>>> {
        let histogram = {
            let mut agg = self.aggregator();
            if let Some(stale) = quotes
                .first()
                .filter(|q| *self.symbol.borrow() != q.symbol)
            {
                debug!(symbol = %stale.symbol, "Dropping quotes for inactive symbol");
                return Vec::new();
            }
            match quotes {
                [] => return Vec::new(),
                [single] => {
                    agg.ingest(single);
                }
                many => {
                    agg.reset();
                    agg.ingest_batch(many);
                }
            }
            let histogram = agg.histogram().clone();
            self.events.publish(EngineEvent::HistogramUpdated {
                stats: histogram.stats.clone(),
                total: histogram.total,
                last_digit: agg.last_digit(),
                dominance: self.scheduler.probabilities().dominance(&histogram),
                streak: agg.streak(),
            });
            histogram
        };

        if !self.is_connected() {
            debug!("Transport down, skipping trigger evaluation");
            return Vec::new();
        }
        if histogram.is_empty() {
            return Vec::new();
        }

        let bots = self.registry.bots();
        let stakes = self.stakes().clone();
        self.scheduler
            .evaluate(&histogram, &bots)
            .into_iter()
            .filter_map(|decision| {
                let ticket = self.registry.begin_trade(&decision.bot_id, &stakes)?;
                info!(
                    bot_id = %decision.bot_id,
                    probability = format!("{:.1}%", decision.probability),
                    stake = format!("${:.2}", ticket.stake),
                    "Trigger fired, executing trade"
                );
                Some(self.executor.execute(ticket))
            })
            .collect()
    }

    pub fn on_connection_change(&self, connected: bool) {
        let previous = self.connected.swap(connected, Ordering::SeqCst);
        if previous == connected {
            return;
        }
        if connected {
            info!("Trading API connected");
        } else {
            warn!("Trading API disconnected, triggers suspended");
        }
        self.events
            .publish(EngineEvent::ConnectionChanged { connected });
    }

    /// Subscribe to the tick feed and process deliveries until shutdown or
    /// until the feed closes. A symbol change moves the subscription to the
    /// new market.
    pub async fn run(&self, source: &dyn TickSource) -> Result<RunExit, TradingError> {
        let mut symbol_rx = self.symbol.subscribe();
        let mut symbol = symbol_rx.borrow_and_update().clone();
        let mut subscription = source.monitor(&symbol).await?;
        info!(symbol = %symbol, key = %subscription.key, "Tick subscription active");

        let shutdown = executor::shutdown_signal(self.shutdown_tx.subscribe());
        tokio::pin!(shutdown);

        let exit = loop {
            tokio::select! {
                delivery = subscription.quotes.recv() => match delivery {
                    Some(quotes) => {
                        self.on_quotes(&quotes);
                    }
                    None => {
                        warn!(symbol = %symbol, "Tick feed closed");
                        break RunExit::FeedClosed;
                    }
                },
                Ok(()) = symbol_rx.changed() => {
                    let next = symbol_rx.borrow_and_update().clone();
                    if next == symbol {
                        continue;
                    }
                    if let Err(e) = source.stop_monitor(&symbol, &subscription.key).await {
                        debug!(error = %e, "Failed to stop tick subscription");
                    }
                    info!(from = %symbol, to = %next, "Switching symbol");
                    subscription = source.monitor(&next).await?;
                    symbol = next;
                    info!(symbol = %symbol, key = %subscription.key, "Tick subscription active");
                }
                _ = &mut shutdown => break RunExit::Shutdown,
            }
        };

        if exit == RunExit::Shutdown {
            if let Err(e) = source.stop_monitor(&symbol, &subscription.key).await {
                debug!(error = %e, "Failed to stop tick subscription");
            }
        }
        Ok(exit)
    }

    /// Signal the tick loop and all pending settlement waits to stop.
    pub fn shutdown(&self) {
        info!("Engine shutting down");
        self.shutdown_tx.send_replace(true);
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Resolves once `shutdown` has been called.
    pub async fn shutdown_requested(&self) {
        executor::shutdown_signal(self.shutdown_tx.subscribe()).await
    }

    // -- Operator controls ---------------------------------------------------

    pub fn set_sample_size(&self, size: usize) -> Result<SampleSize, EngineError> {
        let size = SampleSize::try_from(size)?;
        self.aggregator().set_sample_size(size);
        info!(sample_size = size.get(), "Sample size updated");
        self.publish_histogram();
        Ok(size)
    }

    /// Switch the traded market. Statistics restart from an empty window;
    /// trades already in flight settle on the market they opened on.
    pub fn set_symbol(&self, symbol: &str) -> Result<(), EngineError> {
        let symbol = symbol.trim();
        if symbol.is_empty() {
            return Err(EngineError::Config("symbol must not be empty".into()));
        }
        let changed = {
            let mut agg = self.aggregator();
            let changed = self.symbol.send_if_modified(|current| {
                if current == symbol {
                    return false;
                }
                *current = symbol.to_string();
                true
            });
            if changed {
                agg.reset();
            }
            changed
        };
        if changed {
            info!(symbol, "Symbol switched, statistics reset");
            self.publish_histogram();
        }
        Ok(())
    }

    /// Tradable markets, suspended ones left out.
    pub async fn markets(&self) -> Result<Vec<ActiveSymbol>, TradingError> {
        let mut markets = self.client.active_symbols().await?;
        markets.retain(|m| !m.is_trading_suspended);
        Ok(markets)
    }

    pub fn reset_stats(&self) {
        self.aggregator().reset();
        info!("Tick statistics reset");
        self.publish_histogram();
    }

    pub fn start_bot(&self, id: &str) -> Result<Bot, EngineError> {
        self.registry.start(id)
    }

    pub fn stop_bot(&self, id: &str) -> Result<Bot, EngineError> {
        self.registry.stop(id)
    }

    pub fn start_all(&self) -> usize {
        self.registry.start_all()
    }

    pub fn stop_all(&self) -> usize {
        self.registry.stop_all()
    }

    pub fn set_limits(&self, take_profit: Decimal, stop_loss: Decimal) -> Result<(), EngineError> {
        if take_profit <= Decimal::ZERO || stop_loss <= Decimal::ZERO {
            return Err(EngineError::Config(format!(
                "limits must be positive (take_profit={take_profit}, stop_loss={stop_loss})"
            )));
        }
        self.registry.set_limits(take_profit, stop_loss);
        Ok(())
    }

    pub fn reset_session(&self) {
        self.registry.reset_session();
    }

    pub fn set_stake(&self, amount: Decimal) -> Result<StakeConfig, EngineError> {
        if amount < MIN_STAKE {
            return Err(EngineError::Config(format!(
                "stake must be at least {MIN_STAKE}, got {amount}"
            )));
        }
        let config = self.update_stakes(|c| c.base = amount);
        info!(stake = format!("${:.2}", amount), "Base stake updated");
        Ok(config)
    }

    pub fn set_martingale(
        &self,
        enabled: bool,
        multiplier: Decimal,
    ) -> Result<StakeConfig, EngineError> {
        if multiplier < Decimal::ONE {
            return Err(EngineError::Config(format!(
                "martingale multiplier must be at least 1, got {multiplier}"
            )));
        }
        let config = self.update_stakes(|c| {
            c.martingale_enabled = enabled;
            c.martingale_multiplier = multiplier;
        });
        info!(enabled, multiplier = %multiplier, "Martingale updated");
        Ok(config)
    }

    /// Takes effect from the next trigger; open trades keep their stake.
    fn update_stakes(&self, change: impl FnOnce(&mut StakeConfig)) -> StakeConfig {
        let mut stakes = self.stakes();
        let mut config = stakes.config().clone();
        change(&mut config);
        *stakes = StakePolicy::new(config.clone());
        config
    }

    // -- Views ---------------------------------------------------------------

    pub fn bots(&self) -> Vec<Bot> {
        self.registry.bots()
    }

    pub fn session(&self) -> SessionRisk {
        self.registry.session()
    }

    pub fn stake_config(&self) -> StakeConfig {
        self.stakes().config().clone()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let (histogram, sample_size, last_digit, last_quote, streak) = {
            let agg = self.aggregator();
            (
                agg.histogram().clone(),
                agg.sample_size().get(),
                agg.last_digit(),
                agg.last_quote().map(str::to_string),
                agg.streak(),
            )
        };
        let probs = self.scheduler.probabilities();
        let probabilities = self
            .registry
            .bots()
            .iter()
            .map(|bot| BotProbability {
                bot_id: bot.id.clone(),
                kind: bot.kind,
                prediction: bot.prediction,
                probability: self.scheduler.probability_for(&histogram, bot),
            })
            .collect();

        StatsSnapshot {
            symbol: self.symbol(),
            sample_size,
            total: histogram.total,
            even_odd: probs.even_odd(&histogram),
            dominance: probs.dominance(&histogram),
            hottest: probs.hottest(&histogram),
            coldest: probs.coldest(&histogram),
            stats: histogram.stats,
            last_digit,
            last_quote,
            streak,
            trigger_threshold: self.scheduler.threshold(),
            probabilities,
            connected: self.is_connected(),
        }
    }

    fn publish_histogram(&self) {
        let event = {
            let agg = self.aggregator();
            let histogram = agg.histogram();
            EngineEvent::HistogramUpdated {
                stats: histogram.stats.clone(),
                total: histogram.total,
                last_digit: agg.last_digit(),
                dominance: self.scheduler.probabilities().dominance(histogram),
                streak: agg.streak(),
            }
        };
        self.events.publish(event);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
