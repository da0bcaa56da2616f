//! Dashboard API route handlers.
//!
//! All endpoints return JSON. State is shared via `Arc<DashboardState>`;
//! operator routes go through the engine, never around it.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::engine::events::EngineEvent;
use crate::engine::{Engine, StatsSnapshot};
use crate::platforms::{ActiveSymbol, TradingError};
use crate::strategy::{Breach, StakeConfig};
use crate::types::{Bot, BotStatus, EngineError, SessionRisk, TradeRecord};

/// Settled trades kept for display.
pub const TRADE_HISTORY: usize = 100;

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Shared state accessible by all route handlers.
pub struct DashboardState {
    pub engine: Arc<Engine>,
    pub recent_trades: RwLock<VecDeque<TradeRecord>>,
    pub last_breach: RwLock<Option<Breach>>,
    pub started_at: DateTime<Utc>,
}

impl DashboardState {
    pub fn new(engine: Arc<Engine>) -> Self {
        Self {
            engine,
            recent_trades: RwLock::new(VecDeque::with_capacity(TRADE_HISTORY)),
            last_breach: RwLock::new(None),
            started_at: Utc::now(),
        }
    }

    /// Fold one engine event into the display state.
    pub async fn record(&self, event: &EngineEvent) {
        match event {
            EngineEvent::TradeSettled { record, .. } => {
                let mut trades = self.recent_trades.write().await;
                if trades.len() == TRADE_HISTORY {
                    trades.pop_front();
                }
                trades.push_back(record.clone());
            }
            EngineEvent::SessionHalted { breach } => {
                *self.last_breach.write().await = Some(*breach);
            }
            EngineEvent::SessionReset => {
                *self.last_breach.write().await = None;
            }
            _ => {}
        }
    }
}

pub type AppState = Arc<DashboardState>;

/// Listen to engine events until the bus closes.
pub async fn record_events(state: AppState, mut rx: broadcast::Receiver<EngineEvent>) {
    loop {
        match rx.recv().await {
            Ok(event) => state.record(&event).await,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "Dashboard fell behind engine events");
            }
            Err(broadcast::error::RecvError::Closed) => {
                debug!("Engine event bus closed");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

pub enum ApiError {
    Engine(EngineError),
    /// The trading API failed a pass-through request.
    Upstream(TradingError),
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self::Engine(e)
    }
}

impl From<TradingError> for ApiError {
    fn from(e: TradingError) -> Self {
        Self::Upstream(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::Engine(e) => {
                let status = match e {
                    EngineError::UnknownBot(_) => StatusCode::NOT_FOUND,
                    EngineError::InvalidTransition { .. } => StatusCode::CONFLICT,
                    EngineError::InvalidSampleSize(_) | EngineError::Config(_) => {
                        StatusCode::BAD_REQUEST
                    }
                };
                (status, e.to_string())
            }
            ApiError::Upstream(e) => {
                warn!(error = %e, "Trading API request failed");
                (StatusCode::BAD_GATEWAY, e.to_string())
            }
        };
        let body = Json(serde_json::json!({ "error": message }));
        (status, body).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response / request types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub symbol: String,
    pub connected: bool,
    pub session: SessionRisk,
    pub stake: StakeConfig,
    pub halted_by: Option<Breach>,
    pub bots_total: usize,
    pub bots_running: usize,
    pub bots_waiting: usize,
    pub trades_in_flight: usize,
    pub trades: u64,
    pub wins: u64,
    pub losses: u64,
    pub win_rate: f64,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BotView {
    #[serde(flatten)]
    pub bot: Bot,
    pub contract_type: String,
    pub win_rate: f64,
}

impl From<Bot> for BotView {
    fn from(bot: Bot) -> Self {
        Self {
            contract_type: bot.kind.contract_type().to_string(),
            win_rate: bot.win_rate(),
            bot,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChangedResponse {
    pub changed: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SampleSizeRequest {
    pub sample_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimitsRequest {
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SymbolRequest {
    pub symbol: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StakeRequest {
    pub amount: Decimal,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MartingaleRequest {
    pub enabled: bool,
    pub multiplier: Decimal,
}

// ---------------------------------------------------------------------------
// Read handlers
// ---------------------------------------------------------------------------

/// GET /api/status
pub async fn get_status(State(state): State<AppState>) -> Json<StatusResponse> {
    let engine = &state.engine;
    let bots = engine.bots();
    let count = |s: BotStatus| bots.iter().filter(|b| b.status == s).count();
    let trades: u64 = bots.iter().map(|b| b.trades).sum();
    let wins: u64 = bots.iter().map(|b| b.wins).sum();

    Json(StatusResponse {
        symbol: engine.symbol(),
        connected: engine.is_connected(),
        session: engine.session(),
        stake: engine.stake_config(),
        halted_by: *state.last_breach.read().await,
        bots_total: bots.len(),
        bots_running: count(BotStatus::Running),
        bots_waiting: count(BotStatus::Waiting),
        trades_in_flight: engine.registry().in_flight(),
        trades,
        wins,
        losses: bots.iter().map(|b| b.losses).sum(),
        win_rate: if trades > 0 {
            wins as f64 / trades as f64
        } else {
            0.0
        },
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    })
}

/// GET /api/bots
pub async fn get_bots(State(state): State<AppState>) -> Json<Vec<BotView>> {
    Json(state.engine.bots().into_iter().map(BotView::from).collect())
}

/// GET /api/bots/:id
pub async fn get_bot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BotView>, ApiError> {
    let bot = state
        .engine
        .registry()
        .bot(&id)
        .ok_or(EngineError::UnknownBot(id))?;
    Ok(Json(bot.into()))
}

/// GET /api/stats
pub async fn get_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    Json(state.engine.snapshot())
}

/// GET /api/trades
pub async fn get_trades(State(state): State<AppState>) -> Json<Vec<TradeRecord>> {
    let trades = state.recent_trades.read().await;
    Json(trades.iter().cloned().collect())
}

/// GET /api/markets
pub async fn get_markets(
    State(state): State<AppState>,
) -> Result<Json<Vec<ActiveSymbol>>, ApiError> {
    Ok(Json(state.engine.markets().await?))
}

/// GET /health
pub async fn health() -> StatusCode {
    StatusCode::OK
}

// ---------------------------------------------------------------------------
// Operator handlers
// ---------------------------------------------------------------------------

/// POST /api/bots/:id/start
pub async fn start_bot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BotView>, ApiError> {
    Ok(Json(state.engine.start_bot(&id)?.into()))
}

/// POST /api/bots/:id/stop
pub async fn stop_bot(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<BotView>, ApiError> {
    Ok(Json(state.engine.stop_bot(&id)?.into()))
}

/// POST /api/bots/start-all
pub async fn start_all(State(state): State<AppState>) -> Json<ChangedResponse> {
    Json(ChangedResponse {
        changed: state.engine.start_all(),
    })
}

/// POST /api/bots/stop-all
pub async fn stop_all(State(state): State<AppState>) -> Json<ChangedResponse> {
    Json(ChangedResponse {
        changed: state.engine.stop_all(),
    })
}

/// POST /api/session/reset
pub async fn reset_session(State(state): State<AppState>) -> Json<SessionRisk> {
    state.engine.reset_session();
    state.recent_trades.write().await.clear();
    *state.last_breach.write().await = None;
    Json(state.engine.session())
}

/// POST /api/stats/reset
pub async fn reset_stats(State(state): State<AppState>) -> Json<StatsSnapshot> {
    state.engine.reset_stats();
    Json(state.engine.snapshot())
}

/// PUT /api/sample-size
pub async fn set_sample_size(
    State(state): State<AppState>,
    Json(req): Json<SampleSizeRequest>,
) -> Result<Json<StatsSnapshot>, ApiError> {
    state.engine.set_sample_size(req.sample_size)?;
    Ok(Json(state.engine.snapshot()))
}

/// PUT /api/limits
pub async fn set_limits(
    State(state): State<AppState>,
    Json(req): Json<LimitsRequest>,
) -> Result<Json<SessionRisk>, ApiError> {
    state.engine.set_limits(req.take_profit, req.stop_loss)?;
    Ok(Json(state.engine.session()))
}

/// PUT /api/symbol
pub async fn set_symbol(
    State(state): State<AppState>,
    Json(req): Json<SymbolRequest>,
) -> Result<Json<StatsSnapshot>, ApiError> {
    state.engine.set_symbol(&req.symbol)?;
    Ok(Json(state.engine.snapshot()))
}

/// PUT /api/stake
pub async fn set_stake(
    State(state): State<AppState>,
    Json(req): Json<StakeRequest>,
) -> Result<Json<StakeConfig>, ApiError> {
    Ok(Json(state.engine.set_stake(req.amount)?))
}

/// PUT /api/martingale
pub async fn set_martingale(
    State(state): State<AppState>,
    Json(req): Json<MartingaleRequest>,
) -> Result<Json<StakeConfig>, ApiError> {
    Ok(Json(state.engine.set_martingale(req.enabled, req.multiplier)?))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
