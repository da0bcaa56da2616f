//! Deriv websocket API client.
//!
//! One websocket carries everything: request/response calls correlated by
//! `req_id`, streamed tick subscriptions, and a keep-alive ping.
//! A writer task owns the sink and drains an outbound channel; a reader
//! task dispatches each frame either to a waiting caller or to the tick
//! route that owns its `req_id`.
//!
//! The client handle survives reconnects: `connect()` replaces the
//! session underneath it and republishes connection status on a watch
//! channel.
//!
//! API docs: https://api.deriv.com/

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use super::{
    ActiveSymbol, BuyReceipt, BuyRequest, ContractStatus, ContractStatusRequest, Proposal, ProposalRequest,
    TickSource, TickSubscription, TradingClient, TradingError,
};
use crate::types::Quote;

pub const DEFAULT_ENDPOINT: &str = "wss://ws.derivws.com/websockets/v3";
pub const DEFAULT_APP_ID: &str = "1089";

const PING_INTERVAL: Duration = Duration::from_secs(30);
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(30);

/// Reconnect attempts before giving up.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

/// Backoff before reconnect attempt `n` (1-based): `min(2^n s, 30 s)`.
pub fn reconnect_delay(attempt: u32) -> Duration {
    let secs = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    Duration::from_secs(secs).min(MAX_RECONNECT_DELAY)
}

/// Feed deliveries buffered per subscription.
const QUOTE_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct DerivConfig {
    pub endpoint: String,
    pub app_id: String,
    pub token: Option<SecretString>,
    pub request_timeout: Duration,
    /// Ticks requested as history when a subscription starts.
    pub history_count: u32,
}

impl Default for DerivConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            app_id: DEFAULT_APP_ID.to_string(),
            token: None,
            request_timeout: Duration::from_secs(10),
            history_count: 5000,
        }
    }
}

impl DerivConfig {
    pub fn url(&self) -> String {
        format!("{}?app_id={}", self.endpoint, self.app_id)
    }
}

// ---------------------------------------------------------------------------
// Shared session state
// ---------------------------------------------------------------------------

struct TickRoute {
    symbol: String,
    pip_size: Option<u32>,
    subscription_id: Option<String>,
    tx: mpsc::Sender<Vec<Quote>>,
}

struct Shared {
    /// Bumped whenever a session is replaced or closed.
    generation: Mutex<u64>,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Mutex<HashMap<u64, oneshot::Sender<Value>>>,
    routes: Mutex<HashMap<u64, TickRoute>>,
    connected: watch::Sender<bool>,
}

fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Shared {
    fn send(&self, text: String) -> Result<(), TradingError> {
        let outbound = locked(&self.outbound);
        let tx = outbound.as_ref().ok_or(TradingError::NotReady)?;
        tx.send(text).map_err(|_| TradingError::NotReady)
    }

    async fn dispatch(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "Undecodable frame from Deriv");
                return;
            }
        };
        let req_id = value.get("req_id").and_then(Value::as_u64);
        let msg_type = value
            .get("msg_type")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        if let Some(id) = req_id {
            if msg_type == "history" || msg_type == "tick" {
                self.route_ticks(id, &msg_type, &value).await;
            }
            let waiter = locked(&self.pending).remove(&id);
            if let Some(tx) = waiter {
                let _ = tx.send(value);
            }
        } else if let Some(err) = value.get("error") {
            warn!(error = %err, "Deriv error without req_id");
        }
    }

    async fn route_ticks(&self, req_id: u64, msg_type: &str, value: &Value) {
        let (symbol, pip_size, tx) = {
            let mut routes = locked(&self.routes);
            let Some(route) = routes.get_mut(&req_id) else {
                return;
            };
            if let Some(pip) = pip_size_of(value) {
                route.pip_size = Some(pip);
            }
            if route.subscription_id.is_none() {
                route.subscription_id = subscription_id_of(value);
            }
            (route.symbol.clone(), route.pip_size, route.tx.clone())
        };

        let quotes = if msg_type == "history" {
            parse_history(&symbol, value, pip_size)
        } else {
            parse_tick(&symbol, value, pip_size).into_iter().collect()
        };
        if quotes.is_empty() {
            return;
        }
        if tx.send(quotes).await.is_err() {
            debug!(symbol = %symbol, "Tick receiver dropped, removing route");
            locked(&self.routes).remove(&req_id);
        }
    }

    fn generation(&self) -> u64 {
        *locked(&self.generation)
    }

    /// Connection lost: fail pending calls and end every tick subscription.
    /// A no-op once `generation` is no longer the current session.
    fn teardown(&self, generation: u64) -> bool {
        let current = locked(&self.generation);
        if *current != generation {
            return false;
        }
        self.clear();
        true
    }

    /// Close whatever session is current and start a new generation.
    fn close_session(&self) -> u64 {
        let mut current = locked(&self.generation);
        self.clear();
        *current += 1;
        *current
    }

    fn clear(&self) {
        locked(&self.outbound).take();
        locked(&self.pending).clear();
        locked(&self.routes).clear();
        self.connected.send_replace(false);
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct DerivClient {
    config: DerivConfig,
    shared: Arc<Shared>,
    next_req_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DerivClient {
    pub fn new(config: DerivConfig) -> Self {
        let (connected, _) = watch::channel(false);
        Self {
            config,
            shared: Arc::new(Shared {
                generation: Mutex::new(0),
                outbound: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                routes: Mutex::new(HashMap::new()),
                connected,
            }),
            next_req_id: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Connection status updates. `true` while a session is open.
    pub fn connection(&self) -> watch::Receiver<bool> {
        self.shared.connected.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        *self.shared.connected.borrow()
    }

    /// Open a fresh session, replacing any previous one, and authorize when
    /// a token is configured.
    pub async fn connect(&self) -> Result<(), TradingError> {
        self.disconnect();
        let generation = self.shared.generation();

        let url = self.config.url();
        info!(endpoint = %self.config.endpoint, "Connecting to Deriv");
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| TradingError::Transport(e.to_string()))?;
        let (mut sink, mut source) = stream.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<String>();

        let writer = tokio::spawn(async move {
            let mut ping = tokio::time::interval_at(
                tokio::time::Instant::now() + PING_INTERVAL,
                PING_INTERVAL,
            );
            loop {
                let text = tokio::select! {
                    next = rx.recv() => match next {
                        Some(text) => text,
                        None => break,
                    },
                    _ = ping.tick() => json!({ "ping": 1 }).to_string(),
                };
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    warn!(error = %e, "Deriv write failed");
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let shared = Arc::clone(&self.shared);
        let reader = tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                match frame {
                    Ok(Message::Text(text)) => shared.dispatch(text.as_str()).await,
                    Ok(Message::Close(reason)) => {
                        info!(reason = ?reason, "Deriv closed the connection");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Deriv websocket error");
                        break;
                    }
                }
            }
            if shared.teardown(generation) {
                debug!(generation, "Deriv session torn down");
            }
        });

        *locked(&self.shared.outbound) = Some(tx);
        {
            let mut tasks = locked(&self.tasks);
            tasks.push(writer);
            tasks.push(reader);
        }
        self.shared.connected.send_replace(true);
        info!("Connected to Deriv");

        if let Some(token) = &self.config.token {
            let reply = self
                .request(json!({ "authorize": token.expose_secret() }))
                .await?;
            let login = reply
                .pointer("/authorize/loginid")
                .and_then(Value::as_str)
                .unwrap_or("unknown");
            info!(loginid = %login, "Authorized with Deriv");
        }
        Ok(())
    }

    /// Close the current session, if any.
    pub fn disconnect(&self) {
        let tasks: Vec<JoinHandle<()>> = locked(&self.tasks).drain(..).collect();
        for task in tasks {
            task.abort();
        }
        // an aborted reader may still be finishing its own teardown
        self.shared.close_session();
    }

    fn next_req_id(&self) -> u64 {
        self.next_req_id.fetch_add(1, Ordering::SeqCst)
    }

    async fn request(&self, payload: Value) -> Result<Value, TradingError> {
        let req_id = self.next_req_id();
        self.request_with_id(req_id, payload).await
    }

    async fn request_with_id(&self, req_id: u64, mut payload: Value) -> Result<Value, TradingError> {
        let Value::Object(map) = &mut payload else {
            return Err(TradingError::Transport("request is not a JSON object".into()));
        };
        map.insert("req_id".into(), req_id.into());

        let (tx, rx) = oneshot::channel();
        locked(&self.shared.pending).insert(req_id, tx);
        if let Err(e) = self.shared.send(payload.to_string()) {
            locked(&self.shared.pending).remove(&req_id);
            return Err(e);
        }

        let reply = match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => {
                return Err(TradingError::Transport(
                    "connection closed before reply".into(),
                ))
            }
            Err(_) => {
                locked(&self.shared.pending).remove(&req_id);
                return Err(TradingError::Timeout(self.config.request_timeout));
            }
        };
        check_error(reply)
    }

    async fn call<Req: Serialize + Sync, Resp: DeserializeOwned>(
        &self,
        request: &Req,
        field: &'static str,
    ) -> Result<Resp, TradingError> {
        let reply = self.request(serde_json::to_value(request)?).await?;
        take_field(reply, field)
    }
}

impl Drop for DerivClient {
    fn drop(&mut self) {
        for task in locked(&self.tasks).drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl TradingClient for DerivClient {
    async fn proposal(&self, request: &ProposalRequest) -> Result<Proposal, TradingError> {
        self.call(request, "proposal").await
    }

    async fn buy(&self, request: &BuyRequest) -> Result<BuyReceipt, TradingError> {
        self.call(request, "buy").await
    }

    async fn contract_status(
        &self,
        request: &ContractStatusRequest,
    ) -> Result<ContractStatus, TradingError> {
        self.call(request, "proposal_open_contract").await
    }

    async fn active_symbols(&self) -> Result<Vec<ActiveSymbol>, TradingError> {
        let reply = self
            .request(json!({ "active_symbols": "brief", "product_type": "basic" }))
            .await?;
        take_field(reply, "active_symbols")
    }
}

#[async_trait]
impl TickSource for DerivClient {
    async fn monitor(&self, symbol: &str) -> Result<TickSubscription, TradingError> {
        let req_id = self.next_req_id();
        let (tx, rx) = mpsc::channel(QUOTE_BUFFER);
        locked(&self.shared.routes).insert(
            req_id,
            TickRoute {
                symbol: symbol.to_string(),
                pip_size: None,
                subscription_id: None,
                tx,
            },
        );

        let payload = json!({
            "ticks_history": symbol,
            "adjust_start_time": 1,
            "count": self.config.history_count,
            "end": "latest",
            "style": "ticks",
            "subscribe": 1,
        });
        let reply = match self.request_with_id(req_id, payload).await {
            Ok(reply) => reply,
            Err(e) => {
                locked(&self.shared.routes).remove(&req_id);
                return Err(e);
            }
        };

        let key = subscription_id_of(&reply).unwrap_or_else(|| req_id.to_string());
        info!(symbol, key = %key, "Subscribed to ticks");
        Ok(TickSubscription { key, quotes: rx })
    }

    async fn stop_monitor(&self, symbol: &str, key: &str) -> Result<(), TradingError> {
        let removed = {
            let mut routes = locked(&self.shared.routes);
            let found = routes.iter().find_map(|(id, route)| {
                let matches = route.subscription_id.as_deref() == Some(key)
                    || id.to_string() == key;
                matches.then_some(*id)
            });
            found.and_then(|id| routes.remove(&id))
        };
        let Some(route) = removed else {
            debug!(symbol, key, "No active tick subscription to stop");
            return Ok(());
        };
        if let Some(id) = route.subscription_id {
            self.request(json!({ "forget": id })).await?;
        }
        info!(symbol, "Tick subscription stopped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Frame helpers
// ---------------------------------------------------------------------------

fn check_error(reply: Value) -> Result<Value, TradingError> {
    match reply.get("error") {
        Some(err) => Err(TradingError::Rejected {
            code: err
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("UnknownError")
                .to_string(),
            message: err
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }),
        None => Ok(reply),
    }
}

fn take_field<T: DeserializeOwned>(mut reply: Value, field: &'static str) -> Result<T, TradingError> {
    let value = reply
        .get_mut(field)
        .map(Value::take)
        .filter(|v| !v.is_null())
        .ok_or(TradingError::MissingField(field))?;
    Ok(serde_json::from_value(value)?)
}

fn pip_size_of(value: &Value) -> Option<u32> {
    value
        .get("pip_size")
        .or_else(|| value.pointer("/tick/pip_size"))
        .and_then(Value::as_u64)
        .map(|p| p as u32)
}

fn subscription_id_of(value: &Value) -> Option<String> {
    value
        .pointer("/subscription/id")
        .and_then(Value::as_str)
        .map(String::from)
}

/// Render a price with the symbol's pip size so trailing zeros are kept.
pub fn format_quote(price: f64, pip_size: Option<u32>) -> String {
    match pip_size {
        Some(pip) => format!("{price:.prec$}", prec = pip as usize),
        None => price.to_string(),
    }
}

fn parse_history(symbol: &str, value: &Value, pip_size: Option<u32>) -> Vec<Quote> {
    let Some(prices) = value.pointer("/history/prices").and_then(Value::as_array) else {
        return Vec::new();
    };
    let times = value.pointer("/history/times").and_then(Value::as_array);
    prices
        .iter()
        .enumerate()
        .filter_map(|(i, price)| {
            let price = price.as_f64()?;
            let mut quote = Quote::new(symbol, format_quote(price, pip_size));
            quote.epoch = times.and_then(|t| t.get(i)).and_then(Value::as_i64);
            Some(quote)
        })
        .collect()
}

fn parse_tick(symbol: &str, value: &Value, pip_size: Option<u32>) -> Option<Quote> {
    let tick = value.get("tick")?;
    let price = tick.get("quote").and_then(Value::as_f64)?;
    let mut quote = Quote::new(symbol, format_quote(price, pip_size));
    quote.epoch = tick.get("epoch").and_then(Value::as_i64);
    Some(quote)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
