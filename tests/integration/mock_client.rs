//! Mock trading client and tick source for integration testing.
//!
//! Deterministic, in-memory implementations of `TradingClient` and
//! `TickSource`. Every request is recorded, contract statuses can be
//! scripted, and any stage can be forced to fail.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;

use digitbot::platforms::{
    ActiveSymbol, BuyReceipt, BuyRequest, ContractStatus, ContractStatusRequest, Proposal, ProposalRequest,
    TickSource, TickSubscription, TradingClient, TradingError,
};
use digitbot::types::Quote;

/// Which call a forced error applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Call {
    Proposal,
    Buy,
    Status,
}

/// A mock trading API.
///
/// Contracts settle as `won` unless statuses were queued with
/// `script_statuses`. Profit is omitted so the engine's payout model applies.
/// Lists three markets, one of them suspended.
pub struct MockTradingClient {
    proposals: Arc<Mutex<Vec<ProposalRequest>>>,
    buys: Arc<Mutex<Vec<BuyRequest>>>,
    statuses: Arc<Mutex<VecDeque<ContractStatus>>>,
    /// If set, the matching call returns this error.
    force_error: Arc<Mutex<Option<(Call, String)>>>,
    next_contract_id: AtomicU64,
}

impl MockTradingClient {
    pub fn new() -> Self {
        Self {
            proposals: Arc::new(Mutex::new(Vec::new())),
            buys: Arc::new(Mutex::new(Vec::new())),
            statuses: Arc::new(Mutex::new(VecDeque::new())),
            force_error: Arc::new(Mutex::new(None)),
            next_contract_id: AtomicU64::new(1000),
        }
    }

    /// Force the given call to fail with a rejection.
    pub fn set_error(&self, call: Call, msg: &str) {
        *self.force_error.lock().unwrap() = Some((call, msg.to_string()));
    }

    pub fn clear_error(&self) {
        *self.force_error.lock().unwrap() = None;
    }

    /// Queue statuses returned by successive status calls, e.g. `["lost", "won"]`.
    pub fn script_statuses(&self, statuses: &[&str]) {
        let mut queue = self.statuses.lock().unwrap();
        for s in statuses {
            queue.push_back(ContractStatus {
                status: Some(s.to_string()),
                profit: None,
            });
        }
    }

    pub fn proposals(&self) -> Vec<ProposalRequest> {
        self.proposals.lock().unwrap().clone()
    }

    pub fn buys(&self) -> Vec<BuyRequest> {
        self.buys.lock().unwrap().clone()
    }

    fn check(&self, call: Call) -> Result<(), TradingError> {
        match self.force_error.lock().unwrap().as_ref() {
            Some((c, msg)) if *c == call => Err(TradingError::Rejected {
                code: "MockError".into(),
                message: msg.clone(),
            }),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl TradingClient for MockTradingClient {
    async fn proposal(&self, request: &ProposalRequest) -> Result<Proposal, TradingError> {
        self.check(Call::Proposal)?;
        let mut proposals = self.proposals.lock().unwrap();
        proposals.push(request.clone());
        Ok(Proposal {
            id: format!("mock-proposal-{}", proposals.len()),
            ask_price: Some(request.amount),
            payout: None,
        })
    }

    async fn buy(&self, request: &BuyRequest) -> Result<BuyReceipt, TradingError> {
        self.check(Call::Buy)?;
        self.buys.lock().unwrap().push(request.clone());
        Ok(BuyReceipt {
            contract_id: self.next_contract_id.fetch_add(1, Ordering::SeqCst),
            buy_price: Some(request.price),
            payout: None,
        })
    }

    async fn contract_status(
        &self,
        _request: &ContractStatusRequest,
    ) -> Result<ContractStatus, TradingError> {
        self.check(Call::Status)?;
        let scripted = self.statuses.lock().unwrap().pop_front();
        Ok(scripted.unwrap_or(ContractStatus {
            status: Some("won".into()),
            profit: None,
        }))
    }

    async fn active_symbols(&self) -> Result<Vec<ActiveSymbol>, TradingError> {
        let market = |symbol: &str, name: &str, suspended: bool| ActiveSymbol {
            symbol: symbol.to_string(),
            display_name: name.to_string(),
            market: "synthetic_index".into(),
            market_display_name: "Derived".into(),
            is_trading_suspended: suspended,
        };
        Ok(vec![
            market("R_100", "Volatility 100 Index", false),
            market("R_50", "Volatility 50 Index", false),
            market("R_25", "Volatility 25 Index", true),
        ])
    }
}

/// A tick source fed by hand through the sender returned from `new`.
///
/// Each `monitor` call consumes the next queued feed; queue more with
/// `add_feed`. Subscription keys count up from `mock-sub-1`.
pub struct MockTickSource {
    feeds: Mutex<VecDeque<mpsc::Receiver<Vec<Quote>>>>,
    monitored: Mutex<Vec<String>>,
    stopped: Mutex<Vec<String>>,
}

pub const MOCK_SUBSCRIPTION: &str = "mock-sub-1";

impl MockTickSource {
    pub fn new() -> (Self, mpsc::Sender<Vec<Quote>>) {
        let source = Self {
            feeds: Mutex::new(VecDeque::new()),
            monitored: Mutex::new(Vec::new()),
            stopped: Mutex::new(Vec::new()),
        };
        let tx = source.add_feed();
        (source, tx)
    }

    /// Queue a feed for the next `monitor` call.
    pub fn add_feed(&self) -> mpsc::Sender<Vec<Quote>> {
        let (tx, rx) = mpsc::channel(64);
        self.feeds.lock().unwrap().push_back(rx);
        tx
    }

    pub fn monitored(&self) -> Vec<String> {
        self.monitored.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait]
impl TickSource for MockTickSource {
    async fn monitor(&self, symbol: &str) -> Result<TickSubscription, TradingError> {
        let quotes = self
            .feeds
            .lock()
            .unwrap()
            .pop_front()
            .ok_or(TradingError::NotReady)?;
        let mut monitored = self.monitored.lock().unwrap();
        monitored.push(symbol.to_string());
        Ok(TickSubscription {
            key: format!("mock-sub-{}", monitored.len()),
            quotes,
        })
    }

    async fn stop_monitor(&self, _symbol: &str, key: &str) -> Result<(), TradingError> {
        self.stopped.lock().unwrap().push(key.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Quotes whose last digits are exactly `digits`.
pub fn quotes(digits: &[u8]) -> Vec<Quote> {
    quotes_for("R_100", digits)
}

pub fn quotes_for(symbol: &str, digits: &[u8]) -> Vec<Quote> {
    digits
        .iter()
        .map(|d| Quote::new(symbol, format!("1302.4{d}")))
        .collect()
}

/// 100-tick window: 70 twos then 30 nines. Under 8 sits at 70%, Over 1 at 100%.
pub fn under_eight_window() -> Vec<Quote> {
    let mut digits = vec![2u8; 70];
    digits.extend(vec![9u8; 30]);
    quotes(&digits)
}
