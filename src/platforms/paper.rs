//! Paper trading. Contracts never leave the process.
//!
//! Used in dry-run mode. Proposals and purchases are accepted locally and
//! each contract settles against the first digit observed after it was
//! bought. Profit is left out of the status so the engine applies its
//! synthetic payout model.
//!
//! `PaperFeed` wraps a real tick source and feeds live digits to the
//! paper book as they pass through.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::{
    ActiveSymbol, BuyReceipt, BuyRequest, ContractStatus, ContractStatusRequest, Proposal, ProposalRequest,
    TickSource, TickSubscription, TradingClient, TradingError,
};
use crate::stats::last_digit;
use crate::types::ContractType;

const FEED_BUFFER: usize = 256;

/// Synthetic indices a paper session can trade.
const PAPER_MARKETS: [(&str, u32); 5] = [
    ("R_10", 10),
    ("R_25", 25),
    ("R_50", 50),
    ("R_75", 75),
    ("R_100", 100),
];

#[derive(Debug, Clone)]
struct PaperContract {
    contract_type: ContractType,
    barrier: u8,
    exit_digit: Option<u8>,
}

impl PaperContract {
    fn status(&self) -> &'static str {
        match self.exit_digit {
            None => "open",
            Some(exit) => {
                let won = match self.contract_type {
                    ContractType::DigitOver => exit > self.barrier,
                    ContractType::DigitUnder => exit < self.barrier,
                };
                if won {
                    "won"
                } else {
                    "lost"
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct Book {
    proposals: HashMap<String, ProposalRequest>,
    contracts: HashMap<u64, PaperContract>,
    next_contract_id: u64,
}

#[derive(Debug, Default)]
pub struct PaperClient {
    book: Mutex<Book>,
}

impl PaperClient {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Settle every open contract against this digit.
    pub fn observe(&self, digit: u8) {
        let mut book = self.book();
        let mut settled = 0;
        for contract in book.contracts.values_mut() {
            if contract.exit_digit.is_none() {
                contract.exit_digit = Some(digit);
                settled += 1;
            }
        }
        if settled > 0 {
            debug!(digit, settled, "[PAPER] Contracts reached exit tick");
        }
    }

    pub fn open_contracts(&self) -> usize {
        self.book()
            .contracts
            .values()
            .filter(|c| c.exit_digit.is_none())
            .count()
    }
}

fn rejected(code: &str, message: impl Into<String>) -> TradingError {
    TradingError::Rejected {
        code: code.to_string(),
        message: message.into(),
    }
}

#[async_trait]
impl TradingClient for PaperClient {
    async fn proposal(&self, request: &ProposalRequest) -> Result<Proposal, TradingError> {
        match request.barrier.parse::<u8>() {
            Ok(b) if b <= 9 => {}
            _ => {
                return Err(rejected(
                    "InvalidBarrier",
                    format!("Barrier {} is not a digit", request.barrier),
                ))
            }
        }
        let id = format!("paper-{}", uuid::Uuid::new_v4());
        self.book().proposals.insert(id.clone(), request.clone());
        Ok(Proposal {
            id,
            ask_price: Some(request.amount),
            payout: None,
        })
    }

    async fn buy(&self, request: &BuyRequest) -> Result<BuyReceipt, TradingError> {
        let mut book = self.book();
        let proposal = book
            .proposals
            .remove(&request.buy)
            .ok_or_else(|| rejected("InvalidProposal", "Unknown or expired proposal"))?;
        let barrier = proposal.barrier.parse::<u8>().unwrap_or_default();

        book.next_contract_id += 1;
        let contract_id = book.next_contract_id;
        book.contracts.insert(
            contract_id,
            PaperContract {
                contract_type: proposal.contract_type,
                barrier,
                exit_digit: None,
            },
        );
        info!(
            contract_id,
            contract_type = %proposal.contract_type,
            barrier,
            stake = format!("${:.2}", request.price),
            "[PAPER] Contract bought"
        );
        Ok(BuyReceipt {
            contract_id,
            buy_price: Some(request.price),
            payout: None,
        })
    }

    async fn contract_status(
        &self,
        request: &ContractStatusRequest,
    ) -> Result<ContractStatus, TradingError> {
        let mut book = self.book();
        let status = book
            .contracts
            .get(&request.contract_id)
            .ok_or_else(|| rejected("InvalidContractId", "Unknown contract"))?
            .status();
        // a settled contract is reported once, then forgotten
        if status != "open" {
            book.contracts.remove(&request.contract_id);
        }
        Ok(ContractStatus {
            status: Some(status.to_string()),
            profit: None,
        })
    }

    async fn active_symbols(&self) -> Result<Vec<ActiveSymbol>, TradingError> {
        Ok(PAPER_MARKETS
            .iter()
            .map(|(symbol, index)| ActiveSymbol {
                symbol: symbol.to_string(),
                display_name: format!("Volatility {index} Index"),
                market: "synthetic_index".into(),
                market_display_name: "Derived".into(),
                is_trading_suspended: false,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Feed tap
// ---------------------------------------------------------------------------

/// Tick source that passes quotes through unchanged and feeds every live
/// tick to a `PaperClient`.
pub struct PaperFeed {
    inner: Arc<dyn TickSource>,
    paper: Arc<PaperClient>,
}

impl PaperFeed {
    pub fn new(inner: Arc<dyn TickSource>, paper: Arc<PaperClient>) -> Self {
        Self { inner, paper }
    }
}

#[async_trait]
impl TickSource for PaperFeed {
    async fn monitor(&self, symbol: &str) -> Result<TickSubscription, TradingError> {
        let mut upstream = self.inner.monitor(symbol).await?;
        let (tx, rx) = mpsc::channel(FEED_BUFFER);
        let paper = Arc::clone(&self.paper);

        tokio::spawn(async move {
            while let Some(quotes) = upstream.quotes.recv().await {
                // history snapshots arrive as one multi-quote delivery
                if let [live] = quotes.as_slice() {
                    paper.observe(last_digit(&live.raw));
                }
                if tx.send(quotes).await.is_err() {
                    break;
                }
            }
        });

        Ok(TickSubscription {
            key: upstream.key,
            quotes: rx,
        })
    }

    async fn stop_monitor(&self, symbol: &str, key: &str) -> Result<(), TradingError> {
        self.inner.stop_monitor(symbol, key).await
    }
}
