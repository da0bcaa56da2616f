//! Paper-trading simulation.
//!
//! Replays a scripted tick stream through `PaperFeed` into the engine's
//! run loop, so every contract is bought and settled by the in-process
//! paper book against the digits that follow it.

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

use digitbot::engine::events::EngineEvent;
use digitbot::engine::executor::ExecutorConfig;
use digitbot::engine::{Engine, EngineConfig, RunExit};
use digitbot::platforms::paper::{PaperClient, PaperFeed};
use digitbot::types::{Bot, BotKind, Quote, TradeOutcome, TradeRecord};

use crate::mock_client::{quotes, under_eight_window, MockTickSource};

struct Sim {
    engine: Arc<Engine>,
    paper: Arc<PaperClient>,
    feed: mpsc::Sender<Vec<Quote>>,
    events: broadcast::Receiver<EngineEvent>,
    run: tokio::task::JoinHandle<RunExit>,
}

fn start() -> Sim {
    let config = EngineConfig {
        bots: vec![
            Bot::new("under-8", "Under 8", BotKind::Under, 8),
            Bot::new("over-1", "Over 1", BotKind::Over, 1),
        ],
        take_profit: dec!(100),
        stop_loss: dec!(100),
        // poll until the exit tick arrives
        executor: ExecutorConfig {
            settle_delay: Duration::from_millis(10),
            settle_attempts: 200,
            retry_interval: Duration::from_millis(10),
            ..ExecutorConfig::default()
        },
        ..EngineConfig::default()
    };

    let paper = Arc::new(PaperClient::new());
    let engine = Arc::new(Engine::new(config, paper.clone()));
    let (source, feed) = MockTickSource::new();
    let tap = PaperFeed::new(Arc::new(source), Arc::clone(&paper));
    let events = engine.subscribe();

    let run = {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move { engine.run(&tap).await.unwrap() })
    };

    Sim {
        engine,
        paper,
        feed,
        events,
        run,
    }
}

impl Sim {
    async fn wait_open(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.paper.open_contracts() < n {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .expect("contracts not opened in time");
    }

    async fn settled(&mut self, n: usize) -> Vec<TradeRecord> {
        let mut records = Vec::new();
        tokio::time::timeout(Duration::from_secs(5), async {
            while records.len() < n {
                if let Ok(EngineEvent::TradeSettled { record, .. }) = self.events.recv().await {
                    records.push(record);
                }
            }
        })
        .await
        .expect("trades not settled in time");
        records.sort_by(|a, b| a.bot_id.cmp(&b.bot_id));
        records
    }

    async fn tick(&self, digit: u8) {
        self.feed.send(quotes(&[digit])).await.unwrap();
    }
}

#[tokio::test]
async fn test_paper_session_settles_on_following_ticks() {
    let mut sim = start();
    sim.engine.start_all();

    // history snapshot fires both bots; it never settles anything itself
    sim.feed.send(under_eight_window()).await.unwrap();
    sim.wait_open(2).await;

    // exit digit 3: over 1 and under 8 both win
    sim.tick(3).await;
    let round = sim.settled(2).await;
    assert_eq!(round[0].bot_id, "over-1");
    assert!(round.iter().all(|r| r.outcome == TradeOutcome::Won));
    assert_eq!(sim.engine.session().session_profit, dec!(1.8));

    // next tick fires again; exit digit 9 loses under 8 only
    sim.tick(2).await;
    sim.wait_open(2).await;
    sim.tick(9).await;
    let round = sim.settled(2).await;
    assert_eq!(round[0].outcome, TradeOutcome::Won);
    assert_eq!(round[1].bot_id, "under-8");
    assert_eq!(round[1].outcome, TradeOutcome::Lost);
    assert_eq!(round[1].profit, dec!(-1));
    assert_eq!(sim.engine.session().session_profit, dec!(1.7));

    let under = sim.engine.registry().bot("under-8").unwrap();
    assert_eq!((under.trades, under.wins, under.losses), (2, 1, 1));
    assert_eq!(sim.paper.open_contracts(), 0);

    sim.engine.shutdown();
    assert_eq!(sim.run.await.unwrap(), RunExit::Shutdown);
}

#[tokio::test]
async fn test_paper_session_halts_at_take_profit() {
    let mut sim = start();
    sim.engine.set_limits(dec!(1.5), dec!(100)).unwrap();
    sim.engine.start_all();

    sim.feed.send(under_eight_window()).await.unwrap();
    sim.wait_open(2).await;
    sim.tick(5).await;
    sim.settled(2).await;

    assert_eq!(sim.engine.session().session_profit, dec!(1.8));
    assert_eq!(sim.engine.registry().in_flight(), 0);
    assert!(sim
        .engine
        .bots()
        .iter()
        .all(|b| b.status == digitbot::types::BotStatus::Idle));

    // more ticks, no more contracts
    sim.tick(2).await;
    sim.tick(3).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(sim.paper.open_contracts(), 0);

    sim.engine.shutdown();
    sim.run.await.unwrap();
}
