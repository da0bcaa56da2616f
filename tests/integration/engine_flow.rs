//! End-to-end engine scenarios: triggers, execution, accounting, risk halts
//! and the tick loop, all against the in-memory mock client.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

use digitbot::engine::events::EngineEvent;
use digitbot::engine::executor::{ExecutorConfig, TradeStage};
use digitbot::engine::{Engine, EngineConfig, RunExit};
use digitbot::strategy::{Breach, StakeConfig};
use digitbot::types::{Bot, BotKind, BotStatus, ContractType, EngineError, TradeOutcome};

use crate::mock_client::{
    quotes, quotes_for, under_eight_window, Call, MockTickSource, MockTradingClient,
    MOCK_SUBSCRIPTION,
};

fn config(stake: Decimal) -> EngineConfig {
    EngineConfig {
        bots: vec![
            Bot::new("under-8", "Under 8", BotKind::Under, 8),
            Bot::new("over-1", "Over 1", BotKind::Over, 1),
        ],
        stake: StakeConfig {
            base: stake,
            ..StakeConfig::default()
        },
        take_profit: dec!(100),
        stop_loss: dec!(100),
        executor: ExecutorConfig {
            settle_delay: Duration::from_millis(10),
            ..ExecutorConfig::default()
        },
        ..EngineConfig::default()
    }
}

fn setup(config: EngineConfig) -> (Arc<Engine>, Arc<MockTradingClient>) {
    let client = Arc::new(MockTradingClient::new());
    let engine = Arc::new(Engine::new(config, client.clone()));
    (engine, client)
}

async fn settle_all(engine: &Engine, ticks: &[digitbot::types::Quote]) -> usize {
    let handles = engine.on_quotes(ticks);
    let fired = handles.len();
    for h in handles {
        h.await.unwrap();
    }
    fired
}

async fn next_event<F>(rx: &mut broadcast::Receiver<EngineEvent>, mut pick: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            let event = rx.recv().await.unwrap();
            if pick(&event) {
                return event;
            }
        }
    })
    .await
    .expect("event not published in time")
}

// -- Execution & accounting --------------------------------------------------

#[tokio::test]
async fn test_under_eight_sends_digitunder_proposal() {
    let (engine, client) = setup(config(dec!(10)));
    assert_ok!(engine.start_bot("under-8"));

    assert_eq!(settle_all(&engine, &under_eight_window()).await, 1);

    let proposals = client.proposals();
    assert_eq!(proposals.len(), 1);
    assert_eq!(proposals[0].contract_type, ContractType::DigitUnder);
    assert_eq!(proposals[0].barrier, "8");
    assert_eq!(proposals[0].amount, dec!(10));
    assert_eq!(proposals[0].symbol, "R_100");
    assert_eq!(proposals[0].duration, 1);

    let buys = client.buys();
    assert_eq!(buys.len(), 1);
    assert_eq!(buys[0].buy, "mock-proposal-1");
    assert_eq!(buys[0].price, dec!(10));
}

#[tokio::test]
async fn test_win_credits_synthetic_payout() {
    let (engine, _client) = setup(config(dec!(10)));
    let mut rx = engine.subscribe();
    engine.start_bot("under-8").unwrap();

    settle_all(&engine, &under_eight_window()).await;

    let bot = engine.registry().bot("under-8").unwrap();
    assert_eq!(bot.status, BotStatus::Running);
    assert_eq!((bot.trades, bot.wins, bot.losses), (1, 1, 0));
    assert_eq!(engine.session().session_profit, dec!(9.00));

    let event = next_event(&mut rx, |e| matches!(e, EngineEvent::TradeSettled { .. })).await;
    let EngineEvent::TradeSettled { record, session } = event else {
        unreachable!()
    };
    assert_eq!(record.outcome, TradeOutcome::Won);
    assert_eq!(record.profit, dec!(9));
    assert_eq!(record.contract_id, 1000);
    assert_eq!(session.total_profit, dec!(9));
}

#[tokio::test]
async fn test_loss_debits_full_stake() {
    let (engine, client) = setup(config(dec!(10)));
    client.script_statuses(&["lost"]);
    engine.start_bot("under-8").unwrap();

    settle_all(&engine, &under_eight_window()).await;

    let bot = engine.registry().bot("under-8").unwrap();
    assert_eq!((bot.trades, bot.wins, bot.losses), (1, 0, 1));
    assert_eq!(bot.consecutive_losses, 1);
    assert_eq!(engine.session().session_profit, dec!(-10));
}

#[tokio::test]
async fn test_both_directions_fire_independently() {
    let (engine, client) = setup(config(dec!(1)));
    assert_eq!(engine.start_all(), 2);

    assert_eq!(settle_all(&engine, &under_eight_window()).await, 2);

    let mut types: Vec<ContractType> =
        client.proposals().iter().map(|p| p.contract_type).collect();
    types.sort_by_key(|t| t.to_string());
    assert_eq!(types, vec![ContractType::DigitOver, ContractType::DigitUnder]);
    assert_eq!(engine.session().session_profit, dec!(1.8));
}

#[tokio::test]
async fn test_below_threshold_no_trade() {
    let (engine, client) = setup(config(dec!(1)));
    engine.start_bot("under-8").unwrap();

    // 50% under 8
    let mut digits = vec![2u8; 50];
    digits.extend(vec![9u8; 50]);
    assert_eq!(settle_all(&engine, &quotes(&digits)).await, 0);
    assert!(client.proposals().is_empty());
}

// -- Failures ------------------------------------------------------------------

#[tokio::test]
async fn test_proposal_error_reverts_bot() {
    let (engine, client) = setup(config(dec!(1)));
    client.set_error(Call::Proposal, "Barrier out of range");
    let mut rx = engine.subscribe();
    engine.start_bot("under-8").unwrap();

    settle_all(&engine, &under_eight_window()).await;

    let bot = engine.registry().bot("under-8").unwrap();
    assert_eq!(bot.status, BotStatus::Running);
    assert_eq!(bot.trades, 0);
    assert_eq!(engine.session().session_profit, Decimal::ZERO);

    let event = next_event(&mut rx, |e| matches!(e, EngineEvent::TradeFailed { .. })).await;
    let EngineEvent::TradeFailed { bot_id, stage, error } = event else {
        unreachable!()
    };
    assert_eq!(bot_id, "under-8");
    assert_eq!(stage, TradeStage::Proposal);
    assert!(error.contains("Barrier out of range"));
}

#[tokio::test]
async fn test_buy_and_status_errors_revert_bot() {
    let (engine, client) = setup(config(dec!(1)));
    engine.start_bot("under-8").unwrap();

    client.set_error(Call::Buy, "Insufficient balance");
    settle_all(&engine, &under_eight_window()).await;
    assert_eq!(
        engine.registry().bot("under-8").unwrap().status,
        BotStatus::Running
    );

    client.set_error(Call::Status, "Contract not found");
    assert_eq!(settle_all(&engine, &quotes(&[2])).await, 1);
    let bot = engine.registry().bot("under-8").unwrap();
    assert_eq!(bot.status, BotStatus::Running);
    assert_eq!(bot.trades, 0);
    assert_eq!(client.buys().len(), 1);

    // recovers once the API does
    client.clear_error();
    settle_all(&engine, &quotes(&[2])).await;
    assert_eq!(engine.registry().bot("under-8").unwrap().wins, 1);
}

// -- Operator control during a trade -----------------------------------------

#[tokio::test]
async fn test_stop_while_waiting_still_accounts() {
    let (engine, _client) = setup(config(dec!(1)));
    engine.start_bot("under-8").unwrap();

    let handles = engine.on_quotes(&under_eight_window());
    assert_eq!(handles.len(), 1);
    assert_eq!(
        engine.registry().bot("under-8").unwrap().status,
        BotStatus::Waiting
    );

    let stopped = engine.stop_bot("under-8").unwrap();
    assert_eq!(stopped.status, BotStatus::Idle);

    for h in handles {
        h.await.unwrap();
    }
    let bot = engine.registry().bot("under-8").unwrap();
    assert_eq!(bot.status, BotStatus::Idle);
    assert_eq!(bot.wins, 1);
    assert_eq!(engine.session().session_profit, dec!(0.9));
}

#[tokio::test]
async fn test_restart_while_waiting_blocks_second_trade() {
    let (engine, client) = setup(config(dec!(1)));
    engine.start_bot("under-8").unwrap();

    let handles = engine.on_quotes(&under_eight_window());
    engine.stop_bot("under-8").unwrap();
    engine.start_bot("under-8").unwrap();

    // Running again, but the first contract is still open
    assert!(engine.on_quotes(&quotes(&[2])).is_empty());
    assert_eq!(engine.registry().in_flight(), 1);

    for h in handles {
        h.await.unwrap();
    }
    assert_eq!(client.proposals().len(), 1);
    let bot = engine.registry().bot("under-8").unwrap();
    assert_eq!(bot.status, BotStatus::Running);
    assert_eq!(bot.trades, 1);
    assert_eq!(engine.registry().in_flight(), 0);
}

#[tokio::test]
async fn test_operator_errors() {
    let (engine, _client) = setup(config(dec!(1)));
    assert_err!(engine.start_bot("over-9"));
    engine.start_bot("over-1").unwrap();
    assert!(matches!(
        engine.start_bot("over-1"),
        Err(EngineError::InvalidTransition { .. })
    ));
    // stopping an idle bot is a no-op
    assert_ok!(engine.stop_bot("under-8"));
}

// -- Risk guard ----------------------------------------------------------------

#[tokio::test]
async fn test_take_profit_halts_all_bots() {
    let mut cfg = config(dec!(1));
    cfg.take_profit = dec!(1.5);
    let (engine, _client) = setup(cfg);
    let mut rx = engine.subscribe();
    engine.start_all();

    settle_all(&engine, &under_eight_window()).await;

    assert_eq!(engine.session().session_profit, dec!(1.8));
    assert!(engine.bots().iter().all(|b| b.status == BotStatus::Idle));

    let event = next_event(&mut rx, |e| matches!(e, EngineEvent::SessionHalted { .. })).await;
    assert!(matches!(
        event,
        EngineEvent::SessionHalted {
            breach: Breach::TakeProfit { .. }
        }
    ));

    // nothing fires until an operator restarts
    assert!(engine.on_quotes(&quotes(&[2])).is_empty());
}

#[tokio::test]
async fn test_stop_loss_halts_and_reset_recovers() {
    let mut cfg = config(dec!(5));
    cfg.stop_loss = dec!(5);
    let (engine, client) = setup(cfg);
    client.script_statuses(&["lost"]);
    engine.start_bot("under-8").unwrap();

    settle_all(&engine, &under_eight_window()).await;
    assert_eq!(engine.session().session_profit, dec!(-5));
    assert_eq!(
        engine.registry().bot("under-8").unwrap().status,
        BotStatus::Idle
    );

    engine.reset_session();
    assert_eq!(engine.session().session_profit, Decimal::ZERO);
    assert_eq!(engine.registry().bot("under-8").unwrap().trades, 0);

    engine.start_bot("under-8").unwrap();
    assert_eq!(settle_all(&engine, &quotes(&[2])).await, 1);
    assert_eq!(engine.session().session_profit, dec!(4.5));
}

// -- Martingale ----------------------------------------------------------------

#[tokio::test]
async fn test_martingale_scales_and_resets() {
    let mut cfg = config(dec!(1));
    cfg.stake = StakeConfig {
        base: dec!(1),
        martingale_enabled: true,
        martingale_multiplier: dec!(2),
        max_stake: Some(dec!(3)),
    };
    let (engine, client) = setup(cfg);
    client.script_statuses(&["lost", "lost", "won"]);
    engine.start_bot("under-8").unwrap();

    settle_all(&engine, &under_eight_window()).await;
    for _ in 0..3 {
        settle_all(&engine, &quotes(&[2])).await;
    }

    let stakes: Vec<Decimal> = client.proposals().iter().map(|p| p.amount).collect();
    assert_eq!(stakes, vec![dec!(1), dec!(2), dec!(3), dec!(1)]);
    // -1 -2 +2.7 +0.9
    assert_eq!(engine.session().session_profit, dec!(0.6));
}

#[tokio::test]
async fn test_martingale_toggled_at_runtime() {
    let (engine, client) = setup(config(dec!(1)));
    client.script_statuses(&["lost", "lost", "won"]);
    engine.start_bot("under-8").unwrap();

    settle_all(&engine, &under_eight_window()).await;
    let config = assert_ok!(engine.set_martingale(true, dec!(3)));
    assert!(config.martingale_enabled);
    settle_all(&engine, &quotes(&[2])).await;
    assert_ok!(engine.set_martingale(false, dec!(3)));
    settle_all(&engine, &quotes(&[2])).await;

    let stakes: Vec<Decimal> = client.proposals().iter().map(|p| p.amount).collect();
    // flat, then 1 * 3^1 after one loss, then flat again
    assert_eq!(stakes, vec![dec!(1), dec!(3), dec!(1)]);
    assert_err!(engine.set_martingale(true, dec!(0.9)));
}

// -- Runtime controls ----------------------------------------------------------

#[tokio::test]
async fn test_set_stake_applies_to_next_trade() {
    let (engine, client) = setup(config(dec!(1)));
    engine.start_bot("under-8").unwrap();

    let err = assert_err!(engine.set_stake(dec!(0.2)));
    assert!(matches!(err, EngineError::Config(_)));
    assert_eq!(engine.stake_config().base, dec!(1));

    assert_ok!(engine.set_stake(dec!(2)));
    assert_eq!(settle_all(&engine, &under_eight_window()).await, 1);
    assert_eq!(client.proposals()[0].amount, dec!(2));
    assert_eq!(client.buys()[0].price, dec!(2));
    // won at the synthetic 0.9 payout
    assert_eq!(engine.session().session_profit, dec!(1.8));
}

#[tokio::test]
async fn test_markets_hide_suspended_symbols() {
    let (engine, _client) = setup(config(dec!(1)));
    let markets = assert_ok!(engine.markets().await);
    let symbols: Vec<&str> = markets.iter().map(|m| m.symbol.as_str()).collect();
    assert_eq!(symbols, vec!["R_100", "R_50"]);
}

#[tokio::test]
async fn test_set_symbol_moves_subscription_and_trades() {
    let (engine, client) = setup(config(dec!(1)));
    let (source, feed) = MockTickSource::new();
    let next_feed = source.add_feed();
    let source = Arc::new(source);
    let mut rx = engine.subscribe();

    let run = {
        let engine = Arc::clone(&engine);
        let source = Arc::clone(&source);
        tokio::spawn(async move { engine.run(source.as_ref()).await })
    };

    feed.send(quotes(&[1, 2, 3])).await.unwrap();
    next_event(&mut rx, |e| {
        matches!(e, EngineEvent::HistogramUpdated { total: 3, .. })
    })
    .await;

    assert_ok!(engine.set_symbol("R_50"));
    assert_eq!(engine.snapshot().total, 0);
    assert_eq!(engine.snapshot().symbol, "R_50");
    engine.start_bot("under-8").unwrap();

    let mut digits = vec![2u8; 70];
    digits.extend(vec![9u8; 30]);
    next_feed.send(quotes_for("R_50", &digits)).await.unwrap();
    next_event(&mut rx, |e| matches!(e, EngineEvent::TradeSettled { .. })).await;

    assert_eq!(
        source.monitored(),
        vec!["R_100".to_string(), "R_50".to_string()]
    );
    assert_eq!(source.stopped(), vec![MOCK_SUBSCRIPTION.to_string()]);
    assert_eq!(client.proposals().len(), 1);
    assert_eq!(client.proposals()[0].symbol, "R_50");
    assert_eq!(engine.snapshot().total, 100);

    engine.shutdown();
    assert_eq!(run.await.unwrap().unwrap(), RunExit::Shutdown);
    assert_eq!(
        source.stopped(),
        vec![MOCK_SUBSCRIPTION.to_string(), "mock-sub-2".to_string()]
    );
}

// -- Tick loop -----------------------------------------------------------------

#[tokio::test]
async fn test_run_loop_trades_and_stops_on_shutdown() {
    let (engine, client) = setup(config(dec!(1)));
    let (source, feed) = MockTickSource::new();
    let source = Arc::new(source);
    let mut rx = engine.subscribe();
    engine.start_bot("under-8").unwrap();

    let run = {
        let engine = Arc::clone(&engine);
        let source = Arc::clone(&source);
        tokio::spawn(async move { engine.run(source.as_ref()).await })
    };

    feed.send(under_eight_window()).await.unwrap();
    next_event(&mut rx, |e| matches!(e, EngineEvent::TradeSettled { .. })).await;
    assert_eq!(client.proposals().len(), 1);
    assert_eq!(source.monitored(), vec!["R_100".to_string()]);

    engine.shutdown();
    let exit = run.await.unwrap().unwrap();
    assert_eq!(exit, RunExit::Shutdown);
    assert_eq!(source.stopped(), vec![MOCK_SUBSCRIPTION.to_string()]);
}

#[tokio::test]
async fn test_run_loop_reports_closed_feed() {
    let (engine, _client) = setup(config(dec!(1)));
    let (source, feed) = MockTickSource::new();

    feed.send(quotes(&[1, 2, 3])).await.unwrap();
    drop(feed);

    let exit = engine.run(&source).await.unwrap();
    assert_eq!(exit, RunExit::FeedClosed);
    assert_eq!(engine.snapshot().total, 3);
    assert!(source.stopped().is_empty());
}

#[tokio::test]
async fn test_disconnect_suspends_triggers() {
    let (engine, client) = setup(config(dec!(1)));
    engine.start_bot("under-8").unwrap();

    engine.on_connection_change(false);
    assert_eq!(settle_all(&engine, &under_eight_window()).await, 0);

    engine.on_connection_change(true);
    assert_eq!(settle_all(&engine, &quotes(&[2])).await, 1);
    assert_eq!(client.proposals().len(), 1);
}
