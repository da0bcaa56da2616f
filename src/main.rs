//! DIGITBOT — Autonomous multi-strategy digit trading engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the Deriv feed (or the paper book) into the engine, and keeps
//! the feed alive with a backoff reconnect loop until Ctrl+C.

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use digitbot::config;
use digitbot::dashboard::spawn_dashboard;
use digitbot::engine::{Engine, RunExit};
use digitbot::platforms::deriv::{reconnect_delay, DerivClient, MAX_RECONNECT_ATTEMPTS};
use digitbot::platforms::paper::{PaperClient, PaperFeed};
use digitbot::platforms::{TickSource, TradingClient};

const BANNER: &str = r#"
 ____  ___ ____ ___ _____ ____   ___ _____
|  _ \|_ _/ ___|_ _|_   _| __ ) / _ \_   _|
| | | || | |  _ | |  | | |  _ \| | | || |
| |_| || | |_| || |  | | | |_) | |_| || |
|____/|___\____|___| |_| |____/ \___/ |_|

  Over/Under digit bots on synthetic indices
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path =
        std::env::var("DIGITBOT_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging(&cfg);

    println!("{BANNER}");
    let engine_cfg = cfg.engine_config();
    info!(
        symbol = %engine_cfg.symbol,
        sample_size = engine_cfg.sample_size.get(),
        trigger_threshold = engine_cfg.trigger_threshold,
        bots = engine_cfg.bots.len(),
        stake = format!("${:.2}", engine_cfg.stake.base),
        take_profit = format!("${:.2}", engine_cfg.take_profit),
        stop_loss = format!("${:.2}", engine_cfg.stop_loss),
        "DIGITBOT starting up"
    );

    // -- Clients ---------------------------------------------------------

    let deriv_cfg = cfg.deriv_config();
    let has_token = deriv_cfg.token.is_some();
    let deriv = Arc::new(DerivClient::new(deriv_cfg));

    if !cfg.engine.dry_run && !has_token {
        warn!(
            env = %cfg.deriv.api_token_env,
            "No API token configured, falling back to paper trading"
        );
    }
    let paper_trading = cfg.engine.dry_run || !has_token;

    let (client, feed): (Arc<dyn TradingClient>, Arc<dyn TickSource>) = if paper_trading {
        info!("Paper trading: contracts settle against the live feed");
        let paper = Arc::new(PaperClient::new());
        let feed = Arc::new(PaperFeed::new(
            Arc::clone(&deriv) as Arc<dyn TickSource>,
            Arc::clone(&paper),
        ));
        (paper as Arc<dyn TradingClient>, feed as Arc<dyn TickSource>)
    } else {
        info!("Live trading on the authorized Deriv account");
        (
            Arc::clone(&deriv) as Arc<dyn TradingClient>,
            Arc::clone(&deriv) as Arc<dyn TickSource>,
        )
    };

    let engine = Arc::new(Engine::new(engine_cfg, client));
    engine.on_connection_change(false);

    // -- Background tasks ------------------------------------------------

    {
        let engine = Arc::clone(&engine);
        let mut connection = deriv.connection();
        tokio::spawn(async move {
            loop {
                let up = *connection.borrow_and_update();
                engine.on_connection_change(up);
                if connection.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    if cfg.dashboard.enabled {
        spawn_dashboard(Arc::clone(&engine), cfg.dashboard.port);
    }

    {
        let engine = Arc::clone(&engine);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Shutdown signal received.");
                engine.shutdown();
            }
        });
    }

    // -- Feed loop -------------------------------------------------------

    info!("Entering feed loop. Press Ctrl+C to stop.");

    let mut attempt = 0u32;
    loop {
        let connected = tokio::select! {
            result = deriv.connect() => result,
            _ = engine.shutdown_requested() => break,
        };

        match connected {
            Ok(()) => {
                attempt = 0;
                match engine.run(feed.as_ref()).await {
                    Ok(RunExit::Shutdown) => break,
                    Ok(RunExit::FeedClosed) => warn!("Tick feed closed"),
                    Err(e) => error!(error = %e, "Tick subscription failed"),
                }
            }
            Err(e) => error!(error = %e, "Connection to Deriv failed"),
        }

        attempt += 1;
        if attempt > MAX_RECONNECT_ATTEMPTS {
            error!(attempts = MAX_RECONNECT_ATTEMPTS, "Giving up on reconnecting");
            break;
        }
        let delay = reconnect_delay(attempt);
        warn!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting to Deriv"
        );
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = engine.shutdown_requested() => break,
        }
    }

    engine.shutdown();
    deriv.disconnect();

    let session = engine.session();
    let bots = engine.bots();
    info!(
        trades = bots.iter().map(|b| b.trades).sum::<u64>(),
        wins = bots.iter().map(|b| b.wins).sum::<u64>(),
        session_profit = format!("${:.2}", session.session_profit),
        total_profit = format!("${:.2}", session.total_profit),
        "DIGITBOT shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging(cfg: &config::AppConfig) {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("digitbot=info"));

    let json_logging = std::env::var("DIGITBOT_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }

    let _ = cfg;
}
