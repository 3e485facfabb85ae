//! CASCADE — multi-leg flash-borrow arbitrage engine
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores statistics from disk (or starts fresh), and runs the
//! scheduler until Ctrl+C, then flushes statistics and exits.

use anyhow::Result;
use std::sync::Arc;
use tracing::{info, warn};

use cascade::config::{EngineConfig, DEFAULT_CONFIG_FILE};
use cascade::engine::{CascadeEngine, EngineDeps};
use cascade::oracle::fallback::StaticFeed;
use cascade::oracle::http::HttpPriceFeed;
use cascade::oracle::MarketFeed;
use cascade::storage::JsonFileStore;

const BANNER: &str = r#"
  ____    _    ____   ____    _    ____  _____
 / ___|  / \  / ___| / ___|  / \  |  _ \| ____|
| |     / _ \ \___ \| |     / _ \ | | | |  _|
| |___ / ___ \ ___) | |___ / ___ \| |_| | |___
 \____/_/   \_\____/ \____/_/   \_\____/|_____|

  Multi-leg flash-borrow arbitrage engine
  v0.1.0 — paper execution
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    init_logging();

    let config_path = std::env::var("CASCADE_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_FILE.to_string());
    let cfg = EngineConfig::load_or_default(&config_path);

    println!("{BANNER}");
    info!(
        config = %config_path,
        mode = %cfg.mode,
        max_depth = cfg.max_depth,
        base = format!("{} {}", cfg.base_borrow_amount, cfg.base_borrow_asset),
        venues = cfg.venues.join(","),
        scan_interval_secs = cfg.scan_interval_secs,
        "CASCADE starting up"
    );

    let feed: Arc<dyn MarketFeed> = match std::env::var("CASCADE_PRICE_API") {
        Ok(url) => {
            let key = std::env::var("CASCADE_PRICE_API_KEY").ok();
            info!(url = %url, "Using HTTP price feed");
            Arc::new(HttpPriceFeed::new(&url, key)?)
        }
        Err(_) => {
            warn!("CASCADE_PRICE_API not set — pricing from static fallback tables");
            Arc::new(StaticFeed::new())
        }
    };

    let stats_path = std::env::var("CASCADE_STATS").unwrap_or_else(|_| cfg.stats_path.clone());
    let store = Arc::new(JsonFileStore::new(stats_path));

    let engine = CascadeEngine::new(cfg, EngineDeps::new(feed, store));

    let resumed = engine.stats().await;
    if resumed.total_routes > 0 {
        info!(
            routes = resumed.total_routes,
            profit = format!("${:.2}", resumed.total_profit_usd),
            "Resumed from saved statistics"
        );
    }

    engine.start().await;
    info!("Engine running. Press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");

    engine.stop().await;

    let stats = engine.stats().await;
    info!(
        routes = stats.total_routes,
        successful = stats.successful_routes,
        failed = stats.failed_routes,
        avg_depth = format!("{:.2}", stats.avg_depth),
        profit = format!("${:.2}", stats.total_profit_usd),
        best = stats.best_trade.as_ref().map(|b| format!("${:.2} {}", b.profit_usd, b.description)).unwrap_or_default(),
        "CASCADE shut down cleanly."
    );

    Ok(())
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("cascade=info"));

    if std::env::var("CASCADE_LOG_JSON").is_ok() {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt().with_env_filter(env_filter).with_target(true).init();
    }
}
