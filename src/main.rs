//! ROUNDKEEPER: competition lifecycle and settlement core.
//!
//! Entry point. Loads configuration, initialises structured logging, opens
//! the store, wires the price feed into the round engine and serves the
//! HTTP surface until Ctrl-C. Rounds advance only when the external
//! scheduler hits the cron endpoints.

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use roundkeeper::api::{self, ApiState, CronAuth};
use roundkeeper::config;
use roundkeeper::engine::{CronOrchestrator, RoundLifecycle};
use roundkeeper::feed::coingecko::CoinGeckoFeed;
use roundkeeper::feed::PriceFeed;
use roundkeeper::scoring::ScoringEngine;
use roundkeeper::storage::Store;

const BANNER: &str = r#"
 ____                       _ _
|  _ \ ___  _   _ _ __   __| | | _____  ___ _ __   ___ _ __
| |_) / _ \| | | | '_ \ / _` | |/ / _ \/ _ \ '_ \ / _ \ '__|
|  _ < (_) | |_| | | | | (_| |   <  __/  __/ |_) |  __/ |
|_| \_\___/ \__,_|_| |_|\__,_|_|\_\___|\___| .__/ \___|_|
                                           |_|
  Round lifecycle & settlement core v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::var("ROUNDKEEPER_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        config = %config_path,
        port = cfg.server.port,
        universe_size = cfg.universe.size,
        tolerance_hours = cfg.cron.tolerance_hours,
        "ROUNDKEEPER starting up"
    );

    // -- Initialise components -------------------------------------------

    let store = Store::connect(&cfg.database.url, cfg.database.max_connections).await?;

    let feed: Arc<dyn PriceFeed> = Arc::new(
        CoinGeckoFeed::new(&cfg.price_feed.base_url, cfg.feed_timeout(), cfg.feed_api_key())
            .context("Failed to initialise price feed")?,
    );

    let lifecycle = Arc::new(RoundLifecycle::new(
        store.clone(),
        feed,
        ScoringEngine::new(cfg.scoring.clone()),
        cfg.universe.size,
        cfg.feed_timeout(),
    ));

    let state = Arc::new(ApiState {
        orchestrator: CronOrchestrator::new(lifecycle, cfg.cron_tolerance()),
        auth: CronAuth::new(cfg.cron_secret()),
    });
    if !state.auth.is_configured() {
        warn!(env = %cfg.cron.secret_env, "Cron secret not set, trigger endpoints are disabled");
    }

    // -- Serve ------------------------------------------------------------

    api::serve(state, &cfg.server.bind, cfg.server.port).await?;

    store.close().await;
    info!("ROUNDKEEPER shut down cleanly");
    Ok(())
}

fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("roundkeeper=info,tower_http=info"));

    let json_logging = std::env::var("ROUNDKEEPER_LOG_JSON").is_ok();

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
}
