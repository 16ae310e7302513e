//! Burn Stats - HTTP service for collection burn statistics
//!
//! Serves `GET /api/get` from a time-windowed cache backed by the upstream
//! metadata provider and a local reference dataset of original traits.

use anyhow::{Context, Result};
use dotenv::dotenv;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use souls_burn_stats::{
    api::{create_router, AppState},
    config::Config,
    scrapers::{AlchemyClient, CollectionFetcher},
    stats::{refresher, StatsAggregator, StatsCache},
};

#[tokio::main]
async fn main() -> Result<()> {
    load_env();
    init_tracing();

    let config = Config::load().context("invalid configuration")?;
    info!(
        source = %config.source_contract,
        derived = %config.derived_contract,
        collection_size = config.collection_size,
        reference = %config.reference_dataset_path.display(),
        ttl_secs = config.cache_ttl_secs,
        "starting burn-stats"
    );

    let client = AlchemyClient::new(
        &config.alchemy_base_url,
        config.api_key()?,
        config.http_timeout(),
    )?;
    let fetcher = CollectionFetcher::new(Arc::new(client));
    let aggregator = StatsAggregator::new(fetcher, config.aggregator_config());
    let cache = StatsCache::with_system_clock(Arc::new(aggregator), config.cache_ttl());

    if config.warm_on_start {
        refresher::warm(&cache).await;
    }
    if let Some(every) = config.refresh_interval() {
        refresher::spawn_refresher(cache.clone(), every);
    }

    let app = create_router(AppState {
        cache,
        allow_force_refresh: config.allow_force_refresh,
    });

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("🚀 listening on http://{}", config.bind_addr);
    info!("   GET /api/get");
    info!("   GET /health");

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "souls_burn_stats=info,burn_stats=info,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_env() {
    // Standard dotenv search (cwd + parents)
    let _ = dotenv();

    // Also the crate-root .env when launched from elsewhere
    let manifest_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    if manifest_env.exists() {
        let _ = dotenv::from_path(&manifest_env);
    }
}
