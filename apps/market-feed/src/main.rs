//! Market Feed Binary
//!
//! Starts the streaming client, the batch poller and the HTTP endpoint.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-feed
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `MARKET_FEED_API_TOKEN`: Provider API token
//! - `MARKET_FEED_SYMBOLS`: Comma-separated symbol universe
//!
//! ## Optional
//! - `MARKET_FEED_REST_URL`: REST base URL (default: <https://finnhub.io/api/v1>)
//! - `MARKET_FEED_QUOTE_PATH`: Quote endpoint template (default: `quote?symbol={symbol}`)
//! - `MARKET_FEED_PROFILE_PATH`: Profile endpoint template (default: `stock/profile2?symbol={symbol}`)
//! - `MARKET_FEED_WS_URL`: Push channel URL (default: <wss://ws.finnhub.io>)
//! - `MARKET_FEED_HTTP_PORT`: Health/snapshot HTTP port (default: 8083)
//! - `MARKET_FEED_CACHE_DIR`: Durable profile cache (default: .cache/market-feed)
//! - `OTEL_ENABLED`: Export spans over OTLP (default: false)
//! - `RUST_LOG`: Log filter (default: `market_feed=info`)

use std::sync::Arc;

use anyhow::Context;
use market_feed::application::ports::{CacheStore, MarketDataApi};
use market_feed::infrastructure::http::RestMarketDataApi;
use market_feed::infrastructure::persistence::JsonFileCacheStore;
use market_feed::infrastructure::telemetry;
use market_feed::{
    BatchPoller, FeedConfig, HealthServer, HealthServerState, MarketFeed, MetadataCache,
    PriceStateStore, StatusReport, StreamClient, init_metrics,
};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        eprintln!("rustls crypto provider already installed");
    }

    load_dotenv();

    let _telemetry_guard = telemetry::init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Starting market feed");

    let config = match FeedConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Market feed disabled: configuration invalid");
            return Ok(());
        }
    };
    log_config(&config);

    let _metrics_handle = init_metrics().context("failed to install metrics recorder")?;

    let shutdown_token = CancellationToken::new();

    // Shared state and adapters
    let prices = Arc::new(PriceStateStore::seeded(&config.symbols));
    let api: Arc<dyn MarketDataApi> = Arc::new(
        RestMarketDataApi::new(
            config.endpoints.rest_url.clone(),
            config.token.expose(),
            config.fetch.clone(),
        )
        .context("failed to build REST client")?
        .with_paths(config.endpoints.paths.clone()),
    );
    let store: Arc<dyn CacheStore> = Arc::new(
        JsonFileCacheStore::open(&config.cache_dir)
            .await
            .with_context(|| format!("failed to open cache dir {}", config.cache_dir.display()))?,
    );
    let metadata = Arc::new(MetadataCache::new(
        Arc::clone(&api),
        store,
        config.metadata.clone(),
    ));
    let poller = Arc::new(BatchPoller::new(
        config.symbols.clone(),
        api,
        Arc::clone(&prices),
        Arc::clone(&metadata),
        config.poller.clone(),
    ));

    let (status_tx, status_rx) = watch::channel(StatusReport::default());
    let (command_tx, command_rx) = mpsc::channel(1);

    let feed = Arc::new(MarketFeed::new(
        config.symbols.clone(),
        Arc::clone(&prices),
        metadata,
        poller,
        shutdown_token.clone(),
        status_rx,
        command_tx,
    ));

    // Push channel
    let stream_client = StreamClient::new(
        config.stream_client(),
        config.symbols.clone(),
        prices,
        status_tx,
        shutdown_token.clone(),
    );
    let stream_handle = tokio::spawn(stream_client.run(command_rx));

    // Poller
    let run_id = feed.start_polling();
    tracing::info!(run_id, "Poller started");

    // HTTP endpoint
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION"),
        Arc::clone(&feed),
    ));
    let health_server = HealthServer::new(
        config.server.http_port,
        health_state,
        shutdown_token.clone(),
    );
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    tracing::info!("Market feed ready");

    await_shutdown(shutdown_token).await;

    if let Err(e) = stream_handle.await {
        tracing::warn!(error = %e, "Push channel task ended abnormally");
    }

    tracing::info!("Market feed stopped");
    Ok(())
}

/// Log the parsed configuration.
fn log_config(config: &FeedConfig) {
    tracing::info!(
        symbols = config.symbols.len(),
        http_port = config.server.http_port,
        cache_dir = %config.cache_dir.display(),
        hard_stop_secs = config.stream.hard_stop.as_secs(),
        "Configuration loaded"
    );
    tracing::debug!(
        rest_url = %config.endpoints.rest_url,
        quote_path = %config.endpoints.paths.quote,
        profile_path = %config.endpoints.paths.profile,
        ws_url = %config.endpoints.ws_url,
        "Provider endpoints"
    );
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
