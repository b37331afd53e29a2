// =============================================================================
// Chart Feed — Main Entry Point
// =============================================================================
//
// Loads the runtime config, picks the market data source (exchange or
// recorded fixture), then runs the chart pipeline and the consumer API until
// Ctrl+C.
// =============================================================================

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use chart_feed::api;
use chart_feed::chart_state::{ChartState, MarketSelection};
use chart_feed::indicators::IndicatorRegistry;
use chart_feed::market_data::{BinanceAdapter, FixtureAdapter, MarketDataAdapter};
use chart_feed::pipeline::ChartPipeline;
use chart_feed::runtime_config::{RuntimeConfig, DEFAULT_CONFIG_PATH};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Chart Feed — starting up");

    let mut config = RuntimeConfig::load(DEFAULT_CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config
        .apply_env_overrides()
        .context("invalid CHART_* environment override")?;

    info!(
        symbol = %config.symbol,
        interval = %config.interval,
        history_limit = config.history_limit,
        "Configured market"
    );

    // ── 2. Market data source ────────────────────────────────────────────
    let adapter: Arc<dyn MarketDataAdapter> = match &config.fixture_path {
        Some(path) => {
            info!(path = %path.display(), "Using recorded fixture as market data source");
            Arc::new(FixtureAdapter::load(path)?)
        }
        None => Arc::new(BinanceAdapter::new(
            config.rest_base_url.clone(),
            config.ws_base_url.clone(),
            config.http_timeout(),
            config.reconnect,
        )?),
    };

    // ── 3. Indicators & chart state ──────────────────────────────────────
    let registry = Arc::new(IndicatorRegistry::with_builtin());
    let state = Arc::new(ChartState::new(
        registry,
        MarketSelection {
            symbol: config.symbol.clone(),
            interval: config.interval,
        },
        config.window_capacity,
    ));
    state.register_all();
    for id in &config.enabled_indicators {
        if let Err(e) = state.set_indicator_enabled(id, true) {
            warn!(indicator = %id, error = %e, "Cannot enable configured indicator");
        }
    }

    let cancel = CancellationToken::new();

    // ── 4. Consumer API ──────────────────────────────────────────────────
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind API server to {}", config.bind_addr))?;
    info!(addr = %config.bind_addr, "API server listening");

    let app = api::router(state.clone());
    let api_cancel = cancel.clone();
    let server = tokio::spawn(async move {
        let shutdown = async move { api_cancel.cancelled().await };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!(error = %e, "API server failed");
        }
    });

    // ── 5. Chart pipeline ────────────────────────────────────────────────
    let pipeline = ChartPipeline::new(
        adapter,
        state.clone(),
        config.history_limit,
        config.history_retry(),
    );
    let pipeline_task = tokio::spawn(pipeline.run(cancel.clone()));

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");
    cancel.cancel();

    if let Err(e) = pipeline_task.await {
        error!(error = %e, "Chart pipeline task panicked");
    }
    if let Err(e) = server.await {
        error!(error = %e, "API server task panicked");
    }

    let selection = state.selection();
    config.symbol = selection.symbol;
    config.interval = selection.interval;
    config.enabled_indicators = state
        .indicator_states()
        .into_iter()
        .filter(|s| s.enabled)
        .map(|s| s.id)
        .collect();
    if let Err(e) = config.save(DEFAULT_CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("Chart Feed shut down complete.");
    Ok(())
}
