//! Flow Trader - signal trader binary
//!
//! Wires the stream ingestion, trading engine and execution coordinator
//! together, serves health and metrics over HTTP, and shuts everything down
//! on Ctrl-C.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tokio::sync::watch;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use flow_trader::config::normalize_symbol;
use flow_trader::engine::{health_loop, HealthSnapshot, Operator, TradingEngine};
use flow_trader::execution::{BybitRestClient, ExecutionCoordinator, RetryPolicy, VenueClient};
use flow_trader::{
    Config, Credentials, IngestionHandle, MarketState, Notifier, RiskSizer, SharedMarket,
    SignalGenerator, StreamIngestion, Telemetry, TraderError, WebSocketConnector,
};

/// State shared with the HTTP handlers
struct AppState {
    market: SharedMarket,
    coordinator: Arc<ExecutionCoordinator>,
    ingestion: IngestionHandle,
    operator: Operator,
    telemetry: Arc<Telemetry>,
    imbalance_levels: usize,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting Flow Trader");

    let config = Config::load()?;
    info!(
        symbol = %config.stream.symbol,
        strategy = ?config.signal.strategy,
        order_type = ?config.execution.order_type,
        "Configuration loaded"
    );

    // Refuse to stream without the means to trade
    let credentials = Credentials::from_env()?;

    let telemetry = Arc::new(Telemetry::new()?);
    let (notifier, _alert_task) = Notifier::spawn(&config.notify);

    let retry = RetryPolicy::from_config(&config.execution);
    let venue: Arc<dyn VenueClient> =
        Arc::new(BybitRestClient::new(&config.venue, credentials, retry)?);

    let mut sizer = RiskSizer::from_config(&config.risk);
    if config.risk.fetch_instrument_filters {
        match venue.instrument_filters(&config.stream.symbol).await {
            Ok(filters) => {
                info!(qty_step = %filters.qty_step, min_qty = %filters.min_qty, "Instrument filters loaded");
                sizer = sizer.with_filters(filters);
            }
            Err(e) => {
                warn!(error = %e, "Instrument filters unavailable, using configured values");
            }
        }
    }

    let market = MarketState::new(
        &config.stream.symbol,
        config.stream.depth,
        config.stream.trade_tape_capacity,
    )
    .shared();

    let coordinator = Arc::new(ExecutionCoordinator::from_config(
        &config,
        venue.clone(),
        sizer,
        notifier.clone(),
        telemetry.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let (ingestion, ingestion_handle) = StreamIngestion::new(
        &config.stream,
        &config.venue.ws_endpoint,
        Arc::new(WebSocketConnector),
        market.clone(),
        telemetry.clone(),
        notifier.clone(),
        shutdown_rx.clone(),
    );
    let ingestion_task = tokio::spawn(ingestion.run());

    let engine = TradingEngine::new(
        &config,
        market.clone(),
        SignalGenerator::from_config(&config.signal),
        coordinator.clone(),
        venue.clone(),
        telemetry.clone(),
        ingestion_handle.book_updates(),
        shutdown_rx.clone(),
    );
    let engine_task = tokio::spawn(engine.run());

    let health_task = tokio::spawn(health_loop(
        market.clone(),
        coordinator.clone(),
        ingestion_handle.clone(),
        telemetry.clone(),
        config.signal.imbalance_levels,
        config.stream.health_check_interval(),
        shutdown_rx.clone(),
    ));

    if config.health.enabled {
        let state = Arc::new(AppState {
            market: market.clone(),
            coordinator: coordinator.clone(),
            ingestion: ingestion_handle.clone(),
            operator: Operator::new(coordinator.clone(), ingestion_handle.clone()),
            telemetry: telemetry.clone(),
            imbalance_levels: config.signal.imbalance_levels,
        });
        let bind = config.health.bind.clone();
        let shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = start_health_server(&bind, state, shutdown).await {
                warn!(error = %e, "Health server error");
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");
    shutdown_tx.send_replace(true);

    let (ingestion_result, engine_result) = tokio::join!(ingestion_task, engine_task);
    for (name, result) in [("ingestion", ingestion_result), ("engine", engine_result)] {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(task = name, error = %e, "Task ended with error"),
            Err(e) => error!(task = name, error = %e, "Task panicked"),
        }
    }
    let _ = health_task.await;

    let position = coordinator.position();
    if position.is_open() {
        warn!(
            side = ?position.side(),
            size = %position.size(),
            "Exiting with an open position"
        );
    }

    info!("Flow Trader stopped");
    Ok(())
}

/// Start HTTP server for health checks, metrics and operator control
async fn start_health_server(
    bind: &str,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .route("/control/symbol", post(change_symbol))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let addr: SocketAddr = bind.parse()?;
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;

    Ok(())
}

async fn health_check(State(state): State<Arc<AppState>>) -> Json<HealthSnapshot> {
    Json(
        HealthSnapshot::collect(
            &state.market,
            &state.coordinator,
            &state.ingestion,
            state.imbalance_levels,
        )
        .await,
    )
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, (StatusCode, String)> {
    state
        .telemetry
        .encode()
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[derive(Debug, Deserialize)]
struct SymbolChange {
    symbol: String,
}

async fn change_symbol(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SymbolChange>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state.operator.change_symbol(&request.symbol).await {
        Ok(()) => (
            StatusCode::OK,
            Json(serde_json::json!({ "symbol": normalize_symbol(&request.symbol) })),
        ),
        Err(e @ TraderError::Refused(_)) => {
            warn!(error = %e, "Symbol change refused");
            (
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "error": e.to_string() })),
            )
        }
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "error": e.to_string() })),
        ),
    }
}
