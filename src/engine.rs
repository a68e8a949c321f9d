//! Trading engine
//!
//! Reads consistent book views, runs the configured strategy and hands its
//! decision to the execution coordinator. The imbalance strategy is driven
//! by book updates, the composite strategy by a fixed timer.

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::{Config, StopRule, StrategyKind};
use crate::error::Result;
use crate::execution::{
    ExecutionCoordinator, ExecutionOutcome, PositionSide, SkipReason, VenueClient,
};
use crate::orderbook::{OrderBookMetrics, SharedMarket};
use crate::parser::Candle;
use crate::signal::SignalGenerator;
use crate::telemetry::Telemetry;
use crate::websocket::{IngestionHandle, IngestionState};

/// Prints used for the tape momentum reported by the health task
const TAPE_MOMENTUM_PERIOD: usize = 100;

/// Candles fetched for indicator strategies and ATR stops
struct CandleCache {
    candles: Vec<Candle>,
    symbol: String,
    fetched_at: Option<Instant>,
}

pub struct TradingEngine {
    market: SharedMarket,
    generator: SignalGenerator,
    coordinator: Arc<ExecutionCoordinator>,
    venue: Arc<dyn VenueClient>,
    telemetry: Arc<Telemetry>,
    book_updates: Arc<Notify>,
    shutdown: watch::Receiver<bool>,
    view_levels: usize,
    needs_candles: bool,
    kline_interval: String,
    kline_limit: u32,
    evaluation_interval: Duration,
    cache: CandleCache,
}

impl TradingEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &Config,
        market: SharedMarket,
        generator: SignalGenerator,
        coordinator: Arc<ExecutionCoordinator>,
        venue: Arc<dyn VenueClient>,
        telemetry: Arc<Telemetry>,
        book_updates: Arc<Notify>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        let needs_candles = generator.strategy().kind() == StrategyKind::Composite
            || matches!(config.risk.stop, StopRule::Atr { .. });

        Self {
            market,
            generator,
            coordinator,
            venue,
            telemetry,
            book_updates,
            shutdown,
            view_levels: config.stream.depth,
            needs_candles,
            kline_interval: config.signal.kline_interval.clone(),
            kline_limit: config.signal.kline_limit,
            evaluation_interval: config.signal.evaluation_interval(),
            cache: CandleCache {
                candles: Vec::new(),
                symbol: String::new(),
                fetched_at: None,
            },
        }
    }

    /// Evaluate until shutdown. Shutdown is only observed between
    /// evaluations, so an order already in flight runs to completion.
    pub async fn run(mut self) -> Result<()> {
        let kind = self.generator.strategy().kind();
        info!(strategy = ?kind, "Trading engine started");

        match kind {
            StrategyKind::Imbalance => {
                let updates = self.book_updates.clone();
                loop {
                    tokio::select! {
                        _ = self.shutdown.changed() => {}
                        _ = updates.notified() => {
                            self.evaluate_once().await;
                        }
                    }
                    if self.stopping() {
                        break;
                    }
                }
            }
            StrategyKind::Composite => {
                let mut ticker = interval(self.evaluation_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    tokio::select! {
                        _ = self.shutdown.changed() => {}
                        _ = ticker.tick() => {
                            self.evaluate_once().await;
                        }
                    }
                    if self.stopping() {
                        break;
                    }
                }
            }
        }

        info!("Trading engine stopped");
        Ok(())
    }

    fn stopping(&self) -> bool {
        // A dropped sender means the process is going down
        *self.shutdown.borrow() || self.shutdown.has_changed().is_err()
    }

    /// One evaluate-and-execute pass over the current market state
    pub async fn evaluate_once(&mut self) -> Option<ExecutionOutcome> {
        let view = {
            let market = self.market.read().await;
            market.view(self.view_levels)
        };

        // Early out only; the coordinator re-checks under its lock
        if self.coordinator.symbol().await != view.symbol {
            debug!(book = %view.symbol, "Symbol change in progress, skipping evaluation");
            return None;
        }

        let candles = if self.needs_candles {
            self.refresh_candles(&view.symbol).await;
            self.cache.candles.clone()
        } else {
            Vec::new()
        };

        let price = view.midpoint().or_else(|| {
            candles
                .last()
                .and_then(|c| Decimal::from_f64(c.close))
        });

        if self.coordinator.position().is_open() {
            if let Some(mark) = view.midpoint() {
                if let Some(outcome) = self.coordinator.check_exit(&view.symbol, mark).await {
                    log_outcome(&outcome);
                    return Some(outcome);
                }
            }
        }

        let output = self.generator.evaluate(&view, &candles, price);
        if output.vetoed {
            self.telemetry.signals_vetoed.inc();
        }
        if output.decision.is_hold() {
            return Some(ExecutionOutcome::Skipped(SkipReason::Hold));
        }

        info!(
            decision = ?output.decision,
            score = output.score,
            price = ?price,
            "Signal generated"
        );
        let outcome = self
            .coordinator
            .on_signal(&view.symbol, output.decision, price, &candles)
            .await;
        log_outcome(&outcome);
        Some(outcome)
    }

    async fn refresh_candles(&mut self, symbol: &str) {
        let fresh = self.cache.symbol == symbol
            && self
                .cache
                .fetched_at
                .map(|at| at.elapsed() < self.evaluation_interval)
                .unwrap_or(false);
        if fresh {
            return;
        }

        match self
            .venue
            .fetch_candles(symbol, &self.kline_interval, self.kline_limit)
            .await
        {
            Ok(candles) => {
                debug!(symbol = %symbol, count = candles.len(), "Candles refreshed");
                self.cache = CandleCache {
                    candles,
                    symbol: symbol.to_string(),
                    fetched_at: Some(Instant::now()),
                };
            }
            Err(e) => {
                warn!(symbol = %symbol, error = %e, "Candle fetch failed, evaluating without fresh candles");
                if self.cache.symbol != symbol {
                    self.cache.candles.clear();
                }
            }
        }
    }
}

fn log_outcome(outcome: &ExecutionOutcome) {
    match outcome {
        ExecutionOutcome::Opened { side, qty, entry_price, order_id } => {
            info!(?side, %qty, %entry_price, order_id = %order_id, "Position opened");
        }
        ExecutionOutcome::Closed { side, qty, order_id } => {
            info!(?side, %qty, order_id = %order_id, "Position closed");
        }
        ExecutionOutcome::Skipped(reason) => debug!(?reason, "Decision skipped"),
        ExecutionOutcome::Rejected { code, message } => {
            warn!(code, message = %message, "Order rejected by venue");
        }
        ExecutionOutcome::Failed(e) => warn!(error = %e, "Order failed"),
    }
}

/// Operator-facing control surface
#[derive(Clone)]
pub struct Operator {
    coordinator: Arc<ExecutionCoordinator>,
    ingestion: IngestionHandle,
}

impl Operator {
    pub fn new(coordinator: Arc<ExecutionCoordinator>, ingestion: IngestionHandle) -> Self {
        Self {
            coordinator,
            ingestion,
        }
    }

    /// Switch the traded instrument; refused while a position is open
    pub async fn change_symbol(&self, symbol: &str) -> Result<()> {
        self.coordinator.change_symbol(symbol).await?;
        self.ingestion.change_symbol(symbol).await
    }
}

/// Point-in-time status served by `/health` and logged by the health task
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub status: &'static str,
    pub ingestion: IngestionState,
    pub symbol: String,
    pub book: OrderBookMetrics,
    pub tape_len: usize,
    pub tape_vwap: Option<Decimal>,
    pub tape_momentum: Option<f64>,
    pub buy_volume: Decimal,
    pub sell_volume: Decimal,
    pub position_side: PositionSide,
    pub position_size: Decimal,
    pub entry_price: Option<Decimal>,
    pub timestamp: String,
}

impl HealthSnapshot {
    pub async fn collect(
        market: &SharedMarket,
        coordinator: &ExecutionCoordinator,
        ingestion: &IngestionHandle,
        imbalance_levels: usize,
    ) -> Self {
        let (symbol, book, tape_len, tape_vwap, tape_momentum, (buy_volume, sell_volume)) = {
            let market = market.read().await;
            (
                market.symbol().to_string(),
                market.metrics(imbalance_levels),
                market.tape().len(),
                market.tape().vwap(),
                market.tape().chande_momentum(TAPE_MOMENTUM_PERIOD),
                market.tape().volume_split(),
            )
        };
        let state = ingestion.state();
        let position = coordinator.position();

        let status = if state == IngestionState::Streaming && book.is_healthy() {
            "healthy"
        } else {
            "degraded"
        };

        Self {
            status,
            ingestion: state,
            symbol,
            book,
            tape_len,
            tape_vwap,
            tape_momentum,
            buy_volume,
            sell_volume,
            position_side: position.side(),
            position_size: position.size(),
            entry_price: position.entry_price(),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Periodic diagnostic log line until shutdown
pub async fn health_loop(
    market: SharedMarket,
    coordinator: Arc<ExecutionCoordinator>,
    ingestion: IngestionHandle,
    telemetry: Arc<Telemetry>,
    imbalance_levels: usize,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticker.tick().await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                let snapshot = HealthSnapshot::collect(&market, &coordinator, &ingestion, imbalance_levels).await;
                info!(
                    status = snapshot.status,
                    ingestion = ?snapshot.ingestion,
                    symbol = %snapshot.symbol,
                    synced = snapshot.book.synced,
                    mid_price = ?snapshot.book.mid_price,
                    spread_bps = ?snapshot.book.spread_bps,
                    imbalance = ?snapshot.book.imbalance,
                    tape_len = snapshot.tape_len,
                    tape_vwap = ?snapshot.tape_vwap,
                    tape_cmi = ?snapshot.tape_momentum,
                    buy_volume = %snapshot.buy_volume,
                    sell_volume = %snapshot.sell_volume,
                    position = ?snapshot.position_side,
                    frames = telemetry.frames_received.get(),
                    dropped = telemetry.frames_dropped.get(),
                    reconnects = telemetry.reconnects.get(),
                    "Health check"
                );
            }
        }
    }
}
