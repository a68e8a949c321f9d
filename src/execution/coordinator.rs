//! Execution coordinator
//!
//! Sole writer of [`PositionState`]. The position check, sizing, signing and
//! submission run under one async mutex, so concurrent evaluations (book
//! updates, timer ticks, exit checks) can never open two positions.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};

use super::position::{PositionSide, PositionState};
use super::rest::{OrderRequest, OrderType, VenueClient};
use crate::config::{normalize_symbol, Config};
use crate::error::{Result, TraderError};
use crate::notify::Notifier;
use crate::parser::Candle;
use crate::risk::RiskSizer;
use crate::signal::Decision;
use crate::telemetry::Telemetry;

/// Why a decision produced no order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    Hold,
    PositionOpen,
    NoPosition,
    NoReferencePrice,
    NoStopDistance,
    ZeroSize,
    /// Execution was retargeted after the decision was computed
    SymbolChanged,
}

/// Result of handing a decision to the coordinator
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    Opened {
        side: PositionSide,
        qty: Decimal,
        entry_price: Decimal,
        order_id: String,
    },
    Closed {
        side: PositionSide,
        qty: Decimal,
        order_id: String,
    },
    Skipped(SkipReason),
    /// Venue answered with a non-zero retCode
    Rejected { code: i64, message: String },
    /// Transport failure after retries, or a local error
    Failed(String),
}

/// State guarded by the decide-and-submit lock
struct Guarded {
    symbol: String,
    position: PositionState,
}

/// Protective exit thresholds measured from the entry price
#[derive(Debug, Clone, Copy)]
pub struct ExitRule {
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
}

pub struct ExecutionCoordinator {
    venue: Arc<dyn VenueClient>,
    sizer: RiskSizer,
    order_type: OrderType,
    time_in_force: String,
    exits: ExitRule,
    guarded: Mutex<Guarded>,
    position_tx: watch::Sender<PositionState>,
    notifier: Notifier,
    telemetry: Arc<Telemetry>,
}

impl ExecutionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        symbol: &str,
        venue: Arc<dyn VenueClient>,
        sizer: RiskSizer,
        order_type: OrderType,
        time_in_force: &str,
        exits: ExitRule,
        notifier: Notifier,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        let (position_tx, _) = watch::channel(PositionState::flat());
        Self {
            venue,
            sizer,
            order_type,
            time_in_force: time_in_force.to_string(),
            exits,
            guarded: Mutex::new(Guarded {
                symbol: symbol.to_string(),
                position: PositionState::flat(),
            }),
            position_tx,
            notifier,
            telemetry,
        }
    }

    pub fn from_config(
        config: &Config,
        venue: Arc<dyn VenueClient>,
        sizer: RiskSizer,
        notifier: Notifier,
        telemetry: Arc<Telemetry>,
    ) -> Self {
        Self::new(
            &config.stream.symbol,
            venue,
            sizer,
            config.execution.order_type.into(),
            &config.execution.time_in_force,
            ExitRule {
                take_profit_pct: config.risk.take_profit_pct,
                stop_loss_pct: config.risk.stop_loss_pct,
            },
            notifier,
            telemetry,
        )
    }

    /// Latest published position; never waits on an in-flight order
    pub fn position(&self) -> PositionState {
        self.position_tx.borrow().clone()
    }

    pub fn subscribe_position(&self) -> watch::Receiver<PositionState> {
        self.position_tx.subscribe()
    }

    pub async fn symbol(&self) -> String {
        self.guarded.lock().await.symbol.clone()
    }

    /// Retarget execution to a new instrument; refused while a position is open
    pub async fn change_symbol(&self, symbol: &str) -> Result<()> {
        let mut guarded = self.guarded.lock().await;
        if guarded.position.is_open() {
            return Err(TraderError::Refused(format!(
                "cannot switch to {} with an open {:?} position on {}",
                symbol,
                guarded.position.side(),
                guarded.symbol
            )));
        }
        guarded.symbol = normalize_symbol(symbol);
        info!(symbol = %guarded.symbol, "Execution symbol changed");
        Ok(())
    }

    /// Act on a decision computed from `symbol` market data at `reference_price`
    pub async fn on_signal(
        &self,
        symbol: &str,
        decision: Decision,
        reference_price: Option<Decimal>,
        candles: &[Candle],
    ) -> ExecutionOutcome {
        if decision.is_hold() {
            return ExecutionOutcome::Skipped(SkipReason::Hold);
        }

        let mut guarded = self.guarded.lock().await;
        if guarded.symbol != symbol {
            info!(
                ?decision,
                computed_for = %symbol,
                current = %guarded.symbol,
                "Symbol changed since evaluation, dropping signal"
            );
            return ExecutionOutcome::Skipped(SkipReason::SymbolChanged);
        }
        if guarded.position.is_open() {
            info!(
                ?decision,
                open_side = ?guarded.position.side(),
                "Position already open, ignoring signal"
            );
            return ExecutionOutcome::Skipped(SkipReason::PositionOpen);
        }

        let Some(price) = reference_price.filter(|p| *p > Decimal::ZERO) else {
            info!(?decision, "No reference price, skipping signal");
            return ExecutionOutcome::Skipped(SkipReason::NoReferencePrice);
        };

        let Some(stop) = self.sizer.stop_distance(price, candles) else {
            warn!(?decision, %price, "Stop distance unavailable, refusing order");
            return ExecutionOutcome::Skipped(SkipReason::NoStopDistance);
        };

        let balance = match self.venue.wallet_balance().await {
            Ok(balance) => balance,
            Err(e) => return self.report_failure("Balance fetch", &guarded.symbol, e),
        };

        let qty = self.sizer.size_for(balance, stop, price);
        if qty.is_zero() {
            warn!(
                %balance, %stop, %price,
                "Computed size below venue minimum, refusing order"
            );
            return ExecutionOutcome::Skipped(SkipReason::ZeroSize);
        }

        let side = PositionSide::from(decision);
        let Some(order_side) = side.open_side() else {
            return ExecutionOutcome::Skipped(SkipReason::Hold);
        };
        let order = OrderRequest {
            symbol: guarded.symbol.clone(),
            side: order_side,
            order_type: self.order_type,
            qty,
            price: Some(price),
            time_in_force: self.time_in_force.clone(),
            reduce_only: false,
        };

        match self.venue.place_order(&order).await {
            Ok(ack) => {
                guarded.position.open(side, price, qty, ack.order_id.clone());
                self.publish(&guarded.position);
                self.telemetry.orders_submitted.inc();
                self.notifier.info(
                    "Order placed",
                    format!(
                        "{} {} {} @ {} (order {})",
                        order_side.as_str(),
                        qty,
                        guarded.symbol,
                        price,
                        ack.order_id
                    ),
                );
                ExecutionOutcome::Opened {
                    side,
                    qty,
                    entry_price: price,
                    order_id: ack.order_id,
                }
            }
            Err(e) => self.report_failure("Order", &guarded.symbol, e),
        }
    }

    /// Flatten the open position with an opposite-side order of the held size
    pub async fn close_position(&self, mark: Option<Decimal>, reason: &str) -> ExecutionOutcome {
        let mut guarded = self.guarded.lock().await;
        self.close_locked(&mut guarded, mark, reason).await
    }

    /// Close when `mark`, a `symbol` price, has crossed the take-profit or
    /// stop-loss threshold
    pub async fn check_exit(&self, symbol: &str, mark: Decimal) -> Option<ExecutionOutcome> {
        let mut guarded = self.guarded.lock().await;
        if guarded.symbol != symbol {
            return None;
        }
        let ret = guarded.position.unrealized_return(mark)?;

        let reason = if ret >= self.exits.take_profit_pct {
            "take profit"
        } else if ret <= -self.exits.stop_loss_pct {
            "stop loss"
        } else {
            return None;
        };
        info!(%mark, %ret, reason, "Exit threshold crossed");
        Some(self.close_locked(&mut guarded, Some(mark), reason).await)
    }

    async fn close_locked(
        &self,
        guarded: &mut Guarded,
        mark: Option<Decimal>,
        reason: &str,
    ) -> ExecutionOutcome {
        let position = guarded.position.clone();
        let Some(order_side) = position.side().close_side() else {
            return ExecutionOutcome::Skipped(SkipReason::NoPosition);
        };

        let order = OrderRequest {
            symbol: guarded.symbol.clone(),
            side: order_side,
            order_type: self.order_type,
            qty: position.size(),
            price: mark.or(position.entry_price()),
            time_in_force: self.time_in_force.clone(),
            reduce_only: true,
        };

        match self.venue.place_order(&order).await {
            Ok(ack) => {
                guarded.position.clear();
                self.publish(&guarded.position);
                self.telemetry.orders_submitted.inc();
                self.notifier.info(
                    "Position closed",
                    format!(
                        "{} {} {} ({}, order {})",
                        order_side.as_str(),
                        position.size(),
                        guarded.symbol,
                        reason,
                        ack.order_id
                    ),
                );
                ExecutionOutcome::Closed {
                    side: position.side(),
                    qty: position.size(),
                    order_id: ack.order_id,
                }
            }
            Err(e) => self.report_failure("Close order", &guarded.symbol, e),
        }
    }

    fn publish(&self, position: &PositionState) {
        self.telemetry
            .position_open
            .set(i64::from(position.is_open()));
        self.position_tx.send_replace(position.clone());
    }

    fn report_failure(&self, action: &str, symbol: &str, err: TraderError) -> ExecutionOutcome {
        match err {
            TraderError::VenueRejected { code, message } => {
                self.telemetry.orders_rejected.inc();
                self.notifier.warning(
                    format!("{} rejected", action),
                    format!("{}: retCode {} {}", symbol, code, message),
                );
                ExecutionOutcome::Rejected { code, message }
            }
            other => {
                self.telemetry.orders_failed.inc();
                self.notifier
                    .error(format!("{} failed", action), format!("{}: {}", symbol, other));
                ExecutionOutcome::Failed(other.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StopRule;
    use crate::execution::rest::{MockVenueClient, OrderAck, OrderSide};
    use crate::risk::InstrumentFilters;
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use tokio::sync::Notify;

    fn sizer() -> RiskSizer {
        RiskSizer::new(
            dec!(0.01),
            StopRule::Percent {
                fraction: dec!(0.005),
            },
            InstrumentFilters {
                qty_step: dec!(0.001),
                min_qty: dec!(0.001),
            },
        )
    }

    fn coordinator(mock: MockVenueClient) -> ExecutionCoordinator {
        coordinator_with(Arc::new(mock))
    }

    fn coordinator_with(venue: Arc<dyn VenueClient>) -> ExecutionCoordinator {
        ExecutionCoordinator::new(
            "BTCUSDT",
            venue,
            sizer(),
            OrderType::Market,
            "GTC",
            ExitRule {
                take_profit_pct: dec!(0.01),
                stop_loss_pct: dec!(0.005),
            },
            Notifier::disabled(),
            Arc::new(Telemetry::new().unwrap()),
        )
    }

    fn ack(id: &str) -> OrderAck {
        OrderAck {
            order_id: id.to_string(),
            order_link_id: String::new(),
        }
    }

    #[tokio::test]
    async fn test_opens_position_on_acceptance() {
        let mut mock = MockVenueClient::new();
        mock.expect_wallet_balance().returning(|| Ok(dec!(10000)));
        mock.expect_place_order()
            .withf(|o| o.side == OrderSide::Buy && o.qty == dec!(2) && !o.reduce_only)
            .times(1)
            .returning(|_| Ok(ack("1")));

        let coordinator = coordinator(mock);
        // 10000 * 0.01 / (100 * 0.005) / 100 = 2
        let outcome = coordinator
            .on_signal("BTCUSDT", Decision::Long, Some(dec!(100)), &[])
            .await;

        assert!(matches!(outcome, ExecutionOutcome::Opened { side: PositionSide::Long, .. }));
        let position = coordinator.position();
        assert_eq!(position.side(), PositionSide::Long);
        assert_eq!(position.size(), dec!(2));
        assert_eq!(position.entry_price(), Some(dec!(100)));
    }

    /// Venue whose order placement parks until the test releases it
    #[derive(Default)]
    struct GatedVenue {
        in_flight: Notify,
        release: Notify,
        orders: std::sync::Mutex<Vec<OrderRequest>>,
    }

    #[async_trait]
    impl VenueClient for GatedVenue {
        async fn place_order(&self, order: &OrderRequest) -> Result<OrderAck> {
            self.orders.lock().unwrap().push(order.clone());
            self.in_flight.notify_one();
            self.release.notified().await;
            Ok(ack("gated"))
        }

        async fn wallet_balance(&self) -> Result<Decimal> {
            Ok(dec!(10000))
        }

        async fn fetch_candles(&self, _: &str, _: &str, _: u32) -> Result<Vec<Candle>> {
            Ok(Vec::new())
        }

        async fn instrument_filters(&self, _: &str) -> Result<InstrumentFilters> {
            Ok(InstrumentFilters {
                qty_step: dec!(0.001),
                min_qty: dec!(0.001),
            })
        }
    }

    #[tokio::test]
    async fn test_concurrent_signals_submit_once() {
        let venue = Arc::new(GatedVenue::default());
        let coordinator = Arc::new(coordinator_with(venue.clone()));

        let first = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .on_signal("BTCUSDT", Decision::Long, Some(dec!(100)), &[])
                    .await
            }
        });
        venue.in_flight.notified().await;

        let second = tokio::spawn({
            let coordinator = coordinator.clone();
            async move {
                coordinator
                    .on_signal("BTCUSDT", Decision::Short, Some(dec!(100)), &[])
                    .await
            }
        });
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        // Second evaluation is parked on the lock while the first order is out
        assert!(!second.is_finished());
        assert!(!coordinator.position().is_open());

        venue.release.notify_one();
        let first = first.await.unwrap();
        let second = second.await.unwrap();

        assert!(matches!(first, ExecutionOutcome::Opened { side: PositionSide::Long, .. }));
        assert_eq!(second, ExecutionOutcome::Skipped(SkipReason::PositionOpen));
        assert_eq!(venue.orders.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_signal_for_previous_symbol_dropped() {
        let mut mock = MockVenueClient::new();
        mock.expect_wallet_balance().never();
        mock.expect_place_order().never();

        let coordinator = coordinator(mock);
        coordinator.change_symbol("ETHUSDT").await.unwrap();

        assert_eq!(
            coordinator
                .on_signal("BTCUSDT", Decision::Long, Some(dec!(100)), &[])
                .await,
            ExecutionOutcome::Skipped(SkipReason::SymbolChanged)
        );
        assert_eq!(coordinator.check_exit("BTCUSDT", dec!(200)).await, None);
        assert!(!coordinator.position().is_open());
    }

    #[tokio::test]
    async fn test_rejection_leaves_position_flat() {
        let mut mock = MockVenueClient::new();
        mock.expect_wallet_balance().returning(|| Ok(dec!(10000)));
        mock.expect_place_order().times(1).returning(|_| {
            Err(TraderError::VenueRejected {
                code: 110007,
                message: "insufficient balance".into(),
            })
        });

        let coordinator = coordinator(mock);
        let outcome = coordinator
            .on_signal("BTCUSDT", Decision::Short, Some(dec!(100)), &[])
            .await;
        assert!(matches!(outcome, ExecutionOutcome::Rejected { code: 110007, .. }));
        assert!(!coordinator.position().is_open());
        assert_eq!(coordinator.telemetry.orders_rejected.get(), 1);
    }

    #[tokio::test]
    async fn test_undersized_order_refused() {
        let mut mock = MockVenueClient::new();
        mock.expect_wallet_balance().returning(|| Ok(dec!(1000)));
        mock.expect_place_order().never();

        let coordinator = coordinator(mock);
        // 1000 * 0.01 / 100 / 20000 = 0.000005
        let outcome = coordinator
            .on_signal("BTCUSDT", Decision::Long, Some(dec!(20000)), &[])
            .await;
        assert_eq!(outcome, ExecutionOutcome::Skipped(SkipReason::ZeroSize));
    }

    #[tokio::test]
    async fn test_missing_price_and_hold_skip_without_venue_calls() {
        let mut mock = MockVenueClient::new();
        mock.expect_wallet_balance().never();
        mock.expect_place_order().never();

        let coordinator = coordinator(mock);
        assert_eq!(
            coordinator.on_signal("BTCUSDT", Decision::Long, None, &[]).await,
            ExecutionOutcome::Skipped(SkipReason::NoReferencePrice)
        );
        assert_eq!(
            coordinator.on_signal("BTCUSDT", Decision::Hold, Some(dec!(1)), &[]).await,
            ExecutionOutcome::Skipped(SkipReason::Hold)
        );
    }

    #[tokio::test]
    async fn test_take_profit_closes_with_opposite_side() {
        let mut mock = MockVenueClient::new();
        mock.expect_wallet_balance().returning(|| Ok(dec!(10000)));
        mock.expect_place_order()
            .withf(|o| o.side == OrderSide::Buy)
            .times(1)
            .returning(|_| Ok(ack("open")));
        mock.expect_place_order()
            .withf(|o| o.side == OrderSide::Sell && o.reduce_only && o.qty == dec!(2))
            .times(1)
            .returning(|_| Ok(ack("close")));

        let coordinator = coordinator(mock);
        coordinator
            .on_signal("BTCUSDT", Decision::Long, Some(dec!(100)), &[])
            .await;

        assert_eq!(coordinator.check_exit("BTCUSDT", dec!(100.5)).await, None);
        let outcome = coordinator.check_exit("BTCUSDT", dec!(101)).await;
        assert!(matches!(outcome, Some(ExecutionOutcome::Closed { .. })));
        assert!(!coordinator.position().is_open());
    }

    #[tokio::test]
    async fn test_symbol_change_refused_while_open() {
        let mut mock = MockVenueClient::new();
        mock.expect_wallet_balance().returning(|| Ok(dec!(10000)));
        mock.expect_place_order().returning(|_| Ok(ack("1")));

        let coordinator = coordinator(mock);
        coordinator.change_symbol("eth/usdt").await.unwrap();
        assert_eq!(coordinator.symbol().await, "ETHUSDT");

        coordinator
            .on_signal("ETHUSDT", Decision::Long, Some(dec!(100)), &[])
            .await;
        assert!(matches!(
            coordinator.change_symbol("SOLUSDT").await,
            Err(TraderError::Refused(_))
        ));
    }

    #[tokio::test]
    async fn test_close_without_position_is_noop() {
        let mut mock = MockVenueClient::new();
        mock.expect_place_order().never();
        let coordinator = coordinator(mock);
        assert_eq!(
            coordinator.close_position(Some(dec!(1)), "manual").await,
            ExecutionOutcome::Skipped(SkipReason::NoPosition)
        );
    }
}
