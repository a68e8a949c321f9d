//! Position sizing from account risk

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{RiskConfig, StopRule};
use crate::parser::Candle;
use crate::signal::indicators;

/// Venue quantity filters for one instrument
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentFilters {
    pub qty_step: Decimal,
    pub min_qty: Decimal,
}

/// Converts the equity at risk into an order quantity that satisfies the
/// venue's step and minimum. Never returns a negative quantity.
#[derive(Debug, Clone)]
pub struct RiskSizer {
    risk_fraction: Decimal,
    stop: StopRule,
    filters: InstrumentFilters,
}

impl RiskSizer {
    pub fn new(risk_fraction: Decimal, stop: StopRule, filters: InstrumentFilters) -> Self {
        Self {
            risk_fraction,
            stop,
            filters,
        }
    }

    pub fn from_config(config: &RiskConfig) -> Self {
        Self::new(
            config.risk_fraction,
            config.stop.clone(),
            InstrumentFilters {
                qty_step: config.qty_step,
                min_qty: config.min_qty,
            },
        )
    }

    /// Replace the configured filters with those reported by the venue
    pub fn with_filters(mut self, filters: InstrumentFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn filters(&self) -> InstrumentFilters {
        self.filters
    }

    pub fn risk_fraction(&self) -> Decimal {
        self.risk_fraction
    }

    pub fn stop_rule(&self) -> &StopRule {
        &self.stop
    }

    /// `((balance × risk_fraction) / stop_distance) / price`, floored to the
    /// quantity step. Zero when the inputs are degenerate or the rounded
    /// quantity falls below the venue minimum.
    pub fn position_size(
        &self,
        balance: Decimal,
        risk_fraction: Decimal,
        stop_distance: Decimal,
        price: Decimal,
    ) -> Decimal {
        if stop_distance.is_zero() || price <= Decimal::ZERO || balance <= Decimal::ZERO {
            return Decimal::ZERO;
        }

        let risk_amount = balance * risk_fraction;
        let Some(raw) = risk_amount
            .checked_div(stop_distance)
            .and_then(|units| units.checked_div(price))
        else {
            return Decimal::ZERO;
        };

        let qty = self.floor_to_step(raw);
        if qty < self.filters.min_qty || qty <= Decimal::ZERO {
            debug!(%raw, %qty, min_qty = %self.filters.min_qty, "Size below venue minimum");
            return Decimal::ZERO;
        }
        qty
    }

    /// Size with the configured risk fraction
    pub fn size_for(&self, balance: Decimal, stop_distance: Decimal, price: Decimal) -> Decimal {
        self.position_size(balance, self.risk_fraction, stop_distance, price)
    }

    /// Stop distance in price units for the configured rule
    pub fn stop_distance(&self, price: Decimal, candles: &[Candle]) -> Option<Decimal> {
        match &self.stop {
            StopRule::Percent { fraction } => Some(price * fraction),
            StopRule::Atr { multiple, period } => {
                let atr = indicators::atr(candles, *period)?;
                Decimal::from_f64(atr).map(|atr| atr * multiple)
            }
        }
    }

    fn floor_to_step(&self, qty: Decimal) -> Decimal {
        let step = self.filters.qty_step;
        if step <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        match qty.checked_div(step) {
            Some(steps) => (steps.floor() * step).normalize(),
            None => Decimal::ZERO,
        }
    }
}
