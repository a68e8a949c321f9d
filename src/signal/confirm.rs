//! Book-depth confirmation veto

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::debug;

use super::Decision;
use crate::config::ConfirmationConfig;
use crate::orderbook::BookView;

/// Requires resting liquidity near the price to back the signal direction.
///
/// A Short needs ask size within `band` above the price to exceed
/// `wall_multiplier` times the best bid size; a Long needs the mirror on
/// the bid side. Only `depth` levels per side are considered.
#[derive(Debug, Clone)]
pub struct BookConfirmation {
    wall_multiplier: Decimal,
    depth: usize,
    band: Decimal,
}

impl BookConfirmation {
    pub fn new(wall_multiplier: f64, depth: usize, band: f64) -> Self {
        Self {
            wall_multiplier: Decimal::from_f64(wall_multiplier).unwrap_or(Decimal::ONE),
            depth,
            band: Decimal::from_f64(band).unwrap_or(Decimal::ZERO),
        }
    }

    pub fn from_config(config: &ConfirmationConfig) -> Self {
        Self::new(config.wall_multiplier, config.depth, config.band)
    }

    /// `false` degrades the decision to Hold. Hold itself always passes.
    pub fn confirms(&self, decision: Decision, price: Option<Decimal>, book: &BookView) -> bool {
        let Some(price) = price else {
            return decision.is_hold();
        };

        match decision {
            Decision::Hold => true,
            Decision::Short => {
                let Some(best_bid) = book.best_bid() else {
                    return false;
                };
                let resistance = price * (Decimal::ONE + self.band);
                let ask_wall: Decimal = book
                    .asks
                    .iter()
                    .take(self.depth)
                    .filter(|level| level.price <= resistance)
                    .map(|level| level.size)
                    .sum();
                let required = best_bid.size * self.wall_multiplier;
                debug!(%ask_wall, %required, "Sell confirmation");
                ask_wall >= required
            }
            Decision::Long => {
                let Some(best_ask) = book.best_ask() else {
                    return false;
                };
                let support = price * (Decimal::ONE - self.band);
                let bid_wall: Decimal = book
                    .bids
                    .iter()
                    .take(self.depth)
                    .filter(|level| level.price >= support)
                    .map(|level| level.size)
                    .sum();
                let required = best_ask.size * self.wall_multiplier;
                debug!(%bid_wall, %required, "Buy confirmation");
                bid_wall >= required
            }
        }
    }
}
