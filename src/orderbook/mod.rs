//! Order book module
//!
//! Maintains the price-level book and trade tape reconstructed from the
//! public stream, plus the read-side views handed to signal evaluation.

mod book;
mod metrics;
mod state;
mod tape;

pub use book::{imbalance_ratio, ApplyStats, OrderBook};
pub use metrics::OrderBookMetrics;
pub use state::{MarketState, SharedMarket};
pub use tape::{TradeRecord, TradeTape};

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Bid,
    Ask,
}

/// A single level in the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

/// Consistent copy of the top of the book taken under one read lock
#[derive(Debug, Clone, Default)]
pub struct BookView {
    pub symbol: String,
    /// False until the first snapshot of the current epoch is applied
    pub synced: bool,
    pub epoch: u64,
    /// Highest first
    pub bids: Vec<Level>,
    /// Lowest first
    pub asks: Vec<Level>,
}

impl BookView {
    pub fn best_bid(&self) -> Option<Level> {
        self.bids.first().copied()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks.first().copied()
    }

    /// Mid price, unavailable until synced and while either side is empty
    pub fn midpoint(&self) -> Option<Decimal> {
        if !self.synced {
            return None;
        }
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    /// Bid/ask size ratio over the top `levels`, unavailable until synced
    pub fn imbalance(&self, levels: usize) -> Option<f64> {
        if !self.synced {
            return None;
        }
        Some(imbalance_ratio(
            self.bids.iter().take(levels).map(|l| l.size),
            self.asks.iter().take(levels).map(|l| l.size),
        ))
    }

    pub fn midpoint_f64(&self) -> Option<f64> {
        self.midpoint().and_then(|m| m.to_f64())
    }
}
