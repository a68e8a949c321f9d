//! Core order book implementation
//!
//! Uses BTreeMap for sorted price level management: bids are keyed by
//! `Reverse(price)` so both sides iterate best-first.

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, warn};

use super::{BookView, Level, OrderBookMetrics, Side};
use crate::parser::{PriceLevel, RawLevel};

/// Outcome of applying one batch of raw levels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ApplyStats {
    pub applied: usize,
    pub skipped: usize,
}

impl ApplyStats {
    fn merge(self, other: ApplyStats) -> ApplyStats {
        ApplyStats {
            applied: self.applied + other.applied,
            skipped: self.skipped + other.skipped,
        }
    }
}

/// `bid_sum / ask_sum`, `+inf` when only asks are empty, `0` when both are.
pub fn imbalance_ratio(
    bid_sizes: impl Iterator<Item = Decimal>,
    ask_sizes: impl Iterator<Item = Decimal>,
) -> f64 {
    let bid_sum: Decimal = bid_sizes.sum();
    let ask_sum: Decimal = ask_sizes.sum();

    if ask_sum <= Decimal::ZERO {
        return if bid_sum > Decimal::ZERO {
            f64::INFINITY
        } else {
            0.0
        };
    }
    bid_sum
        .checked_div(ask_sum)
        .and_then(|ratio| ratio.to_f64())
        .unwrap_or(f64::INFINITY)
}

/// Order book for a single symbol
#[derive(Debug)]
pub struct OrderBook {
    symbol: String,
    /// Bids sorted by price descending (highest first)
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    /// Asks sorted by price ascending (lowest first)
    asks: BTreeMap<Decimal, Decimal>,
    /// Last processed update ID
    last_update_id: u64,
    /// Whether the book has been initialized with a snapshot
    synced: bool,
    /// Maximum depth levels to maintain
    max_depth: usize,
    /// Monotonic time of the last applied message
    last_update_time: Option<Instant>,
    /// Venue timestamp of the last applied message (milliseconds)
    exchange_ts: u64,
}

impl OrderBook {
    /// Create a new empty order book
    pub fn new(symbol: &str, max_depth: usize) -> Self {
        Self {
            symbol: symbol.to_string(),
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_update_id: 0,
            synced: false,
            max_depth,
            last_update_time: None,
            exchange_ts: 0,
        }
    }

    /// Replace both sides with a snapshot
    pub fn apply_snapshot(
        &mut self,
        bids: &[RawLevel],
        asks: &[RawLevel],
        update_id: u64,
        exchange_ts: u64,
    ) -> ApplyStats {
        self.bids.clear();
        self.asks.clear();

        let stats = self
            .upsert_levels(Side::Bid, bids)
            .merge(self.upsert_levels(Side::Ask, asks));

        self.last_update_id = update_id;
        self.synced = true;
        self.touch(exchange_ts);
        self.trim_depth();
        self.check_crossed();
        stats
    }

    /// Apply incremental levels to one side; size 0 removes the level
    pub fn apply_delta(&mut self, levels: &[RawLevel], side: Side) -> ApplyStats {
        if !self.synced {
            debug!(symbol = %self.symbol, "Delta before snapshot, dropping");
            return ApplyStats {
                applied: 0,
                skipped: levels.len(),
            };
        }
        let stats = self.upsert_levels(side, levels);
        self.trim_depth();
        self.check_crossed();
        stats
    }

    /// Sequence check for a delta frame, run before its levels are applied.
    ///
    /// Returns false for stale or pre-snapshot frames.
    pub fn accept_delta(&mut self, update_id: u64, exchange_ts: u64) -> bool {
        if !self.synced {
            return false;
        }
        if update_id != 0 && update_id <= self.last_update_id {
            debug!(
                symbol = %self.symbol,
                update_id,
                last_update_id = self.last_update_id,
                "Stale delta, skipping"
            );
            return false;
        }
        if update_id != 0 {
            self.last_update_id = update_id;
        }
        self.touch(exchange_ts);
        true
    }

    fn upsert_levels(&mut self, side: Side, levels: &[RawLevel]) -> ApplyStats {
        let mut stats = ApplyStats::default();
        for raw in levels {
            match PriceLevel::from_raw(raw) {
                Ok(level) => {
                    self.update_side(side, level);
                    stats.applied += 1;
                }
                Err(e) => {
                    warn!(symbol = %self.symbol, side = ?side, error = %e, "Skipping malformed level");
                    stats.skipped += 1;
                }
            }
        }
        stats
    }

    /// Update a single price level
    fn update_side(&mut self, side: Side, level: PriceLevel) {
        match side {
            Side::Bid => {
                if level.size.is_zero() {
                    self.bids.remove(&Reverse(level.price));
                } else {
                    self.bids.insert(Reverse(level.price), level.size);
                }
            }
            Side::Ask => {
                if level.size.is_zero() {
                    self.asks.remove(&level.price);
                } else {
                    self.asks.insert(level.price, level.size);
                }
            }
        }
    }

    /// Trim the book to max depth
    fn trim_depth(&mut self) {
        while self.bids.len() > self.max_depth {
            self.bids.pop_last();
        }
        while self.asks.len() > self.max_depth {
            self.asks.pop_last();
        }
    }

    fn touch(&mut self, exchange_ts: u64) {
        self.last_update_time = Some(Instant::now());
        self.exchange_ts = exchange_ts;
    }

    /// A crossed book needs a fresh snapshot to repair; only report it.
    fn check_crossed(&self) {
        if let (Some(bid), Some(ask)) = (self.best_bid(), self.best_ask()) {
            if bid >= ask {
                warn!(
                    symbol = %self.symbol,
                    best_bid = %bid,
                    best_ask = %ask,
                    "Crossed book: best bid at or above best ask"
                );
            }
        }
    }

    /// Drop all levels and wait for the next snapshot
    pub fn reset(&mut self, symbol: &str) {
        self.symbol = symbol.to_string();
        self.bids.clear();
        self.asks.clear();
        self.last_update_id = 0;
        self.synced = false;
        self.last_update_time = None;
        self.exchange_ts = 0;
    }

    /// Get best bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first_key_value().map(|(Reverse(p), _)| *p)
    }

    /// Get best ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first_key_value().map(|(p, _)| *p)
    }

    /// Average of best bid and best ask; `None` when either side is empty
    pub fn midpoint(&self) -> Option<Decimal> {
        if !self.synced {
            return None;
        }
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid + ask) / Decimal::TWO),
            _ => None,
        }
    }

    /// Get spread in basis points
    pub fn spread_bps(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask(), self.midpoint()) {
            (Some(bid), Some(ask), Some(mid)) if mid > Decimal::ZERO => {
                Some((ask - bid) / mid * Decimal::from(10000))
            }
            _ => None,
        }
    }

    /// Sum of top-N bid sizes over sum of top-N ask sizes
    pub fn imbalance(&self, levels: usize) -> Option<f64> {
        if !self.synced {
            return None;
        }
        Some(imbalance_ratio(
            self.bids.values().take(levels).copied(),
            self.asks.values().take(levels).copied(),
        ))
    }

    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    pub fn last_update_time(&self) -> Option<Instant> {
        self.last_update_time
    }

    pub fn exchange_ts(&self) -> u64 {
        self.exchange_ts
    }

    pub fn bid_levels(&self) -> impl Iterator<Item = Level> + '_ {
        self.bids
            .iter()
            .map(|(Reverse(p), s)| Level { price: *p, size: *s })
    }

    pub fn ask_levels(&self) -> impl Iterator<Item = Level> + '_ {
        self.asks.iter().map(|(p, s)| Level { price: *p, size: *s })
    }

    /// Copy the top `levels` of each side
    pub fn view(&self, levels: usize, epoch: u64) -> BookView {
        BookView {
            symbol: self.symbol.clone(),
            synced: self.synced,
            epoch,
            bids: self.bid_levels().take(levels).collect(),
            asks: self.ask_levels().take(levels).collect(),
        }
    }

    /// Calculate order book metrics
    pub fn metrics(&self, imbalance_levels: usize) -> OrderBookMetrics {
        OrderBookMetrics {
            synced: self.synced,
            mid_price: self.midpoint(),
            spread_bps: self.spread_bps(),
            imbalance: self.imbalance(imbalance_levels),
            bid_depth: self.bids.values().copied().sum(),
            ask_depth: self.asks.values().copied().sum(),
            bid_levels: self.bids.len(),
            ask_levels: self.asks.len(),
        }
    }
}
