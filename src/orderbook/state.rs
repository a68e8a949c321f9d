//! Shared market state
//!
//! One writer (the ingestion task) and any number of readers share the book
//! and tape behind a single `RwLock`; every read copies what it needs under
//! one guard so no reader sees a half-applied frame.

use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

use super::{ApplyStats, BookView, OrderBook, OrderBookMetrics, Side, TradeTape};
use crate::parser::{BookMessage, BookMessageKind, TradePrint};

pub type SharedMarket = Arc<RwLock<MarketState>>;

/// Book and trade tape for the active symbol
#[derive(Debug)]
pub struct MarketState {
    book: OrderBook,
    tape: TradeTape,
    /// Bumped on every reconnect or symbol change
    epoch: u64,
}

impl MarketState {
    pub fn new(symbol: &str, depth: usize, tape_capacity: usize) -> Self {
        Self {
            book: OrderBook::new(symbol, depth),
            tape: TradeTape::new(tape_capacity),
            epoch: 0,
        }
    }

    pub fn shared(self) -> SharedMarket {
        Arc::new(RwLock::new(self))
    }

    pub fn symbol(&self) -> &str {
        self.book.symbol()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn book(&self) -> &OrderBook {
        &self.book
    }

    pub fn tape(&self) -> &TradeTape {
        &self.tape
    }

    /// Apply a book frame in wire order.
    ///
    /// Returns `None` when the frame was not applied: another symbol, a
    /// delta before the epoch's snapshot, or a stale delta.
    pub fn apply_book(&mut self, msg: &BookMessage) -> Option<ApplyStats> {
        if msg.data.symbol != self.book.symbol() {
            debug!(
                frame_symbol = %msg.data.symbol,
                active = %self.book.symbol(),
                "Book frame for inactive symbol, dropping"
            );
            return None;
        }

        match msg.kind {
            BookMessageKind::Snapshot => Some(self.book.apply_snapshot(
                &msg.data.bids,
                &msg.data.asks,
                msg.data.update_id,
                msg.ts,
            )),
            BookMessageKind::Delta => {
                if !self.book.accept_delta(msg.data.update_id, msg.ts) {
                    return None;
                }
                let bids = self.book.apply_delta(&msg.data.bids, Side::Bid);
                let asks = self.book.apply_delta(&msg.data.asks, Side::Ask);
                Some(ApplyStats {
                    applied: bids.applied + asks.applied,
                    skipped: bids.skipped + asks.skipped,
                })
            }
        }
    }

    /// Append prints from a `publicTrade.<symbol>` frame; other symbols are dropped
    pub fn record_trades(&mut self, topic: &str, prints: &[TradePrint]) -> bool {
        let topic_symbol = topic.rsplit('.').next().unwrap_or_default();
        if topic_symbol != self.book.symbol() {
            debug!(topic = %topic, active = %self.book.symbol(), "Trades for inactive symbol, dropping");
            return false;
        }
        self.tape.extend(prints);
        true
    }

    /// New connection: the book must wait for a fresh snapshot
    pub fn begin_epoch(&mut self) {
        let symbol = self.book.symbol().to_string();
        self.book.reset(&symbol);
        self.epoch += 1;
    }

    /// New instrument: nothing from the old one may leak into reads
    pub fn switch_symbol(&mut self, symbol: &str) {
        self.book.reset(symbol);
        self.tape.clear();
        self.epoch += 1;
    }

    /// Consistent copy of the top `levels` of the book
    pub fn view(&self, levels: usize) -> BookView {
        self.book.view(levels, self.epoch)
    }

    pub fn metrics(&self, imbalance_levels: usize) -> OrderBookMetrics {
        self.book.metrics(imbalance_levels)
    }
}
