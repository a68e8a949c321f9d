//! Bounded tape of recent public trades

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::collections::VecDeque;

use crate::parser::{TradePrint, TradeSide};

/// One print on the tape
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TradeRecord {
    pub price: Decimal,
    pub size: Decimal,
    /// Trade time (milliseconds)
    pub timestamp: u64,
    pub side: TradeSide,
}

impl From<&TradePrint> for TradeRecord {
    fn from(print: &TradePrint) -> Self {
        Self {
            price: print.price,
            size: print.size,
            timestamp: print.timestamp,
            side: print.side,
        }
    }
}

/// Ring buffer of the most recent prints; the oldest is evicted on overflow.
#[derive(Debug)]
pub struct TradeTape {
    records: VecDeque<TradeRecord>,
    capacity: usize,
}

impl TradeTape {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity.min(4096)),
            capacity,
        }
    }

    pub fn push(&mut self, record: TradeRecord) {
        if self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(record);
    }

    pub fn extend<'a>(&mut self, prints: impl IntoIterator<Item = &'a TradePrint>) {
        for print in prints {
            self.push(TradeRecord::from(print));
        }
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn last(&self) -> Option<&TradeRecord> {
        self.records.back()
    }

    /// Most recent `n` prints, oldest first
    pub fn recent(&self, n: usize) -> impl Iterator<Item = &TradeRecord> {
        self.records.iter().skip(self.records.len().saturating_sub(n))
    }

    /// (buy volume, sell volume) over the whole tape
    pub fn volume_split(&self) -> (Decimal, Decimal) {
        self.records
            .iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(buy, sell), r| match r.side {
                TradeSide::Buy => (buy + r.size, sell),
                TradeSide::Sell => (buy, sell + r.size),
            })
    }

    /// Volume-weighted average price of the tape
    pub fn vwap(&self) -> Option<Decimal> {
        let (notional, volume) = self
            .records
            .iter()
            .fold((Decimal::ZERO, Decimal::ZERO), |(n, v), r| {
                (n + r.price * r.size, v + r.size)
            });
        if volume.is_zero() {
            None
        } else {
            Some(notional / volume)
        }
    }

    /// Chande momentum over the last `period` price changes, in [-100, 100].
    ///
    /// `None` until `period + 1` prints are available; `0` for a flat tape.
    pub fn chande_momentum(&self, period: usize) -> Option<f64> {
        if period == 0 || self.records.len() < period + 1 {
            return None;
        }
        let prices: Vec<f64> = self
            .recent(period + 1)
            .filter_map(|r| r.price.to_f64())
            .collect();
        let (up, down) = prices.windows(2).fold((0.0, 0.0), |(up, down), w| {
            let change = w[1] - w[0];
            if change > 0.0 {
                (up + change, down)
            } else {
                (up, down - change)
            }
        });
        let total = up + down;
        if total == 0.0 {
            Some(0.0)
        } else {
            Some((up - down) / total * 100.0)
        }
    }
}
