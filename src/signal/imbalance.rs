//! Top-of-book imbalance strategy

use super::{Decision, SignalOutput};
use crate::orderbook::BookView;

/// Long above `long_threshold`, short below `short_threshold`.
///
/// Thresholds sit asymmetrically around 1.0; the band between them is a
/// dead zone where near-balanced books produce no signal.
#[derive(Debug, Clone)]
pub struct ImbalanceStrategy {
    levels: usize,
    long_threshold: f64,
    short_threshold: f64,
}

impl ImbalanceStrategy {
    pub fn new(levels: usize, long_threshold: f64, short_threshold: f64) -> Self {
        Self {
            levels,
            long_threshold,
            short_threshold,
        }
    }

    pub fn levels(&self) -> usize {
        self.levels
    }

    pub fn evaluate(&self, book: &BookView) -> SignalOutput {
        let Some(imbalance) = book.imbalance(self.levels) else {
            return SignalOutput::hold(0.0);
        };

        let decision = if imbalance > self.long_threshold {
            Decision::Long
        } else if imbalance < self.short_threshold {
            Decision::Short
        } else {
            Decision::Hold
        };

        SignalOutput {
            decision,
            score: imbalance,
            ..SignalOutput::hold(imbalance)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orderbook::Level;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn book(bid_sizes: &[Decimal], ask_sizes: &[Decimal]) -> BookView {
        BookView {
            symbol: "BTCUSDT".into(),
            synced: true,
            epoch: 0,
            bids: bid_sizes
                .iter()
                .enumerate()
                .map(|(i, &size)| Level {
                    price: dec!(100) - Decimal::from(i as u64),
                    size,
                })
                .collect(),
            asks: ask_sizes
                .iter()
                .enumerate()
                .map(|(i, &size)| Level {
                    price: dec!(101) + Decimal::from(i as u64),
                    size,
                })
                .collect(),
        }
    }

    #[test]
    fn test_long_short_and_dead_zone() {
        let strategy = ImbalanceStrategy::new(5, 1.6, 0.6);
        assert_eq!(strategy.evaluate(&book(&[dec!(5)], &[dec!(2)])).decision, Decision::Long);
        assert_eq!(strategy.evaluate(&book(&[dec!(1)], &[dec!(2)])).decision, Decision::Short);
        assert_eq!(strategy.evaluate(&book(&[dec!(2)], &[dec!(2)])).decision, Decision::Hold);
        // Exactly on a threshold is still inside the dead zone
        assert_eq!(strategy.evaluate(&book(&[dec!(1.6)], &[dec!(1)])).decision, Decision::Hold);
    }

    #[test]
    fn test_only_top_levels_count() {
        let strategy = ImbalanceStrategy::new(1, 1.6, 0.6);
        let output = strategy.evaluate(&book(&[dec!(5), dec!(100)], &[dec!(2), dec!(1)]));
        assert_eq!(output.score, 2.5);
        assert_eq!(output.decision, Decision::Long);
    }

    #[test]
    fn test_degenerate_liquidity_polarity() {
        let strategy = ImbalanceStrategy::new(5, 1.6, 0.6);
        let no_asks = strategy.evaluate(&book(&[dec!(1)], &[]));
        assert_eq!(no_asks.score, f64::INFINITY);
        assert_eq!(no_asks.decision, Decision::Long);

        let empty = strategy.evaluate(&book(&[], &[]));
        assert_eq!(empty.score, 0.0);
        assert_eq!(empty.decision, Decision::Short);
    }

    #[test]
    fn test_unsynced_book_holds() {
        let strategy = ImbalanceStrategy::new(5, 1.6, 0.6);
        let mut view = book(&[dec!(5)], &[dec!(1)]);
        view.synced = false;
        assert_eq!(strategy.evaluate(&view).decision, Decision::Hold);
    }
}
