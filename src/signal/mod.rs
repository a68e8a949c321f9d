//! Signal generation
//!
//! Two interchangeable strategies selected by configuration: top-of-book
//! imbalance and a weighted indicator composite. Either may be followed by
//! a book-depth confirmation pass that can only degrade a decision to Hold.

mod composite;
mod confirm;
mod imbalance;
pub mod indicators;

pub use composite::{CompositeStrategy, IndicatorReadings};
pub use confirm::BookConfirmation;
pub use imbalance::ImbalanceStrategy;

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::info;

use crate::config::{SignalConfig, StrategyKind};
use crate::orderbook::BookView;
use crate::parser::Candle;

/// Directional decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Decision {
    Long,
    Short,
    Hold,
}

impl Decision {
    pub fn is_hold(&self) -> bool {
        matches!(self, Decision::Hold)
    }
}

/// Indicators that can vote in the composite score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Indicator {
    EmaAlignment,
    Momentum,
    VolumeConfirmation,
    StochRsi,
    Rsi,
    Cci,
    WilliamsR,
    Psar,
    Vwap,
    Sma,
}

/// Direction of one indicator's vote
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Vote {
    Buy,
    Sell,
    Neutral,
}

/// One indicator's contribution to the score
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IndicatorVote {
    pub indicator: Indicator,
    pub vote: Vote,
    pub contribution: f64,
}

/// Buy/sell tallies kept for diagnostics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorVotes {
    pub buy: u32,
    pub sell: u32,
    pub votes: Vec<IndicatorVote>,
}

impl IndicatorVotes {
    pub fn record(&mut self, indicator: Indicator, contribution: f64) {
        let vote = if contribution > 0.0 {
            self.buy += 1;
            Vote::Buy
        } else if contribution < 0.0 {
            self.sell += 1;
            Vote::Sell
        } else {
            Vote::Neutral
        };
        self.votes.push(IndicatorVote {
            indicator,
            vote,
            contribution,
        });
    }

    pub fn score(&self) -> f64 {
        self.votes.iter().map(|v| v.contribution).sum()
    }
}

/// Result of one evaluation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignalOutput {
    pub decision: Decision,
    /// Imbalance ratio or composite score, depending on strategy
    pub score: f64,
    pub votes: IndicatorVotes,
    /// Set when the confirmation pass degraded a decision to Hold
    pub vetoed: bool,
}

impl SignalOutput {
    pub fn hold(score: f64) -> Self {
        Self {
            decision: Decision::Hold,
            score,
            votes: IndicatorVotes::default(),
            vetoed: false,
        }
    }
}

/// Strategy chosen at configuration time
#[derive(Debug, Clone)]
pub enum SignalStrategy {
    Imbalance(ImbalanceStrategy),
    Composite(CompositeStrategy),
}

impl SignalStrategy {
    pub fn from_config(config: &SignalConfig) -> Self {
        match config.strategy {
            StrategyKind::Imbalance => SignalStrategy::Imbalance(ImbalanceStrategy::new(
                config.imbalance_levels,
                config.long_threshold,
                config.short_threshold,
            )),
            StrategyKind::Composite => {
                SignalStrategy::Composite(CompositeStrategy::new(config.composite.clone()))
            }
        }
    }

    pub fn kind(&self) -> StrategyKind {
        match self {
            SignalStrategy::Imbalance(_) => StrategyKind::Imbalance,
            SignalStrategy::Composite(_) => StrategyKind::Composite,
        }
    }

    pub fn evaluate(&self, book: &BookView, candles: &[Candle]) -> SignalOutput {
        match self {
            SignalStrategy::Imbalance(strategy) => strategy.evaluate(book),
            SignalStrategy::Composite(strategy) => strategy.evaluate(candles),
        }
    }
}

/// Strategy plus optional confirmation; deterministic for identical inputs
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    strategy: SignalStrategy,
    confirmation: Option<BookConfirmation>,
}

impl SignalGenerator {
    pub fn new(strategy: SignalStrategy, confirmation: Option<BookConfirmation>) -> Self {
        Self {
            strategy,
            confirmation,
        }
    }

    pub fn from_config(config: &SignalConfig) -> Self {
        let covered = match config.strategy {
            StrategyKind::Composite => true,
            StrategyKind::Imbalance => config.confirmation.apply_to_imbalance,
        };
        let confirmation = (config.confirmation.enabled && covered)
            .then(|| BookConfirmation::from_config(&config.confirmation));
        Self::new(SignalStrategy::from_config(config), confirmation)
    }

    pub fn strategy(&self) -> &SignalStrategy {
        &self.strategy
    }

    /// Evaluate the strategy and run the confirmation veto against `price`
    pub fn evaluate(
        &self,
        book: &BookView,
        candles: &[Candle],
        price: Option<Decimal>,
    ) -> SignalOutput {
        let mut output = self.strategy.evaluate(book, candles);
        if output.decision.is_hold() {
            return output;
        }

        if let Some(confirmation) = &self.confirmation {
            if !confirmation.confirms(output.decision, price, book) {
                info!(
                    decision = ?output.decision,
                    score = output.score,
                    "Order book does not confirm signal, holding"
                );
                output.decision = Decision::Hold;
                output.vetoed = true;
            }
        }
        output
    }
}
