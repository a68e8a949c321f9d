//! Weighted indicator composite strategy

use serde::Serialize;
use tracing::debug;

use super::indicators;
use super::{Decision, Indicator, IndicatorVotes, SignalOutput};
use crate::config::CompositeConfig;
use crate::parser::Candle;

/// Latest indicator values; `None` when the history cannot support one
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IndicatorReadings {
    pub close: Option<f64>,
    pub ema_short: Option<f64>,
    pub ema_long: Option<f64>,
    pub momentum: Option<f64>,
    pub volume: Option<f64>,
    pub volume_ma: Option<f64>,
    pub stoch_rsi: Option<(f64, f64)>,
    pub rsi: Option<f64>,
    pub cci: Option<f64>,
    pub williams_r: Option<f64>,
    pub psar: Option<f64>,
    pub vwap: Option<f64>,
    pub sma: Option<f64>,
}

impl IndicatorReadings {
    pub fn from_candles(candles: &[Candle], config: &CompositeConfig) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        let volumes: Vec<f64> = candles.iter().map(|c| c.volume).collect();

        Self {
            close: closes.last().copied(),
            ema_short: indicators::ema(&closes, config.ema_short_period),
            ema_long: indicators::ema(&closes, config.ema_long_period),
            momentum: indicators::momentum(&closes, config.momentum_period),
            volume: volumes.last().copied(),
            volume_ma: indicators::sma(&volumes, config.volume_ma_period),
            stoch_rsi: indicators::stoch_rsi(
                &closes,
                config.rsi_period,
                config.stoch_period,
                config.stoch_k,
                config.stoch_d,
            ),
            rsi: indicators::rsi(&closes, config.rsi_period),
            cci: indicators::cci(candles, config.cci_period),
            williams_r: indicators::williams_r(candles, config.williams_period),
            psar: indicators::psar(candles, config.psar_step, config.psar_max),
            vwap: indicators::vwap(candles),
            sma: indicators::sma(&closes, config.sma_period),
        }
    }
}

/// Sums enabled, weighted indicator votes and compares against a threshold
#[derive(Debug, Clone)]
pub struct CompositeStrategy {
    config: CompositeConfig,
}

impl CompositeStrategy {
    pub fn new(config: CompositeConfig) -> Self {
        Self { config }
    }

    pub fn evaluate(&self, candles: &[Candle]) -> SignalOutput {
        if candles.is_empty() {
            return SignalOutput::hold(0.0);
        }
        let readings = IndicatorReadings::from_candles(candles, &self.config);
        self.evaluate_readings(&readings)
    }

    pub fn evaluate_readings(&self, readings: &IndicatorReadings) -> SignalOutput {
        let votes = self.score(readings);
        let score = votes.score();
        let threshold = self.config.score_threshold;

        let decision = if score >= threshold {
            Decision::Long
        } else if score <= -threshold {
            Decision::Short
        } else {
            Decision::Hold
        };

        debug!(
            score,
            buy_votes = votes.buy,
            sell_votes = votes.sell,
            ?decision,
            "Composite evaluated"
        );

        SignalOutput {
            decision,
            score,
            votes,
            vetoed: false,
        }
    }

    fn score(&self, r: &IndicatorReadings) -> IndicatorVotes {
        let cfg = &self.config;
        let on = &cfg.indicators;
        let w = &cfg.weights;
        let mut votes = IndicatorVotes::default();

        if on.ema_alignment {
            if let (Some(short), Some(long), Some(close)) = (r.ema_short, r.ema_long, r.close) {
                let v = if short > long && close > short {
                    w.ema_alignment
                } else if short < long && close < short {
                    -w.ema_alignment
                } else {
                    0.0
                };
                votes.record(Indicator::EmaAlignment, v);
            }
        }

        if on.momentum {
            if let Some(momentum) = r.momentum {
                votes.record(Indicator::Momentum, signum_weight(momentum, w.momentum));
            }
        }

        if on.volume_confirmation {
            if let (Some(volume), Some(ma)) = (r.volume, r.volume_ma) {
                let v = if volume > ma * cfg.volume_multiplier {
                    w.volume_confirmation
                } else if cfg.volume_multiplier > 0.0 && volume < ma / cfg.volume_multiplier {
                    -w.volume_confirmation
                } else {
                    0.0
                };
                votes.record(Indicator::VolumeConfirmation, v);
            }
        }

        if on.stoch_rsi {
            if let Some((k, d)) = r.stoch_rsi {
                let weight = w.stoch_rsi + cfg.stoch_rsi_boost / 10.0;
                let v = if k < cfg.stoch_rsi_oversold && d < cfg.stoch_rsi_oversold {
                    weight
                } else if k > cfg.stoch_rsi_overbought && d > cfg.stoch_rsi_overbought {
                    -weight
                } else {
                    0.0
                };
                votes.record(Indicator::StochRsi, v);
            }
        }

        if on.rsi {
            if let Some(rsi) = r.rsi {
                let weight = w.rsi + cfg.rsi_boost / 10.0;
                let v = if rsi < cfg.rsi_oversold {
                    weight
                } else if rsi > cfg.rsi_overbought {
                    -weight
                } else {
                    0.0
                };
                votes.record(Indicator::Rsi, v);
            }
        }

        if on.cci {
            if let Some(cci) = r.cci {
                let v = if cci < -cfg.cci_threshold {
                    w.cci
                } else if cci > cfg.cci_threshold {
                    -w.cci
                } else {
                    0.0
                };
                votes.record(Indicator::Cci, v);
            }
        }

        if on.williams_r {
            if let Some(wr) = r.williams_r {
                let v = if wr < cfg.williams_oversold {
                    w.williams_r
                } else if wr > cfg.williams_overbought {
                    -w.williams_r
                } else {
                    0.0
                };
                votes.record(Indicator::WilliamsR, v);
            }
        }

        // Trend-following references: close above is bullish
        let above = |reference: Option<f64>, weight: f64| {
            let (close, reference) = (r.close?, reference?);
            Some(signum_weight(close - reference, weight))
        };
        if on.psar {
            if let Some(v) = above(r.psar, w.psar) {
                votes.record(Indicator::Psar, v);
            }
        }
        if on.sma {
            if let Some(v) = above(r.sma, w.sma) {
                votes.record(Indicator::Sma, v);
            }
        }
        if on.vwap {
            if let Some(v) = above(r.vwap, w.vwap) {
                votes.record(Indicator::Vwap, v);
            }
        }

        votes
    }
}

fn signum_weight(value: f64, weight: f64) -> f64 {
    if value > 0.0 {
        weight
    } else if value < 0.0 {
        -weight
    } else {
        0.0
    }
}
