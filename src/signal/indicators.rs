//! Stateless technical indicators over candle history
//!
//! Every function reads the most recent value at the end of its input and
//! returns `None` when the history is too short or the value is undefined
//! (zero range, zero volume). Inputs are ordered oldest first.

use crate::parser::Candle;

/// Simple moving average of the last `period` values
pub fn sma(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: f64 = values[values.len() - period..].iter().sum();
    Some(sum / period as f64)
}

/// Exponential moving average seeded with the first value
pub fn ema(values: &[f64], period: usize) -> Option<f64> {
    if period == 0 || values.is_empty() {
        return None;
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut ema = values[0];
    for value in &values[1..] {
        ema = (value - ema) * alpha + ema;
    }
    Some(ema)
}

/// Percentage change over `period` candles
pub fn momentum(closes: &[f64], period: usize) -> Option<f64> {
    if period == 0 || closes.len() <= period {
        return None;
    }
    let last = closes[closes.len() - 1];
    let base = closes[closes.len() - 1 - period];
    if base == 0.0 {
        return None;
    }
    Some((last - base) / base * 100.0)
}

/// RSI series using simple rolling means of gains and losses.
///
/// Element `i` of the result corresponds to `closes[i + period]`.
pub fn rsi_series(closes: &[f64], period: usize) -> Vec<f64> {
    if period == 0 || closes.len() <= period {
        return Vec::new();
    }
    let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
    changes
        .windows(period)
        .map(|window| {
            let gain: f64 = window.iter().filter(|c| **c > 0.0).sum::<f64>() / period as f64;
            let loss: f64 = -window.iter().filter(|c| **c < 0.0).sum::<f64>() / period as f64;
            if loss == 0.0 {
                100.0
            } else {
                100.0 - 100.0 / (1.0 + gain / loss)
            }
        })
        .collect()
}

pub fn rsi(closes: &[f64], period: usize) -> Option<f64> {
    rsi_series(closes, period).last().copied()
}

/// Stochastic RSI (%K, %D) on a 0-100 scale
pub fn stoch_rsi(
    closes: &[f64],
    rsi_period: usize,
    stoch_period: usize,
    k_period: usize,
    d_period: usize,
) -> Option<(f64, f64)> {
    if stoch_period == 0 || k_period == 0 || d_period == 0 {
        return None;
    }
    let rsi = rsi_series(closes, rsi_period);
    if rsi.len() < stoch_period {
        return None;
    }

    let stoch: Vec<Option<f64>> = rsi
        .windows(stoch_period)
        .map(|window| {
            let (lo, hi) = min_max(window);
            let last = window[window.len() - 1];
            (hi > lo).then(|| (last - lo) / (hi - lo) * 100.0)
        })
        .collect();
    if stoch.len() < k_period {
        return None;
    }

    let k_line: Vec<Option<f64>> = stoch.windows(k_period).map(mean_defined).collect();
    if k_line.len() < d_period {
        return None;
    }
    let d = mean_defined(&k_line[k_line.len() - d_period..])?;
    let k = (*k_line.last()?)?;
    Some((k, d))
}

/// Commodity channel index on typical price
pub fn cci(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let typical: Vec<f64> = candles[candles.len() - period..]
        .iter()
        .map(typical_price)
        .collect();
    let mean = typical.iter().sum::<f64>() / period as f64;
    let deviation = typical.iter().map(|tp| (tp - mean).abs()).sum::<f64>() / period as f64;
    if deviation == 0.0 {
        return None;
    }
    let last = typical[typical.len() - 1];
    Some((last - mean) / (0.015 * deviation))
}

/// Williams %R in [-100, 0]
pub fn williams_r(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period {
        return None;
    }
    let window = &candles[candles.len() - period..];
    let highest = window.iter().map(|c| c.high).fold(f64::MIN, f64::max);
    let lowest = window.iter().map(|c| c.low).fold(f64::MAX, f64::min);
    if highest <= lowest {
        return None;
    }
    let close = window[window.len() - 1].close;
    Some((highest - close) / (highest - lowest) * -100.0)
}

/// Parabolic SAR, seeded long from the first candle's low
pub fn psar(candles: &[Candle], step: f64, max_step: f64) -> Option<f64> {
    let first = candles.first()?;
    let mut sar = first.low;
    let mut rising = true;
    let mut extreme = first.high;
    let mut af = step;

    for candle in &candles[1..] {
        sar += af * (extreme - sar);
        if rising {
            if candle.low < sar {
                rising = false;
                sar = extreme;
                extreme = candle.low;
                af = step;
            } else if candle.high > extreme {
                extreme = candle.high;
                af = (af + step).min(max_step);
            }
        } else if candle.high > sar {
            rising = true;
            sar = extreme;
            extreme = candle.high;
            af = step;
        } else if candle.low < extreme {
            extreme = candle.low;
            af = (af + step).min(max_step);
        }
    }
    Some(sar)
}

/// Cumulative volume-weighted typical price
pub fn vwap(candles: &[Candle]) -> Option<f64> {
    let (notional, volume) = candles.iter().fold((0.0, 0.0), |(n, v), c| {
        (n + typical_price(c) * c.volume, v + c.volume)
    });
    (volume > 0.0).then(|| notional / volume)
}

/// Average true range as a simple mean of the last `period` true ranges
pub fn atr(candles: &[Candle], period: usize) -> Option<f64> {
    if period == 0 || candles.len() < period + 1 {
        return None;
    }
    let ranges: Vec<f64> = candles
        .windows(2)
        .map(|w| {
            let (prev, cur) = (&w[0], &w[1]);
            (cur.high - cur.low)
                .max((cur.high - prev.close).abs())
                .max((cur.low - prev.close).abs())
        })
        .collect();
    sma(&ranges, period)
}

fn typical_price(candle: &Candle) -> f64 {
    (candle.high + candle.low + candle.close) / 3.0
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::MAX, f64::MIN), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

fn mean_defined(window: &[Option<f64>]) -> Option<f64> {
    let sum: f64 = window.iter().copied().sum::<Option<f64>>()?;
    Some(sum / window.len() as f64)
}
