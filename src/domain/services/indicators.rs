//! Pure indicator math over oldest-to-newest price series.
//!
//! Every function is deterministic and never panics: series too short for
//! the requested period return the documented sentinel instead.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// One OHLC bar, oldest-to-newest in any series passed to these functions.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candle {
    pub time: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

/// Sentinel returned when a series is too short for the requested period.
pub const INSUFFICIENT_DATA: f64 = -1.0;

/// Exponential moving average. Seeded with the simple average of the first
/// `period` values, then `ema = (price - ema) * k + ema` with
/// `k = 2 / (period + 1)`. Returns `INSUFFICIENT_DATA` when the series is
/// shorter than `period`.
pub fn ema(prices: &[f64], period: usize) -> f64 {
    match ema_series(prices, period) {
        Some(series) => *series.last().unwrap_or(&INSUFFICIENT_DATA),
        None => INSUFFICIENT_DATA,
    }
}

/// Full EMA series: one value per point from index `period - 1` onward.
/// `None` when the series is shorter than `period` or the period is zero.
pub fn ema_series(prices: &[f64], period: usize) -> Option<Vec<f64>> {
    if period == 0 || prices.len() < period {
        return None;
    }
    let multiplier = 2.0 / (period as f64 + 1.0);
    let seed = prices[..period].iter().sum::<f64>() / period as f64;

    let mut series = Vec::with_capacity(prices.len() - period + 1);
    let mut current = seed;
    series.push(current);
    for &price in &prices[period..] {
        current = (price - current) * multiplier + current;
        series.push(current);
    }
    Some(series)
}

/// Relative strength index with Wilder smoothing. The first `period` deltas
/// seed the gain/loss averages; later deltas are smoothed with
/// `avg = (avg * (period - 1) + current) / period`. Returns 100 when the
/// average loss is zero, and `INSUFFICIENT_DATA` below `period + 1` points.
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return INSUFFICIENT_DATA;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for i in 1..=period {
        let change = prices[i] - prices[i - 1];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += change.abs();
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for i in (period + 1)..prices.len() {
        let change = prices[i] - prices[i - 1];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, change.abs())
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// MACD line, signal line, and histogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

impl MacdValue {
    pub fn insufficient() -> Self {
        MacdValue {
            macd: INSUFFICIENT_DATA,
            signal: INSUFFICIENT_DATA,
            histogram: INSUFFICIENT_DATA,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.macd == INSUFFICIENT_DATA
            && self.signal == INSUFFICIENT_DATA
            && self.histogram == INSUFFICIENT_DATA
    }
}

/// MACD over the full EMA series: the MACD line is fast-EMA minus slow-EMA
/// computed pointwise (not just at the last bar), the signal is an EMA of
/// that line, and the histogram is their difference. Sentinel triple below
/// `slow + signal_period` points or when the periods are not `fast < slow`.
pub fn macd(prices: &[f64], fast: usize, slow: usize, signal_period: usize) -> MacdValue {
    // The alignment below requires the fast series to be the longer one.
    if fast >= slow || prices.len() < slow + signal_period {
        return MacdValue::insufficient();
    }
    let fast_series = match ema_series(prices, fast) {
        Some(s) => s,
        None => return MacdValue::insufficient(),
    };
    let slow_series = match ema_series(prices, slow) {
        Some(s) => s,
        None => return MacdValue::insufficient(),
    };

    // The slow series starts later; align the fast series to its tail.
    let offset = fast_series.len() - slow_series.len();
    let macd_line: Vec<f64> = slow_series
        .iter()
        .enumerate()
        .map(|(i, s)| fast_series[i + offset] - s)
        .collect();

    let signal_series = match ema_series(&macd_line, signal_period) {
        Some(s) => s,
        None => return MacdValue::insufficient(),
    };

    let macd_last = *macd_line.last().unwrap_or(&INSUFFICIENT_DATA);
    let signal_last = *signal_series.last().unwrap_or(&INSUFFICIENT_DATA);
    MacdValue {
        macd: macd_last,
        signal: signal_last,
        histogram: macd_last - signal_last,
    }
}

/// Average true range with Wilder smoothing. True range per bar is the
/// largest of high-low, |high-prevClose| and |low-prevClose|; the first
/// `period` true ranges seed a simple average. Returns 0.0 below
/// `period + 1` bars.
pub fn atr(candles: &[Candle], period: usize) -> f64 {
    if period == 0 || candles.len() < period + 1 {
        return 0.0;
    }

    let true_ranges: Vec<f64> = candles
        .windows(2)
        .map(|pair| {
            let prev_close = pair[0].close;
            let bar = pair[1];
            (bar.high - bar.low)
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs())
        })
        .collect();

    let mut value = true_ranges[..period].iter().sum::<f64>() / period as f64;
    for &tr in &true_ranges[period..] {
        value = (value * (period as f64 - 1.0) + tr) / period as f64;
    }
    value
}

/// Percent change between the last price and the one `lookback` points
/// before it. Returns 0.0 on a zero denominator or a series too short for
/// the lookback.
pub fn percent_change(prices: &[f64], lookback: usize) -> f64 {
    if prices.len() < lookback + 1 {
        return 0.0;
    }
    let last = prices[prices.len() - 1];
    let base = prices[prices.len() - 1 - lookback];
    if base == 0.0 {
        return 0.0;
    }
    (last - base) / base * 100.0
}

/// The derived signals handed to the decision provider for one symbol.
#[derive(Debug, Clone, Serialize)]
pub struct IndicatorSnapshot {
    pub ema_9: f64,
    pub ema_21: f64,
    pub rsi_14: f64,
    pub macd: MacdValue,
    pub atr_14: f64,
    pub change_1h: f64,
    pub change_4h: f64,
}

impl IndicatorSnapshot {
    /// Compute the standard snapshot from 5-minute candles, oldest first.
    pub fn from_candles(candles: &[Candle]) -> Self {
        let closes: Vec<f64> = candles.iter().map(|c| c.close).collect();
        IndicatorSnapshot {
            ema_9: ema(&closes, 9),
            ema_21: ema(&closes, 21),
            rsi_14: rsi(&closes, 14),
            macd: macd(&closes, 12, 26, 9),
            atr_14: atr(candles, 14),
            change_1h: percent_change(&closes, 12),
            change_4h: percent_change(&closes, 48),
        }
    }
}
