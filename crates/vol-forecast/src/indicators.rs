//! Technical indicators used as model features
//!
//! Every indicator is a pure function of the ordered price series. Rows where
//! an indicator lacks history are `None`, never zero, so downstream windowing
//! can drop them instead of training on fabricated values.

use ta::Next;
use ta::indicators::{ExponentialMovingAverage, RelativeStrengthIndex, SimpleMovingAverage};

use crate::error::{Result, StockError};
use crate::series::{PricePoint, TickerSeries};

/// Indicator columns in feature order
pub const INDICATOR_NAMES: [&str; INDICATOR_COUNT] = [
    "log_return",
    "ma_ratio_5",
    "ma_ratio_10",
    "ma_ratio_20",
    "volatility_5",
    "volatility_20",
    "volume_ratio_20",
    "rsi_14",
    "macd",
    "macd_signal",
    "macd_hist",
];

pub const INDICATOR_COUNT: usize = 11;

const MA_PERIODS: [usize; 3] = [5, 10, 20];
const VOL_PERIODS: [usize; 2] = [5, 20];
const VOLUME_PERIOD: usize = 20;
const RSI_PERIOD: usize = 14;
const MACD_FAST: usize = 12;
const MACD_SLOW: usize = 26;
const MACD_SIGNAL: usize = 9;

/// Index of the first row where every indicator can be defined
pub const WARMUP: usize = MACD_SLOW - 1 + MACD_SIGNAL - 1;

/// One row of indicator values, in [`INDICATOR_NAMES`] order
pub type IndicatorRow = [Option<f64>; INDICATOR_COUNT];

/// A price series with its indicator columns
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSeries {
    series: TickerSeries,
    rows: Vec<IndicatorRow>,
}

impl IndicatorSeries {
    pub fn series(&self) -> &TickerSeries {
        &self.series
    }

    pub fn points(&self) -> &[PricePoint] {
        self.series.points()
    }

    pub fn rows(&self) -> &[IndicatorRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one indicator by name
    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        let idx = INDICATOR_NAMES.iter().position(|n| *n == name)?;
        Some(self.rows.iter().map(|row| row[idx]).collect())
    }

    /// Start of the contiguous tail where every indicator is defined
    ///
    /// Equals `len()` when the last row has a gap.
    pub fn defined_from(&self) -> usize {
        self.rows
            .iter()
            .rposition(|row| row.iter().any(Option::is_none))
            .map_or(0, |i| i + 1)
    }
}

/// Largest first-defined index across all indicators
pub fn warmup() -> usize {
    WARMUP
}

/// Compute every indicator over `series`
pub fn compute(series: TickerSeries) -> Result<IndicatorSeries> {
    let points = series.points();
    let n = points.len();
    let mut rows: Vec<IndicatorRow> = vec![[None; INDICATOR_COUNT]; n];

    let returns = log_returns(points);
    set_column(&mut rows, 0, &returns);

    for (k, &period) in MA_PERIODS.iter().enumerate() {
        let mut sma = SimpleMovingAverage::new(period).map_err(indicator_error)?;
        let values: Vec<Option<f64>> = points
            .iter()
            .enumerate()
            .map(|(t, p)| {
                let avg = sma.next(p.close);
                (t + 1 >= period).then(|| p.close / avg - 1.0)
            })
            .collect();
        set_column(&mut rows, 1 + k, &values);
    }

    for (k, &period) in VOL_PERIODS.iter().enumerate() {
        set_column(&mut rows, 4 + k, &rolling_std(&returns, period));
    }

    let mut volume_sma = SimpleMovingAverage::new(VOLUME_PERIOD).map_err(indicator_error)?;
    let volume_ratio: Vec<Option<f64>> = points
        .iter()
        .enumerate()
        .map(|(t, p)| {
            let avg = volume_sma.next(p.volume);
            (t + 1 >= VOLUME_PERIOD).then(|| p.volume / avg)
        })
        .collect();
    set_column(&mut rows, 6, &volume_ratio);

    let mut rsi = RelativeStrengthIndex::new(RSI_PERIOD).map_err(indicator_error)?;
    let rsi_values: Vec<Option<f64>> = points
        .iter()
        .enumerate()
        .map(|(t, p)| {
            let value = rsi.next(p.close);
            (t >= RSI_PERIOD).then_some(value)
        })
        .collect();
    set_column(&mut rows, 7, &rsi_values);

    let mut fast = ExponentialMovingAverage::new(MACD_FAST).map_err(indicator_error)?;
    let mut slow = ExponentialMovingAverage::new(MACD_SLOW).map_err(indicator_error)?;
    let mut signal = ExponentialMovingAverage::new(MACD_SIGNAL).map_err(indicator_error)?;
    let mut macd = Vec::with_capacity(n);
    let mut macd_signal = Vec::with_capacity(n);
    let mut macd_hist = Vec::with_capacity(n);

    for (t, p) in points.iter().enumerate() {
        let line = fast.next(p.close) - slow.next(p.close);
        let line_defined = t + 1 >= MACD_SLOW;
        // The signal EMA is only fed once the MACD line itself is defined
        let sig = line_defined.then(|| signal.next(line));
        let sig_defined = t >= WARMUP;

        macd.push(line_defined.then(|| line / p.close));
        macd_signal.push(sig.filter(|_| sig_defined).map(|s| s / p.close));
        macd_hist.push(sig.filter(|_| sig_defined).map(|s| (line - s) / p.close));
    }
    set_column(&mut rows, 8, &macd);
    set_column(&mut rows, 9, &macd_signal);
    set_column(&mut rows, 10, &macd_hist);

    Ok(IndicatorSeries { series, rows })
}

/// `ln(close_t / close_{t-1})`, undefined at t = 0
pub fn log_returns(points: &[PricePoint]) -> Vec<Option<f64>> {
    let mut out = Vec::with_capacity(points.len());
    out.push(None);
    out.extend(
        points
            .windows(2)
            .map(|w| finite((w[1].close / w[0].close).ln())),
    );
    out.truncate(points.len());
    out
}

/// Sample standard deviation (ddof = 1) of the finite values in `values`
///
/// `None` with fewer than two values.
pub fn sample_std(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
    finite(var.sqrt())
}

fn rolling_std(returns: &[Option<f64>], period: usize) -> Vec<Option<f64>> {
    (0..returns.len())
        .map(|t| {
            if t < period {
                return None;
            }
            let window: Option<Vec<f64>> = returns[t + 1 - period..=t].iter().copied().collect();
            window.and_then(|w| sample_std(&w))
        })
        .collect()
}

fn set_column(rows: &mut [IndicatorRow], idx: usize, values: &[Option<f64>]) {
    for (row, value) in rows.iter_mut().zip(values) {
        row[idx] = value.and_then(finite);
    }
}

fn finite(value: f64) -> Option<f64> {
    value.is_finite().then_some(value)
}

fn indicator_error(err: ta::errors::TaError) -> StockError {
    StockError::Other(format!("indicator setup failed: {err}"))
}
