//! Sliding feature windows and forward volatility labels

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{Result, StockError};
use crate::indicators::{INDICATOR_NAMES, IndicatorSeries, sample_std};

/// Calendar features appended after the lagged indicators
pub const CALENDAR_FEATURES: [&str; 2] = ["day_of_week", "month"];

/// Annualisation factor for daily volatility
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

const LOG_RETURN: usize = 0;

/// Feature layout a model was trained on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureSchema {
    pub window_size: usize,
    pub days: usize,
    pub names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(window_size: usize, days: usize) -> Result<Self> {
        validate_params(window_size, days)?;
        Ok(Self {
            window_size,
            days,
            names: feature_names(window_size),
        })
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Reject inference parameters other than the recorded ones
    pub fn check_params(&self, window_size: usize, days: usize) -> Result<()> {
        if window_size == self.window_size && days == self.days {
            return Ok(());
        }
        Err(StockError::SchemaMismatch {
            expected: format!("window_size={}, days={}", self.window_size, self.days),
            found: format!("window_size={window_size}, days={days}"),
        })
    }

    /// Reject a feature window whose layout differs from the recorded one
    pub fn check_names(&self, names: &[String]) -> Result<()> {
        if names == self.names.as_slice() {
            return Ok(());
        }
        let position = self
            .names
            .iter()
            .zip(names)
            .position(|(a, b)| a != b)
            .unwrap_or_else(|| self.names.len().min(names.len()));
        Err(StockError::SchemaMismatch {
            expected: format!(
                "{} features ({})",
                self.names.len(),
                self.names.get(position).map_or("end", String::as_str)
            ),
            found: format!(
                "{} features ({})",
                names.len(),
                names.get(position).map_or("end", String::as_str)
            ),
        })
    }

    /// Check that the recorded names are the ones `window_size` produces
    pub fn validate(&self) -> Result<()> {
        validate_params(self.window_size, self.days)?;
        self.check_names(&feature_names(self.window_size))
    }
}

/// Deterministic feature names for a window size
///
/// Lag-major: every indicator at `t-0` (the reference date), then `t-1`, and
/// so on, followed by the calendar features.
pub fn feature_names(window_size: usize) -> Vec<String> {
    let mut names = Vec::with_capacity(window_size * INDICATOR_NAMES.len() + CALENDAR_FEATURES.len());
    for lag in 0..window_size {
        names.extend(INDICATOR_NAMES.iter().map(|name| format!("{name}_t-{lag}")));
    }
    names.extend(CALENDAR_FEATURES.iter().map(|name| (*name).to_string()));
    names
}

fn validate_params(window_size: usize, days: usize) -> Result<()> {
    if window_size == 0 {
        return Err(StockError::InvalidRequest(
            "window_size must be at least 1".to_string(),
        ));
    }
    if days < 2 {
        return Err(StockError::InvalidRequest(format!(
            "days must be at least 2 to measure volatility, got {days}"
        )));
    }
    Ok(())
}

/// Feature vector ending at a reference date
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureWindow {
    pub reference_date: NaiveDate,
    names: Arc<[String]>,
    values: Vec<f64>,
}

impl FeatureWindow {
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A window with its forward label, if the forward range is observed
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSample {
    pub reference_date: NaiveDate,
    pub features: FeatureWindow,
    pub label: Option<f64>,
}

impl WindowSample {
    pub fn is_labelled(&self) -> bool {
        self.label.is_some()
    }
}

/// Lazy iterator over the windows of one indicator series
///
/// Cloning restarts from the clone point; nothing beyond one window is
/// buffered.
#[derive(Debug, Clone)]
pub struct Windows<'a> {
    indicators: &'a IndicatorSeries,
    names: Arc<[String]>,
    window_size: usize,
    days: usize,
    /// Absolute row index of the next window's reference date
    next: usize,
}

impl Windows<'_> {
    fn window_at(&self, pos: usize) -> Option<FeatureWindow> {
        build_window(self.indicators, &self.names, self.window_size, pos)
    }

    fn label_at(&self, pos: usize) -> Option<f64> {
        if pos + self.days >= self.indicators.len() {
            return None;
        }
        let returns: Option<Vec<f64>> = self.indicators.rows()[pos + 1..=pos + self.days]
            .iter()
            .map(|row| row[LOG_RETURN])
            .collect();
        returns
            .and_then(|r| sample_std(&r))
            .map(|std| std * TRADING_DAYS_PER_YEAR.sqrt())
    }
}

impl Iterator for Windows<'_> {
    type Item = WindowSample;

    fn next(&mut self) -> Option<WindowSample> {
        while self.next < self.indicators.len() {
            let pos = self.next;
            self.next += 1;
            if let Some(features) = self.window_at(pos) {
                return Some(WindowSample {
                    reference_date: features.reference_date,
                    label: self.label_at(pos),
                    features,
                });
            }
        }
        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.indicators.len().saturating_sub(self.next)))
    }
}

/// Slide a `window_size` window over the fully-defined tail of `indicators`
///
/// Samples whose `days` forward returns are not all observed carry no label
/// and are only usable for inference.
pub fn build_windows(
    indicators: &IndicatorSeries,
    window_size: usize,
    days: usize,
) -> Result<Windows<'_>> {
    validate_params(window_size, days)?;
    Ok(Windows {
        indicators,
        names: feature_names(window_size).into(),
        window_size,
        days,
        next: indicators.defined_from() + window_size - 1,
    })
}

/// Most recent feature window, for inference
pub fn latest_window(indicators: &IndicatorSeries, window_size: usize) -> Result<FeatureWindow> {
    if window_size == 0 {
        return Err(StockError::InvalidRequest(
            "window_size must be at least 1".to_string(),
        ));
    }
    let defined = indicators.len() - indicators.defined_from();
    let insufficient = || StockError::InsufficientData {
        stage: format!("feature window for {}", indicators.series().ts_code()),
        rows: defined,
        required: window_size,
    };
    if defined < window_size {
        return Err(insufficient());
    }
    let names: Arc<[String]> = feature_names(window_size).into();
    build_window(indicators, &names, window_size, indicators.len() - 1).ok_or_else(insufficient)
}

fn build_window(
    indicators: &IndicatorSeries,
    names: &Arc<[String]>,
    window_size: usize,
    pos: usize,
) -> Option<FeatureWindow> {
    let first = pos.checked_sub(window_size - 1)?;
    let rows = indicators.rows().get(first..=pos)?;
    let reference_date = indicators.points().get(pos)?.date;

    let mut values = Vec::with_capacity(names.len());
    for row in rows.iter().rev() {
        for value in row {
            values.push((*value)?);
        }
    }
    values.push(f64::from(reference_date.weekday().num_days_from_monday()));
    values.push(f64::from(reference_date.month()));

    Some(FeatureWindow {
        reference_date,
        names: Arc::clone(names),
        values,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::{compute, warmup};
    use crate::series::{FieldSet, TickerSeries, TsCode};
    use crate::testing::{synthetic_points, trading_days};

    fn indicators(rows: usize) -> IndicatorSeries {
        let days = trading_days(NaiveDate::from_ymd_opt(2021, 3, 1).unwrap(), rows);
        let series = TickerSeries::new(
            TsCode::parse("000001.SZ").unwrap(),
            FieldSet::Daily,
            synthetic_points(23, &days),
        )
        .unwrap();
        compute(series).unwrap()
    }

    #[test]
    fn test_feature_names() {
        let names = feature_names(2);
        assert_eq!(names.len(), 2 * INDICATOR_NAMES.len() + 2);
        assert_eq!(names[0], "log_return_t-0");
        assert_eq!(names[INDICATOR_NAMES.len()], "log_return_t-1");
        assert_eq!(names[names.len() - 2], "day_of_week");
        assert_eq!(names[names.len() - 1], "month");
        assert_eq!(feature_names(2), names);
    }

    #[test]
    fn test_windows_are_complete() {
        let ind = indicators(120);
        for window_size in [1, 3, 5, 10] {
            let samples: Vec<_> = build_windows(&ind, window_size, 5).unwrap().collect();
            let tail = ind.len() - ind.defined_from();
            assert_eq!(samples.len(), tail - window_size + 1);
            for sample in &samples {
                assert_eq!(sample.features.len(), window_size * INDICATOR_NAMES.len() + 2);
                assert_eq!(sample.features.names().len(), sample.features.len());
                assert!(sample.features.values().iter().all(|v| v.is_finite()));
            }
        }
    }

    #[test]
    fn test_inference_only_count() {
        let ind = indicators(90);
        let tail = ind.len() - ind.defined_from();
        for window_size in 1..=8 {
            for days in [2, 5, 20, 57, 80] {
                let samples: Vec<_> = build_windows(&ind, window_size, days).unwrap().collect();
                let unlabelled = samples.iter().filter(|s| !s.is_labelled()).count();
                assert_eq!(unlabelled, days.min(tail - window_size + 1));
                // Labels never precede an unlabelled window
                let first_unlabelled = samples.iter().position(|s| !s.is_labelled());
                if let Some(idx) = first_unlabelled {
                    assert!(samples[idx..].iter().all(|s| !s.is_labelled()));
                }
            }
        }
    }

    #[test]
    fn test_long_horizon_yields_no_labels() {
        let ind = indicators(400);
        let samples: Vec<_> = build_windows(&ind, 5, 365).unwrap().collect();
        assert_eq!(samples.len(), 400 - warmup() - 5 + 1);
        assert!(samples.iter().all(|s| s.label.is_none()));
    }

    #[test]
    fn test_short_series_yields_nothing() {
        let ind = indicators(warmup() + 3);
        assert_eq!(build_windows(&ind, 5, 5).unwrap().count(), 0);
        assert!(matches!(
            latest_window(&ind, 5),
            Err(StockError::InsufficientData { rows: 3, required: 5, .. })
        ));
    }

    #[test]
    fn test_label_is_annualised_sample_std() {
        let ind = indicators(60);
        let first = build_windows(&ind, 3, 4).unwrap().next().unwrap();
        let pos = ind.defined_from() + 2;
        let closes = ind.series().closes();
        let returns: Vec<f64> = (pos + 1..=pos + 4)
            .map(|i| (closes[i] / closes[i - 1]).ln())
            .collect();
        let expected = sample_std(&returns).unwrap() * 252f64.sqrt();

        assert_eq!(first.reference_date, ind.points()[pos].date);
        assert!((first.label.unwrap() - expected).abs() < 1e-12);
        assert!(first.label.unwrap() > 0.0);
    }

    #[test]
    fn test_windows_are_restartable() {
        let ind = indicators(80);
        let mut iter = build_windows(&ind, 4, 6).unwrap();
        iter.next();
        let replay = iter.clone();
        assert_eq!(iter.collect::<Vec<_>>(), replay.collect::<Vec<_>>());
    }

    #[test]
    fn test_latest_window_matches_last_sample() {
        let ind = indicators(100);
        let last = build_windows(&ind, 5, 5).unwrap().last().unwrap();
        let latest = latest_window(&ind, 5).unwrap();
        assert_eq!(last.features, latest);
        assert_eq!(latest.reference_date, ind.series().last_date().unwrap());

        let day = latest.values()[latest.len() - 2];
        assert_eq!(day, f64::from(latest.reference_date.weekday().num_days_from_monday()));
    }

    #[test]
    fn test_invalid_params() {
        let ind = indicators(50);
        assert!(matches!(build_windows(&ind, 0, 5), Err(StockError::InvalidRequest(_))));
        assert!(matches!(build_windows(&ind, 5, 1), Err(StockError::InvalidRequest(_))));
        assert!(FeatureSchema::new(5, 1).is_err());
    }

    #[test]
    fn test_schema_checks() {
        let schema = FeatureSchema::new(5, 20).unwrap();
        assert!(schema.validate().is_ok());
        assert!(schema.check_params(5, 20).is_ok());
        assert!(matches!(schema.check_params(6, 20), Err(StockError::SchemaMismatch { .. })));
        assert!(matches!(schema.check_params(5, 21), Err(StockError::SchemaMismatch { .. })));
        assert!(schema.check_names(&feature_names(4)).is_err());

        let mut tampered = schema.clone();
        tampered.names.swap(0, 1);
        assert!(matches!(tampered.validate(), Err(StockError::SchemaMismatch { .. })));
    }
}
