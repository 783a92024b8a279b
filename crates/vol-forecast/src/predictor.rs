//! Volatility inference against a trained artifact

use chrono::{Local, NaiveDate, TimeDelta};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ErrorReport, Result, StockError};
use crate::features::{build_windows, latest_window};
use crate::indicators;
use crate::market_data::MarketDataClient;
use crate::model::ModelArtifact;
use crate::series::TsCode;

/// Point forecast for one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    pub ts_code: TsCode,
    /// Annualised volatility expected over the next `days` trading days
    pub predicted_volatility: f64,
    /// Validation metrics recorded when the model was trained
    pub metrics: BTreeMap<String, f64>,
    /// Last trading day in the feature window
    pub as_of_date: NaiveDate,
    pub days: usize,
    pub window_size: usize,
}

/// A past forecast beside the volatility that followed it
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub reference_date: NaiveDate,
    pub predicted: f64,
    /// Realised annualised volatility; unknown until `days` more sessions trade
    pub actual: Option<f64>,
}

/// Forecasts over the most recent reference dates of one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionHistory {
    pub ts_code: TsCode,
    pub days: usize,
    pub window_size: usize,
    /// Oldest first
    pub points: Vec<HistoryPoint>,
}

impl PredictionHistory {
    /// Points whose realised volatility is known
    pub fn realised(&self) -> impl Iterator<Item = (&HistoryPoint, f64)> {
        self.points.iter().filter_map(|p| p.actual.map(|a| (p, a)))
    }

    /// Mean of `|actual - predicted|` over the realised points
    pub fn mean_abs_error(&self) -> Option<f64> {
        let errors: Vec<f64> = self
            .realised()
            .map(|(p, actual)| (actual - p.predicted).abs())
            .collect();
        (!errors.is_empty()).then(|| errors.iter().sum::<f64>() / errors.len() as f64)
    }
}

/// Direction of the latest forecasts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    Rising,
    Falling,
    Stable,
    /// Fewer than three forecasts
    Unknown,
}

impl Trend {
    /// Compare the mean of the last three forecasts with the three before
    ///
    /// A move of more than 5% either way counts; with fewer than six
    /// forecasts there is nothing earlier to compare with and the trend is
    /// stable.
    pub fn from_forecasts(values: &[f64]) -> Self {
        let n = values.len();
        if n < 3 {
            return Self::Unknown;
        }
        let mean = |v: &[f64]| v.iter().sum::<f64>() / v.len() as f64;
        let recent = mean(&values[n - 3..]);
        let earlier = if n >= 6 { mean(&values[n - 6..n - 3]) } else { recent };

        if recent > earlier * 1.05 {
            Self::Rising
        } else if recent < earlier * 0.95 {
            Self::Falling
        } else {
            Self::Stable
        }
    }
}

/// How far the model's validation fit can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    High,
    Medium,
    Low,
}

impl Confidence {
    pub fn from_r2(r2: f64) -> Self {
        if r2 > 0.7 {
            Self::High
        } else if r2 > 0.5 {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// Latest forecast with its recent trend and the model's confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub ts_code: TsCode,
    pub predicted_volatility: f64,
    pub as_of_date: NaiveDate,
    pub trend: Trend,
    pub confidence: Confidence,
    /// Validation r2 the confidence is derived from
    pub r2: f64,
    /// Forecasts the trend was computed over
    pub forecasts: usize,
}

/// Per-ticker outcome of a comparison
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompareOutcome {
    Prediction(PredictionResult),
    Error(ErrorReport),
}

/// Outcomes keyed by ticker
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompareReport {
    pub results: BTreeMap<TsCode, CompareOutcome>,
}

impl CompareReport {
    pub fn predictions(&self) -> impl Iterator<Item = &PredictionResult> {
        self.results.values().filter_map(|o| match o {
            CompareOutcome::Prediction(p) => Some(p),
            CompareOutcome::Error(_) => None,
        })
    }

    pub fn errors(&self) -> impl Iterator<Item = &ErrorReport> {
        self.results.values().filter_map(|o| match o {
            CompareOutcome::Error(e) => Some(e),
            CompareOutcome::Prediction(_) => None,
        })
    }

    /// Highest forecast volatility
    pub fn highest(&self) -> Option<&PredictionResult> {
        self.predictions()
            .max_by(|a, b| a.predicted_volatility.total_cmp(&b.predicted_volatility))
    }

    /// Lowest forecast volatility
    pub fn lowest(&self) -> Option<&PredictionResult> {
        self.predictions()
            .min_by(|a, b| a.predicted_volatility.total_cmp(&b.predicted_volatility))
    }
}

/// Predicts forward volatility with one immutable artifact
pub struct VolatilityPredictor {
    artifact: Arc<ModelArtifact>,
    client: Arc<MarketDataClient>,
}

impl VolatilityPredictor {
    pub fn new(artifact: Arc<ModelArtifact>, client: Arc<MarketDataClient>) -> Self {
        Self { artifact, client }
    }

    pub fn artifact(&self) -> &ModelArtifact {
        &self.artifact
    }

    /// Forecast volatility of `ts_code` over the next `days` trading days
    ///
    /// `days` and `window_size` must be the values the artifact was trained
    /// with.
    pub async fn predict(
        &self,
        ts_code: &TsCode,
        days: usize,
        window_size: usize,
    ) -> Result<PredictionResult> {
        self.artifact.schema.check_params(window_size, days)?;

        let indicators = self.fetch_indicators(ts_code, window_size).await?;
        let window = latest_window(&indicators, window_size)?;
        let predicted = self.artifact.predict(&window)?;

        tracing::debug!(%ts_code, as_of = %window.reference_date, predicted, "volatility predicted");

        Ok(PredictionResult {
            ts_code: ts_code.clone(),
            predicted_volatility: predicted.max(0.0),
            metrics: self.artifact.metrics.to_map(),
            as_of_date: window.reference_date,
            days,
            window_size,
        })
    }

    /// Forecasts for the last `lookback` reference dates, next to what followed
    ///
    /// Uses the artifact's own horizon and window. The newest `days` points
    /// have no realised volatility yet.
    pub async fn history(&self, ts_code: &TsCode, lookback: usize) -> Result<PredictionHistory> {
        if lookback == 0 {
            return Err(StockError::InvalidRequest(
                "history lookback must be at least 1".to_string(),
            ));
        }
        let schema = &self.artifact.schema;
        let (window_size, days) = (schema.window_size, schema.days);

        let computed = self.fetch_indicators(ts_code, window_size + lookback - 1).await?;
        let mut samples: Vec<_> = build_windows(&computed, window_size, days)?.collect();
        if samples.is_empty() {
            return Err(StockError::InsufficientData {
                stage: format!("prediction history for {ts_code}"),
                rows: computed.len(),
                required: window_size + indicators::warmup(),
            });
        }
        let samples = samples.split_off(samples.len().saturating_sub(lookback));

        let mut points = Vec::with_capacity(samples.len());
        for sample in &samples {
            points.push(HistoryPoint {
                reference_date: sample.reference_date,
                predicted: self.artifact.predict(&sample.features)?.max(0.0),
                actual: sample.label,
            });
        }

        tracing::debug!(%ts_code, points = points.len(), "prediction history built");
        Ok(PredictionHistory {
            ts_code: ts_code.clone(),
            days,
            window_size,
            points,
        })
    }

    /// Latest forecast with the trend over the last `forecasts` reference dates
    pub async fn summary(&self, ts_code: &TsCode, forecasts: usize) -> Result<ForecastSummary> {
        let history = self.history(ts_code, forecasts).await?;
        let values: Vec<f64> = history.points.iter().map(|p| p.predicted).collect();
        let Some(latest) = history.points.last() else {
            return Err(StockError::InsufficientData {
                stage: format!("forecast summary for {ts_code}"),
                rows: 0,
                required: 1,
            });
        };

        let r2 = self.artifact.metrics.r2;
        Ok(ForecastSummary {
            ts_code: ts_code.clone(),
            predicted_volatility: latest.predicted,
            as_of_date: latest.reference_date,
            trend: Trend::from_forecasts(&values),
            confidence: Confidence::from_r2(r2),
            r2,
            forecasts: values.len(),
        })
    }

    /// Fetch enough history for `windowed_rows` rows past the indicator warmup
    async fn fetch_indicators(
        &self,
        ts_code: &TsCode,
        windowed_rows: usize,
    ) -> Result<indicators::IndicatorSeries> {
        let config = self.client.config();
        let as_of = config.as_of.unwrap_or_else(|| Local::now().date_naive());
        let rows_needed = windowed_rows + indicators::warmup();
        // Roughly five trading days per seven calendar days, plus holidays
        let span = config.history_calendar_days.max(rows_needed as i64 * 7 / 5 + 30);
        let start = as_of
            .checked_sub_signed(TimeDelta::days(span))
            .unwrap_or(NaiveDate::MIN);

        let series = self
            .client
            .fetch(ts_code, start, as_of, config.field_set)
            .await?;
        indicators::compute(series)
    }

    /// Forecast with the artifact's own horizon and window
    pub async fn predict_default(&self, ts_code: &TsCode) -> Result<PredictionResult> {
        let schema = &self.artifact.schema;
        self.predict(ts_code, schema.days, schema.window_size).await
    }

    /// Forecast every ticker concurrently, reporting failures per ticker
    pub async fn compare(&self, ts_codes: &[TsCode]) -> CompareReport {
        let concurrency = self.client.config().compare_concurrency.max(1);

        let outcomes: Vec<(TsCode, Result<PredictionResult>)> = stream::iter(ts_codes.iter().cloned())
            .map(|ts_code| async move {
                let result = self.predict_default(&ts_code).await;
                (ts_code, result)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut report = CompareReport::default();
        for (ts_code, result) in outcomes {
            let outcome = match result {
                Ok(prediction) => CompareOutcome::Prediction(prediction),
                Err(err) => {
                    tracing::warn!(%ts_code, error = %err, "prediction failed");
                    CompareOutcome::Error(err.report(Some(ts_code.as_str())))
                }
            };
            report.results.insert(ts_code, outcome);
        }
        report
    }
}
