//! Chronological training and walk-forward evaluation

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::dataset::{TrainingSample, TrainingTable};
use crate::error::{Result, StockError};
use crate::model::{ARTIFACT_FORMAT_VERSION, GbmParams, GradientBoostedTrees, ModelArtifact, ModelMetrics};

/// Training settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerConfig {
    /// Fewer training rows than this aborts the run
    pub min_train_rows: usize,
    /// Share of distinct reference dates used for training when no split date is given
    pub train_ratio: f64,
    /// Share of the latest reference dates held out for a final test; none when unset
    pub test_ratio: Option<f64>,
    pub params: GbmParams,
}

impl Default for TrainerConfig {
    fn default() -> Self {
        Self {
            min_train_rows: 100,
            train_ratio: 0.7,
            test_ratio: None,
            params: GbmParams::default(),
        }
    }
}

impl TrainerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_train_rows == 0 {
            return Err(StockError::Config(
                "min_train_rows must be greater than 0".to_string(),
            ));
        }
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            return Err(StockError::Config(format!(
                "train_ratio must be in (0, 1), got {}",
                self.train_ratio
            )));
        }
        if let Some(test_ratio) = self.test_ratio {
            if !(test_ratio > 0.0 && self.train_ratio + test_ratio < 1.0) {
                return Err(StockError::Config(format!(
                    "test_ratio must be positive and leave room for validation, got {test_ratio}"
                )));
            }
        }
        self.params.validate()
    }
}

/// Samples on either side of a split date, with an optional trailing test block
#[derive(Debug)]
pub struct ChronologicalSplit<'a> {
    pub train: Vec<&'a TrainingSample>,
    pub validation: Vec<&'a TrainingSample>,
    pub test: Vec<&'a TrainingSample>,
}

/// Partition by reference date: strictly before `split_date` trains
pub fn chronological_split(table: &TrainingTable, split_date: NaiveDate) -> ChronologicalSplit<'_> {
    holdout_split(table, split_date, None)
}

/// Partition into train, validation and, from `test_start` on, test
pub fn holdout_split(
    table: &TrainingTable,
    split_date: NaiveDate,
    test_start: Option<NaiveDate>,
) -> ChronologicalSplit<'_> {
    let mut split = ChronologicalSplit {
        train: Vec::new(),
        validation: Vec::new(),
        test: Vec::new(),
    };
    for sample in table.samples() {
        let date = sample.reference_date;
        if date < split_date {
            split.train.push(sample);
        } else if test_start.is_some_and(|start| date >= start) {
            split.test.push(sample);
        } else {
            split.validation.push(sample);
        }
    }
    split
}

/// A trained artifact with its validation and, when held out, test metrics
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub artifact: ModelArtifact,
    pub metrics: ModelMetrics,
    pub test_metrics: Option<ModelMetrics>,
}

/// Metrics of one walk-forward fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoldResult {
    /// First validation date; all training rows precede it
    pub split_date: NaiveDate,
    /// First date after the validation block, if any
    pub validation_end: Option<NaiveDate>,
    pub train_rows: usize,
    pub validation_rows: usize,
    pub metrics: ModelMetrics,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalkForwardReport {
    pub folds: Vec<FoldResult>,
    /// Sample-weighted mean over the folds
    pub mean: ModelMetrics,
}

/// Fits volatility models on training tables
pub struct ModelTrainer {
    config: TrainerConfig,
}

impl ModelTrainer {
    pub fn new(config: TrainerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TrainerConfig {
        &self.config
    }

    /// Fit on rows before `split_date` and evaluate on the rest
    pub fn train(&self, table: &TrainingTable, split_date: NaiveDate) -> Result<TrainOutcome> {
        self.train_with_holdout(table, split_date, None)
    }

    /// Fit on rows before `split_date`, validate up to `test_start` and test after it
    ///
    /// The test block never influences the fit; its metrics are only reported.
    pub fn train_with_holdout(
        &self,
        table: &TrainingTable,
        split_date: NaiveDate,
        test_start: Option<NaiveDate>,
    ) -> Result<TrainOutcome> {
        self.config.validate()?;
        if let Some(test_start) = test_start.filter(|start| *start <= split_date) {
            return Err(StockError::InvalidRequest(format!(
                "test start {test_start} must come after split date {split_date}"
            )));
        }

        let split = holdout_split(table, split_date, test_start);
        let (model, metrics) = self.fit_and_evaluate(&split.train, &split.validation)?;

        let test_metrics = match test_start {
            None => None,
            Some(_) if split.test.is_empty() => {
                return Err(StockError::InsufficientData {
                    stage: "test".to_string(),
                    rows: 0,
                    required: 1,
                });
            }
            Some(_) => {
                let (features, targets) = to_matrix(&split.test);
                let predicted = model.predict_batch(&features)?;
                Some(ModelMetrics::regression(&targets, &predicted)?)
            }
        };

        tracing::info!(
            %split_date,
            train_rows = split.train.len(),
            validation_rows = split.validation.len(),
            test_rows = split.test.len(),
            r2 = metrics.r2,
            mae = metrics.mae,
            rmse = metrics.rmse,
            test_r2 = test_metrics.map(|m| m.r2),
            "model trained"
        );

        let artifact = ModelArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            schema: table.schema().clone(),
            model,
            params: self.config.params.clone(),
            metrics,
            split_date,
            train_rows: split.train.len(),
            validation_rows: split.validation.len(),
            test_metrics,
            test_start,
            test_rows: split.test.len(),
            pool: table.tickers(),
            trained_at: Utc::now(),
        };
        Ok(TrainOutcome {
            artifact,
            metrics,
            test_metrics,
        })
    }

    /// Expanding-window evaluation over `folds` consecutive date blocks
    ///
    /// Distinct dates are cut into `folds + 1` blocks; fold k trains on the
    /// first k blocks and validates on block k + 1. Folds without enough
    /// training rows are skipped.
    pub fn walk_forward(&self, table: &TrainingTable, folds: usize) -> Result<WalkForwardReport> {
        self.config.validate()?;
        if folds == 0 {
            return Err(StockError::InvalidRequest(
                "walk-forward needs at least one fold".to_string(),
            ));
        }
        let dates: Vec<NaiveDate> = table.reference_dates().into_iter().collect();
        if dates.len() < folds + 1 {
            return Err(StockError::InsufficientData {
                stage: "walk-forward dates".to_string(),
                rows: dates.len(),
                required: folds + 1,
            });
        }

        let block = dates.len() / (folds + 1);
        let mut results = Vec::with_capacity(folds);
        for k in 1..=folds {
            let split_date = dates[k * block];
            let validation_end = (k < folds).then(|| dates[(k + 1) * block]);
            let in_block =
                |d: NaiveDate| d >= split_date && validation_end.is_none_or(|end| d < end);

            let train: Vec<&TrainingSample> = table
                .samples()
                .iter()
                .filter(|s| s.reference_date < split_date)
                .collect();
            let validation: Vec<&TrainingSample> = table
                .samples()
                .iter()
                .filter(|s| in_block(s.reference_date))
                .collect();

            match self.fit_and_evaluate(&train, &validation) {
                Ok((_, metrics)) => {
                    tracing::info!(fold = k, %split_date, r2 = metrics.r2, rmse = metrics.rmse, "fold evaluated");
                    results.push(FoldResult {
                        split_date,
                        validation_end,
                        train_rows: train.len(),
                        validation_rows: validation.len(),
                        metrics,
                    });
                }
                Err(err @ StockError::InsufficientData { .. }) => {
                    tracing::warn!(fold = k, %split_date, error = %err, "skipping fold");
                }
                Err(err) => return Err(err),
            }
        }

        let mean = ModelMetrics::weighted_mean(
            &results.iter().map(|f| f.metrics).collect::<Vec<_>>(),
        )
        .ok_or_else(|| StockError::InsufficientData {
            stage: "walk-forward folds".to_string(),
            rows: 0,
            required: 1,
        })?;
        Ok(WalkForwardReport {
            folds: results,
            mean,
        })
    }

    fn fit_and_evaluate(
        &self,
        train: &[&TrainingSample],
        validation: &[&TrainingSample],
    ) -> Result<(GradientBoostedTrees, ModelMetrics)> {
        if train.len() < self.config.min_train_rows {
            return Err(StockError::InsufficientData {
                stage: "training".to_string(),
                rows: train.len(),
                required: self.config.min_train_rows,
            });
        }
        if validation.is_empty() {
            return Err(StockError::InsufficientData {
                stage: "validation".to_string(),
                rows: 0,
                required: 1,
            });
        }

        let (features, targets) = to_matrix(train);
        let model = GradientBoostedTrees::fit(&features, &targets, &self.config.params)?;

        let (val_features, val_targets) = to_matrix(validation);
        let predicted = model.predict_batch(&val_features)?;
        let metrics = ModelMetrics::regression(&val_targets, &predicted)?;
        Ok((model, metrics))
    }
}

/// Split date leaving `ratio` of the distinct reference dates for training
pub fn split_date_for_ratio(table: &TrainingTable, ratio: f64) -> Result<NaiveDate> {
    if !(ratio > 0.0 && ratio < 1.0) {
        return Err(StockError::InvalidRequest(format!(
            "train ratio must be in (0, 1), got {ratio}"
        )));
    }
    let dates: Vec<NaiveDate> = table.reference_dates().into_iter().collect();
    if dates.len() < 2 {
        return Err(StockError::InsufficientData {
            stage: "split dates".to_string(),
            rows: dates.len(),
            required: 2,
        });
    }
    let idx = ((dates.len() as f64 * ratio).round() as usize).clamp(1, dates.len() - 1);
    Ok(dates[idx])
}

/// Split and test start dates cutting the distinct reference dates into
/// `train_ratio`, the validation remainder and `test_ratio`
pub fn holdout_dates(
    table: &TrainingTable,
    train_ratio: f64,
    test_ratio: f64,
) -> Result<(NaiveDate, NaiveDate)> {
    if !(test_ratio > 0.0 && train_ratio > 0.0 && train_ratio + test_ratio < 1.0) {
        return Err(StockError::InvalidRequest(format!(
            "train ratio {train_ratio} and test ratio {test_ratio} leave no validation block"
        )));
    }
    let dates: Vec<NaiveDate> = table.reference_dates().into_iter().collect();
    let n = dates.len();
    let split = (n as f64 * train_ratio).round() as usize;
    let test = (n as f64 * (1.0 - test_ratio)).round() as usize;
    if split == 0 || test <= split || test >= n {
        return Err(StockError::InsufficientData {
            stage: "holdout dates".to_string(),
            rows: n,
            required: 3,
        });
    }
    Ok((dates[split], dates[test]))
}

fn to_matrix(samples: &[&TrainingSample]) -> (Vec<Vec<f64>>, Vec<f64>) {
    samples
        .iter()
        .map(|s| (s.features.values().to_vec(), s.label))
        .unzip()
}
