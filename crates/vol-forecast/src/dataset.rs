//! Training table assembly across a stock pool

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use crate::error::{ErrorReport, Result, StockError};
use crate::features::{FeatureSchema, FeatureWindow, build_windows};
use crate::indicators;
use crate::market_data::MarketDataClient;
use crate::series::TsCode;

/// One labelled row of the training table
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingSample {
    pub ts_code: TsCode,
    pub reference_date: NaiveDate,
    pub features: FeatureWindow,
    pub label: f64,
}

/// Labelled samples sharing one feature schema, unique per (ticker, date)
#[derive(Debug, Clone, PartialEq)]
pub struct TrainingTable {
    schema: FeatureSchema,
    samples: Vec<TrainingSample>,
    keys: HashSet<(TsCode, NaiveDate)>,
}

impl TrainingTable {
    pub fn new(schema: FeatureSchema) -> Self {
        Self {
            schema,
            samples: Vec::new(),
            keys: HashSet::new(),
        }
    }

    /// Append a sample, rejecting duplicates and foreign layouts
    pub fn insert(&mut self, sample: TrainingSample) -> Result<()> {
        self.schema.check_names(sample.features.names())?;
        if !self
            .keys
            .insert((sample.ts_code.clone(), sample.reference_date))
        {
            return Err(StockError::InvalidRequest(format!(
                "duplicate training sample for {} on {}",
                sample.ts_code, sample.reference_date
            )));
        }
        self.samples.push(sample);
        Ok(())
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn samples(&self) -> &[TrainingSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Distinct reference dates, ascending
    pub fn reference_dates(&self) -> BTreeSet<NaiveDate> {
        self.samples.iter().map(|s| s.reference_date).collect()
    }

    /// Distinct tickers, ascending
    pub fn tickers(&self) -> Vec<TsCode> {
        let set: BTreeSet<&TsCode> = self.samples.iter().map(|s| &s.ts_code).collect();
        set.into_iter().cloned().collect()
    }

    /// Feature matrix and targets of the samples matching `keep`
    pub fn matrix(&self, keep: impl Fn(&TrainingSample) -> bool) -> (Vec<Vec<f64>>, Vec<f64>) {
        self.samples
            .iter()
            .filter(|s| keep(s))
            .map(|s| (s.features.values().to_vec(), s.label))
            .unzip()
    }
}

/// Result of assembling a pool
#[derive(Debug, Clone)]
pub struct Assembly {
    pub table: TrainingTable,
    /// Labelled rows contributed by each ticker that was processed
    pub row_counts: BTreeMap<TsCode, usize>,
    /// Tickers skipped because of an error
    pub failures: Vec<ErrorReport>,
}

/// Builds training tables from market data
pub struct DatasetAssembler {
    client: Arc<MarketDataClient>,
}

impl DatasetAssembler {
    pub fn new(client: Arc<MarketDataClient>) -> Self {
        Self { client }
    }

    /// Build the labelled training table for `pool` over `[start, end]`
    ///
    /// A ticker that fails is logged and recorded, never fatal. Only invalid
    /// window parameters abort the whole assembly.
    pub async fn assemble(
        &self,
        pool: &[TsCode],
        window_size: usize,
        days: usize,
        (start, end): (NaiveDate, NaiveDate),
    ) -> Result<Assembly> {
        let schema = FeatureSchema::new(window_size, days)?;
        let mut assembly = Assembly {
            table: TrainingTable::new(schema),
            row_counts: BTreeMap::new(),
            failures: Vec::new(),
        };

        for ts_code in pool {
            if assembly.row_counts.contains_key(ts_code) {
                continue;
            }
            match self
                .ticker_samples(ts_code, window_size, days, start, end)
                .await
            {
                Ok(samples) => {
                    let count = samples.len();
                    for sample in samples {
                        assembly.table.insert(sample)?;
                    }
                    tracing::debug!(%ts_code, rows = count, "ticker assembled");
                    assembly.row_counts.insert(ts_code.clone(), count);
                }
                Err(err) => {
                    tracing::warn!(%ts_code, error = %err, "skipping ticker");
                    assembly.failures.push(err.report(Some(ts_code.as_str())));
                }
            }
        }

        tracing::info!(
            tickers = assembly.row_counts.len(),
            failed = assembly.failures.len(),
            rows = assembly.table.len(),
            "dataset assembled"
        );
        Ok(assembly)
    }

    async fn ticker_samples(
        &self,
        ts_code: &TsCode,
        window_size: usize,
        days: usize,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<TrainingSample>> {
        let fields = self.client.config().field_set;
        let series = self.client.fetch(ts_code, start, end, fields).await?;
        let indicators = indicators::compute(series)?;

        Ok(build_windows(&indicators, window_size, days)?
            .filter_map(|sample| {
                sample.label.map(|label| TrainingSample {
                    ts_code: ts_code.clone(),
                    reference_date: sample.reference_date,
                    features: sample.features,
                    label,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ForecastConfig;
    use crate::error::ErrorKind;
    use crate::indicators::{compute, warmup};
    use crate::testing::{SyntheticProvider, trading_days};

    fn code(s: &str) -> TsCode {
        TsCode::parse(s).unwrap()
    }

    fn assembler(provider: SyntheticProvider) -> DatasetAssembler {
        let config = Arc::new(ForecastConfig::default());
        DatasetAssembler::new(Arc::new(MarketDataClient::new(Arc::new(provider), config)))
    }

    fn full_range(rows: usize) -> (NaiveDate, NaiveDate) {
        let days = trading_days(SyntheticProvider::START, rows);
        (days[0], days[rows - 1])
    }

    #[tokio::test]
    async fn test_row_count_is_sum_of_labelled_windows() {
        let provider = SyntheticProvider::new()
            .with_ticker("600519.SH", 1, 200)
            .with_ticker("601318.SH", 2, 150)
            .with_ticker("600036.SH", 3, 200)
            .with_failure("600036.SH");
        let pool = vec![
            code("600519.SH"),
            code("601318.SH"),
            code("600036.SH"),
            code("000001.SZ"),
        ];

        let assembly = assembler(provider)
            .assemble(&pool, 5, 10, full_range(200))
            .await
            .unwrap();

        // tail = rows - warmup, windows = tail - 4, labelled = windows - 10
        let expected_a = 200 - warmup() - 4 - 10;
        let expected_b = 150 - warmup() - 4 - 10;
        assert_eq!(assembly.row_counts[&code("600519.SH")], expected_a);
        assert_eq!(assembly.row_counts[&code("601318.SH")], expected_b);
        assert_eq!(assembly.table.len(), expected_a + expected_b);
        assert_eq!(assembly.row_counts.values().sum::<usize>(), assembly.table.len());

        let failed: Vec<_> = assembly
            .failures
            .iter()
            .map(|f| (f.ts_code.as_deref().unwrap(), f.kind))
            .collect();
        assert_eq!(
            failed,
            vec![
                ("600036.SH", ErrorKind::Provider),
                ("000001.SZ", ErrorKind::DataUnavailable)
            ]
        );
        assert!(assembly.table.samples().iter().all(|s| s.label > 0.0));
    }

    #[tokio::test]
    async fn test_long_horizon_ticker_contributes_nothing() {
        let provider = SyntheticProvider::new().with_ticker("600519.SH", 4, 400);
        let assembly = assembler(provider)
            .assemble(&[code("600519.SH")], 5, 365, full_range(400))
            .await
            .unwrap();

        assert!(assembly.table.is_empty());
        assert!(assembly.failures.is_empty());
        assert_eq!(assembly.row_counts[&code("600519.SH")], 0);
    }

    #[tokio::test]
    async fn test_duplicate_pool_entries_are_ignored() {
        let provider = SyntheticProvider::new().with_ticker("600519.SH", 5, 120);
        let pool = vec![code("600519.SH"), code("600519.SH")];
        let assembly = assembler(provider)
            .assemble(&pool, 3, 5, full_range(120))
            .await
            .unwrap();
        assert_eq!(assembly.row_counts.len(), 1);
        assert_eq!(assembly.table.len(), 120 - warmup() - 2 - 5);
    }

    #[tokio::test]
    async fn test_invalid_window_params_abort() {
        let assembler = assembler(SyntheticProvider::new());
        let err = assembler
            .assemble(&[code("600519.SH")], 5, 1, full_range(10))
            .await
            .unwrap_err();
        assert!(matches!(err, StockError::InvalidRequest(_)));
    }

    #[test]
    fn test_table_rejects_duplicates_and_foreign_schema() {
        let days = trading_days(SyntheticProvider::START, 80);
        let points = crate::testing::synthetic_points(9, &days);
        let series = crate::series::TickerSeries::new(
            code("600519.SH"),
            crate::series::FieldSet::Daily,
            points,
        )
        .unwrap();
        let ind = compute(series).unwrap();
        let sample = build_windows(&ind, 5, 5).unwrap().next().unwrap();
        let row = TrainingSample {
            ts_code: code("600519.SH"),
            reference_date: sample.reference_date,
            features: sample.features,
            label: sample.label.unwrap(),
        };

        let mut table = TrainingTable::new(FeatureSchema::new(5, 5).unwrap());
        table.insert(row.clone()).unwrap();
        assert!(matches!(table.insert(row.clone()), Err(StockError::InvalidRequest(_))));

        let mut other = row.clone();
        other.ts_code = code("601318.SH");
        table.insert(other).unwrap();
        assert_eq!(table.tickers(), vec![code("600519.SH"), code("601318.SH")]);
        assert_eq!(table.reference_dates().len(), 1);

        let mut narrow = TrainingTable::new(FeatureSchema::new(4, 5).unwrap());
        assert!(matches!(narrow.insert(row), Err(StockError::SchemaMismatch { .. })));
    }
}
