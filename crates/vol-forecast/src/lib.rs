//! Stock volatility forecasting
//!
//! Forecasts the annualised volatility of A-share stocks over a chosen
//! horizon of trading days. The pipeline is:
//!
//! - Market data from a provider (Tushare), cached per ticker and field set
//! - Stock pool selection from index constituents with liquidity filters
//! - Technical indicators and sliding feature windows with forward labels
//! - Gradient-boosted regression trees trained on a chronological split
//! - Persisted model artifacts that refuse mismatched inference parameters
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use vol_forecast::{ForecastConfig, MarketDataClient, ModelArtifact, TsCode, VolatilityPredictor};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ForecastConfig::default().with_env();
//!     let client = Arc::new(MarketDataClient::from_config(Arc::new(config))?);
//!     let artifact = Arc::new(ModelArtifact::load("models/vol_5d.json")?);
//!
//!     let predictor = VolatilityPredictor::new(artifact, client);
//!     let result = predictor.predict(&TsCode::parse("600519.SH")?, 5, 5).await?;
//!     println!("{:.2}%", result.predicted_volatility * 100.0);
//!
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod cache;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod indicators;
pub mod market_data;
pub mod model;
pub mod pool;
pub mod predictor;
pub mod report;
pub mod series;
pub mod trainer;

#[cfg(test)]
mod testing;

pub use api::{MarketDataProvider, TushareClient};
pub use config::ForecastConfig;
pub use dataset::{Assembly, DatasetAssembler, TrainingTable};
pub use error::{ErrorKind, ErrorReport, Result, StockError};
pub use features::{FeatureSchema, FeatureWindow};
pub use market_data::MarketDataClient;
pub use model::{GbmParams, ModelArtifact, ModelMetrics};
pub use pool::{PoolFilters, StockPool, StockPoolBuilder};
pub use predictor::{
    CompareOutcome, CompareReport, Confidence, ForecastSummary, PredictionHistory, PredictionResult,
    Trend, VolatilityPredictor,
};
pub use series::{FieldSet, TickerSeries, TsCode};
pub use trainer::{ModelTrainer, TrainOutcome, TrainerConfig, WalkForwardReport};
