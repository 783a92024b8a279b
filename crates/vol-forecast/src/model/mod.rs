//! Volatility regression model, metrics and persisted artifact

pub mod artifact;
pub mod gbm;
pub mod metrics;

pub use artifact::{ARTIFACT_FORMAT_VERSION, ModelArtifact};
pub use gbm::{GbmParams, GradientBoostedTrees};
pub use metrics::ModelMetrics;
