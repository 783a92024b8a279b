//! Persisted model artifact

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{Result, StockError};
use crate::features::{FeatureSchema, FeatureWindow};
use crate::model::gbm::{GbmParams, GradientBoostedTrees};
use crate::model::metrics::ModelMetrics;
use crate::series::TsCode;

/// Current on-disk format
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;

/// A trained model with everything needed to validate inference against it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub format_version: u32,
    pub schema: FeatureSchema,
    pub model: GradientBoostedTrees,
    pub params: GbmParams,
    /// Validation metrics recorded at training time
    pub metrics: ModelMetrics,
    pub split_date: NaiveDate,
    pub train_rows: usize,
    pub validation_rows: usize,
    /// Metrics on the trailing block held out from both fit and validation
    #[serde(default)]
    pub test_metrics: Option<ModelMetrics>,
    #[serde(default)]
    pub test_start: Option<NaiveDate>,
    #[serde(default)]
    pub test_rows: usize,
    pub pool: Vec<TsCode>,
    pub trained_at: DateTime<Utc>,
}

impl ModelArtifact {
    /// Write the artifact as pretty JSON, creating parent directories
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), features = self.schema.len(), "model artifact saved");
        Ok(())
    }

    /// Read and validate an artifact
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let artifact: Self = serde_json::from_str(&json)?;
        artifact.validate()?;
        tracing::debug!(
            path = %path.display(),
            window_size = artifact.schema.window_size,
            days = artifact.schema.days,
            "model artifact loaded"
        );
        Ok(artifact)
    }

    /// Check the format version and that schema and model agree
    pub fn validate(&self) -> Result<()> {
        if self.format_version != ARTIFACT_FORMAT_VERSION {
            return Err(StockError::SchemaMismatch {
                expected: format!("format_version {ARTIFACT_FORMAT_VERSION}"),
                found: format!("format_version {}", self.format_version),
            });
        }
        self.schema.validate()?;
        if self.model.n_features() != self.schema.len() {
            return Err(StockError::SchemaMismatch {
                expected: format!("{} features", self.schema.len()),
                found: format!("model with {} features", self.model.n_features()),
            });
        }
        Ok(())
    }

    /// Predict from a feature window laid out per the recorded schema
    pub fn predict(&self, window: &FeatureWindow) -> Result<f64> {
        self.schema.check_names(window.names())?;
        self.model.predict(window.values())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::feature_names;

    fn tiny_artifact(window_size: usize, days: usize) -> ModelArtifact {
        let schema = FeatureSchema::new(window_size, days).unwrap();
        let features: Vec<Vec<f64>> = (0..40)
            .map(|i| (0..schema.len()).map(|j| f64::from(i * j as i32 % 7)).collect())
            .collect();
        let targets: Vec<f64> = (0..40).map(|i| 0.2 + f64::from(i % 5) * 0.01).collect();
        let params = GbmParams {
            n_estimators: 5,
            min_samples_leaf: 5,
            ..Default::default()
        };
        let model = GradientBoostedTrees::fit(&features, &targets, &params).unwrap();
        let predicted = model.predict_batch(&features).unwrap();
        ModelArtifact {
            format_version: ARTIFACT_FORMAT_VERSION,
            metrics: ModelMetrics::regression(&targets, &predicted).unwrap(),
            schema,
            model,
            params,
            split_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            train_rows: 40,
            validation_rows: 10,
            test_metrics: None,
            test_start: None,
            test_rows: 0,
            pool: vec![TsCode::parse("600519.SH").unwrap()],
            trained_at: Utc::now(),
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("models").join("vol.json");
        let artifact = tiny_artifact(2, 5);

        artifact.save(&path).unwrap();
        let loaded = ModelArtifact::load(&path).unwrap();
        assert_eq!(loaded, artifact);
    }

    #[test]
    fn test_load_rejects_unknown_version() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.json");
        let mut artifact = tiny_artifact(2, 5);
        artifact.format_version = 99;
        artifact.save(&path).unwrap();

        assert!(matches!(
            ModelArtifact::load(&path),
            Err(StockError::SchemaMismatch { .. })
        ));
    }

    #[test]
    fn test_load_rejects_tampered_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vol.json");
        let mut artifact = tiny_artifact(2, 5);
        artifact.schema.window_size = 3;
        artifact.save(&path).unwrap();
        assert!(matches!(
            ModelArtifact::load(&path),
            Err(StockError::SchemaMismatch { .. })
        ));

        let mut artifact = tiny_artifact(2, 5);
        artifact.schema = FeatureSchema::new(3, 5).unwrap();
        assert_eq!(artifact.schema.names, feature_names(3));
        assert!(artifact.validate().is_err());
    }

    #[test]
    fn test_artifact_without_holdout_fields_loads() {
        let artifact = tiny_artifact(2, 5);
        let mut value = serde_json::to_value(&artifact).unwrap();
        let fields = value.as_object_mut().unwrap();
        for key in ["test_metrics", "test_start", "test_rows"] {
            fields.remove(key);
        }

        let parsed: ModelArtifact = serde_json::from_value(value).unwrap();
        assert_eq!(parsed, artifact);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            ModelArtifact::load(dir.path().join("absent.json")),
            Err(StockError::Io(_))
        ));
    }
}
