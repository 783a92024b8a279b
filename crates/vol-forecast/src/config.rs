//! Configuration for volatility forecasting

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{Result, StockError};
use crate::pool::PoolFilters;
use crate::series::FieldSet;
use crate::trainer::TrainerConfig;

/// Default Tushare Pro endpoint
pub const DEFAULT_API_URL: &str = "http://api.tushare.pro";

/// Configuration for data access, training and inference
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastConfig {
    /// Provider endpoint
    pub api_url: String,

    /// Provider token
    pub api_token: Option<String>,

    /// Provider calls allowed per minute
    pub requests_per_minute: u32,

    /// Maximum number of attempts for a throttled call
    pub max_retries: u32,

    /// Initial backoff duration for retries
    pub retry_backoff_base: Duration,

    /// Upper bound on a single backoff
    pub retry_backoff_max: Duration,

    /// Request timeout duration
    pub request_timeout: Duration,

    /// How long fetched series stay cached
    pub cache_ttl: Duration,

    /// Price basis used by the training and inference pipelines
    pub field_set: FieldSet,

    /// Feature window length in trading days
    pub window_size: usize,

    /// Forward volatility horizon in trading days
    pub days: usize,

    /// Minimum calendar days of history fetched for one prediction
    pub history_calendar_days: i64,

    /// Date predictions are made as of; today when unset
    pub as_of: Option<NaiveDate>,

    /// Concurrent predictions in `compare`
    pub compare_concurrency: usize,

    /// Stock pool filters
    pub pool: PoolFilters,

    /// Model training settings
    pub trainer: TrainerConfig,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            api_token: None,
            requests_per_minute: 200,
            max_retries: 3,
            retry_backoff_base: Duration::from_secs(1),
            retry_backoff_max: Duration::from_secs(30),
            request_timeout: Duration::from_secs(30),
            cache_ttl: Duration::from_secs(3600), // 1 hour
            field_set: FieldSet::Daily,
            window_size: 5,
            days: 5,
            history_calendar_days: 500,
            as_of: None,
            compare_concurrency: 4,
            pool: PoolFilters::default(),
            trainer: TrainerConfig::default(),
        }
    }
}

impl ForecastConfig {
    /// Create a new configuration builder
    pub fn builder() -> ForecastConfigBuilder {
        ForecastConfigBuilder::default()
    }

    /// Load provider token and endpoint from environment
    pub fn with_env(mut self) -> Self {
        if let Ok(token) = std::env::var("TUSHARE_TOKEN") {
            self.api_token = Some(token);
        }
        if let Ok(url) = std::env::var("TUSHARE_API_URL") {
            self.api_url = url;
        }
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(StockError::Config(
                "max_retries must be greater than 0".to_string(),
            ));
        }
        if self.requests_per_minute == 0 {
            return Err(StockError::Config(
                "requests_per_minute must be greater than 0".to_string(),
            ));
        }
        if self.window_size == 0 {
            return Err(StockError::Config(
                "window_size must be greater than 0".to_string(),
            ));
        }
        if self.days < 2 {
            return Err(StockError::Config(
                "days must be at least 2 to measure volatility".to_string(),
            ));
        }
        if self.history_calendar_days <= 0 {
            return Err(StockError::Config(
                "history_calendar_days must be greater than 0".to_string(),
            ));
        }
        if self.compare_concurrency == 0 {
            return Err(StockError::Config(
                "compare_concurrency must be greater than 0".to_string(),
            ));
        }
        self.pool.validate()?;
        self.trainer.validate()?;
        Ok(())
    }

    /// Get retry backoff duration for attempt number
    pub fn retry_backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt);
        self.retry_backoff_base
            .saturating_mul(factor)
            .min(self.retry_backoff_max)
    }
}

/// Builder for ForecastConfig
#[derive(Debug, Default)]
pub struct ForecastConfigBuilder {
    api_url: Option<String>,
    api_token: Option<String>,
    requests_per_minute: Option<u32>,
    max_retries: Option<u32>,
    retry_backoff_base: Option<Duration>,
    request_timeout: Option<Duration>,
    cache_ttl: Option<Duration>,
    field_set: Option<FieldSet>,
    window_size: Option<usize>,
    days: Option<usize>,
    history_calendar_days: Option<i64>,
    as_of: Option<NaiveDate>,
    compare_concurrency: Option<usize>,
    pool: Option<PoolFilters>,
    trainer: Option<TrainerConfig>,
}

impl ForecastConfigBuilder {
    /// Set the provider endpoint
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    /// Set the provider token
    pub fn api_token(mut self, token: impl Into<String>) -> Self {
        self.api_token = Some(token.into());
        self
    }

    /// Set provider calls per minute
    pub fn requests_per_minute(mut self, rpm: u32) -> Self {
        self.requests_per_minute = Some(rpm);
        self
    }

    /// Set maximum retries
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = Some(retries);
        self
    }

    /// Set retry backoff base duration
    pub fn retry_backoff_base(mut self, duration: Duration) -> Self {
        self.retry_backoff_base = Some(duration);
        self
    }

    /// Set request timeout
    pub fn request_timeout(mut self, duration: Duration) -> Self {
        self.request_timeout = Some(duration);
        self
    }

    /// Set cache TTL
    pub fn cache_ttl(mut self, duration: Duration) -> Self {
        self.cache_ttl = Some(duration);
        self
    }

    /// Set the price basis
    pub fn field_set(mut self, fields: FieldSet) -> Self {
        self.field_set = Some(fields);
        self
    }

    /// Set the feature window length
    pub fn window_size(mut self, window_size: usize) -> Self {
        self.window_size = Some(window_size);
        self
    }

    /// Set the forward volatility horizon
    pub fn days(mut self, days: usize) -> Self {
        self.days = Some(days);
        self
    }

    /// Set the minimum history fetched per prediction
    pub fn history_calendar_days(mut self, days: i64) -> Self {
        self.history_calendar_days = Some(days);
        self
    }

    /// Pin the prediction date
    pub fn as_of(mut self, date: NaiveDate) -> Self {
        self.as_of = Some(date);
        self
    }

    /// Set the fan-out of `compare`
    pub fn compare_concurrency(mut self, concurrency: usize) -> Self {
        self.compare_concurrency = Some(concurrency);
        self
    }

    /// Set pool filters
    pub fn pool(mut self, pool: PoolFilters) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Set trainer settings
    pub fn trainer(mut self, trainer: TrainerConfig) -> Self {
        self.trainer = Some(trainer);
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<ForecastConfig> {
        let defaults = ForecastConfig::default();

        let config = ForecastConfig {
            api_url: self.api_url.unwrap_or(defaults.api_url),
            api_token: self.api_token,
            requests_per_minute: self
                .requests_per_minute
                .unwrap_or(defaults.requests_per_minute),
            max_retries: self.max_retries.unwrap_or(defaults.max_retries),
            retry_backoff_base: self.retry_backoff_base.unwrap_or(defaults.retry_backoff_base),
            request_timeout: self.request_timeout.unwrap_or(defaults.request_timeout),
            cache_ttl: self.cache_ttl.unwrap_or(defaults.cache_ttl),
            field_set: self.field_set.unwrap_or(defaults.field_set),
            window_size: self.window_size.unwrap_or(defaults.window_size),
            days: self.days.unwrap_or(defaults.days),
            history_calendar_days: self
                .history_calendar_days
                .unwrap_or(defaults.history_calendar_days),
            as_of: self.as_of,
            compare_concurrency: self
                .compare_concurrency
                .unwrap_or(defaults.compare_concurrency),
            pool: self.pool.unwrap_or(defaults.pool),
            trainer: self.trainer.unwrap_or(defaults.trainer),
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ForecastConfig::default();
        assert_eq!(config.window_size, 5);
        assert_eq!(config.days, 5);
        assert_eq!(config.max_retries, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = ForecastConfig::builder()
            .api_token("token")
            .max_retries(5)
            .window_size(10)
            .days(20)
            .request_timeout(Duration::from_secs(60))
            .build()
            .unwrap();

        assert_eq!(config.api_token.as_deref(), Some("token"));
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.window_size, 10);
        assert_eq!(config.days, 20);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_validation_rejects_short_horizon() {
        assert!(ForecastConfig::builder().days(1).build().is_err());
        assert!(ForecastConfig::builder().window_size(0).build().is_err());
        assert!(ForecastConfig::builder().max_retries(0).build().is_err());
        assert!(ForecastConfig::builder().compare_concurrency(0).build().is_err());
        let bad_pool = PoolFilters {
            index_code: "SSE50".to_string(),
            ..Default::default()
        };
        assert!(ForecastConfig::builder().pool(bad_pool).build().is_err());
    }

    #[test]
    fn test_retry_backoff() {
        let config = ForecastConfig::default();
        assert_eq!(config.retry_backoff(0), Duration::from_secs(1));
        assert_eq!(config.retry_backoff(1), Duration::from_secs(2));
        assert_eq!(config.retry_backoff(2), Duration::from_secs(4));
        assert_eq!(config.retry_backoff(10), Duration::from_secs(30));
    }

    #[test]
    fn test_config_serde() {
        let config = ForecastConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: ForecastConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.history_calendar_days, config.history_calendar_days);
        assert_eq!(back.field_set, FieldSet::Daily);
    }
}
