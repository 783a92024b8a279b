//! Error types for volatility forecasting operations

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Volatility forecasting errors
#[derive(Debug, Error)]
pub enum StockError {
    /// Ticker code does not match `NNNNNN.SH|SZ`
    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    /// Request parameters are out of range
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The provider has no rows for the requested ticker and range
    #[error("Data not available for {ts_code} between {start} and {end}")]
    DataUnavailable {
        ts_code: String,
        start: NaiveDate,
        end: NaiveDate,
    },

    /// Provider throttled us and retries were exhausted
    #[error("Rate limit exceeded for {provider} after {attempts} attempts")]
    RateLimited { provider: String, attempts: u32 },

    /// Not enough rows to train or evaluate
    #[error("Insufficient data for {stage}: {rows} rows, at least {required} required")]
    InsufficientData {
        stage: String,
        rows: usize,
        required: usize,
    },

    /// Inference parameters or features disagree with the model artifact
    #[error("Schema mismatch: model expects {expected}, got {found}")]
    SchemaMismatch { expected: String, found: String },

    /// Provider returned an error payload
    #[error("Provider error: {0}")]
    Provider(String),

    /// Network or HTTP error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Result type alias for forecasting operations
pub type Result<T> = std::result::Result<T, StockError>;

/// Coarse error category exposed to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    DataUnavailable,
    RateLimited,
    InsufficientData,
    SchemaMismatch,
    Provider,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::DataUnavailable => "data_unavailable",
            Self::RateLimited => "rate_limited",
            Self::InsufficientData => "insufficient_data",
            Self::SchemaMismatch => "schema_mismatch",
            Self::Provider => "provider",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StockError {
    /// Category of this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSymbol(_) | Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::DataUnavailable { .. } => ErrorKind::DataUnavailable,
            Self::RateLimited { .. } => ErrorKind::RateLimited,
            Self::InsufficientData { .. } => ErrorKind::InsufficientData,
            Self::SchemaMismatch { .. } => ErrorKind::SchemaMismatch,
            Self::Provider(_) | Self::Network(_) => ErrorKind::Provider,
            Self::Json(_) | Self::Io(_) | Self::Config(_) | Self::Other(_) => ErrorKind::Internal,
        }
    }

    /// Whether retrying the same call may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RateLimited { .. })
    }

    /// Serializable form of this error, tagged with the ticker it concerns
    pub fn report(&self, ts_code: Option<&str>) -> ErrorReport {
        ErrorReport {
            kind: self.kind(),
            ts_code: ts_code.map(str::to_string),
            message: self.to_string(),
        }
    }
}

/// Structured error a caller can render without knowing our internals
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts_code: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.ts_code {
            Some(code) => write!(f, "[{code}] {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Convert anyhow::Error to StockError
impl From<anyhow::Error> for StockError {
    fn from(err: anyhow::Error) -> Self {
        StockError::Other(err.to_string())
    }
}
