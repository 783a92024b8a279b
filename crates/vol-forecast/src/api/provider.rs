//! Provider abstraction for daily market data

use async_trait::async_trait;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::series::{PricePoint, TsCode};

/// Price adjustment factor for one trading day
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjFactor {
    pub date: NaiveDate,
    pub factor: f64,
}

/// Weight of one constituent in an index on a given day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexWeight {
    pub index_code: TsCode,
    pub con_code: TsCode,
    pub trade_date: NaiveDate,
    pub weight: f64,
}

/// Listing status as reported by the exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ListStatus {
    Listed,
    Delisted,
    Paused,
}

impl ListStatus {
    /// Parse the provider's single-letter code
    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "L" => Some(Self::Listed),
            "D" => Some(Self::Delisted),
            "P" => Some(Self::Paused),
            _ => None,
        }
    }
}

/// Basic listing information for one stock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing {
    pub ts_code: TsCode,
    pub name: String,
    pub status: ListStatus,
    pub list_date: Option<NaiveDate>,
    pub delist_date: Option<NaiveDate>,
}

/// Source of raw market data
///
/// Implementations return rows sorted by date ascending without duplicates,
/// and report throttling as [`crate::StockError::RateLimited`] so callers can
/// retry.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MarketDataProvider: Send + Sync {
    /// Provider name for logs and errors
    fn name(&self) -> &'static str;

    /// Unadjusted daily bars for `[start, end]`
    async fn daily(&self, ts_code: &TsCode, start: NaiveDate, end: NaiveDate)
    -> Result<Vec<PricePoint>>;

    /// Adjustment factors for `[start, end]`
    async fn adj_factor(
        &self,
        ts_code: &TsCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AdjFactor>>;

    /// Index constituent weights published in `[start, end]`
    async fn index_weight(
        &self,
        index_code: &TsCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IndexWeight>>;

    /// Every stock known to the exchange, any status
    async fn stock_basic(&self) -> Result<Vec<Listing>>;
}
