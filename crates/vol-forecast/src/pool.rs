//! Training universe selection
//!
//! Candidates are the constituents of a benchmark index; each is then
//! checked for listing status, listing age, liquidity and recent trading.

use chrono::{Local, NaiveDate, TimeDelta};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::api::{ListStatus, Listing};
use crate::error::{ErrorReport, Result, StockError};
use crate::market_data::MarketDataClient;
use crate::series::{FieldSet, TsCode};

/// SSE 50
pub const DEFAULT_INDEX: &str = "000016.SH";

/// Calendar days of history fetched for the liquidity and staleness checks
const ACTIVITY_WINDOW_DAYS: i64 = 60;

/// Pool selection filters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolFilters {
    /// Index whose constituents are the candidates
    pub index_code: String,
    /// Pool date; today when unset
    pub as_of: Option<NaiveDate>,
    /// Minimum calendar days since listing
    pub min_listing_days: i64,
    /// Minimum mean daily turnover, in provider units (thousand CNY)
    pub min_avg_turnover: f64,
    /// Trading days averaged for the turnover check
    pub liquidity_lookback_days: usize,
    /// Maximum calendar days between the last trade and `as_of`
    pub max_stale_days: i64,
    /// Keep at most this many members, by index weight
    pub max_size: Option<usize>,
}

impl Default for PoolFilters {
    fn default() -> Self {
        Self {
            index_code: DEFAULT_INDEX.to_string(),
            as_of: None,
            min_listing_days: 365,
            min_avg_turnover: 50_000.0,
            liquidity_lookback_days: 20,
            max_stale_days: 10,
            max_size: None,
        }
    }
}

impl PoolFilters {
    pub fn validate(&self) -> Result<()> {
        TsCode::parse(&self.index_code)?;
        if self.liquidity_lookback_days == 0 {
            return Err(StockError::Config(
                "liquidity_lookback_days must be > 0".to_string(),
            ));
        }
        if self.min_listing_days < 0 || self.max_stale_days < 0 {
            return Err(StockError::Config(
                "pool day thresholds must not be negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// Why a candidate was left out of the pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum ExclusionReason {
    /// No listing record for the candidate
    UnknownListing,
    /// Listing record without a listing date, so its age cannot be checked
    UnknownListDate,
    NotListed { status: ListStatus },
    TooNew { list_date: NaiveDate, listed_days: i64 },
    Illiquid { avg_turnover: f64 },
    /// Suspended or no trades recently
    Stale { last_trade: Option<NaiveDate> },
    FetchFailed { error: ErrorReport },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Exclusion {
    pub ts_code: TsCode,
    #[serde(flatten)]
    pub reason: ExclusionReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolMember {
    pub ts_code: TsCode,
    pub weight: f64,
}

/// Selected tickers with the reasons for every exclusion
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockPool {
    pub index_code: TsCode,
    pub as_of: NaiveDate,
    /// Ordered by index weight, descending
    pub members: Vec<PoolMember>,
    pub exclusions: Vec<Exclusion>,
}

impl StockPool {
    pub fn tickers(&self) -> Vec<TsCode> {
        self.members.iter().map(|m| m.ts_code.clone()).collect()
    }

    pub fn contains(&self, ts_code: &TsCode) -> bool {
        self.members.iter().any(|m| &m.ts_code == ts_code)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(serde_json::from_str(&std::fs::read_to_string(path)?)?)
    }
}

/// Listing checks evaluated on `as_of` rather than today
///
/// A delisted stock still counts as listed before its delisting date.
/// Paused stocks are left to the trading activity checks.
fn listing_exclusion(
    listing: Option<&Listing>,
    as_of: NaiveDate,
    min_listing_days: i64,
) -> Option<ExclusionReason> {
    let Some(listing) = listing else {
        return Some(ExclusionReason::UnknownListing);
    };

    // Without a delisting date a delisted stock cannot be placed in time
    let delisted = match listing.delist_date {
        Some(date) => date <= as_of,
        None => listing.status == ListStatus::Delisted,
    };
    if delisted {
        return Some(ExclusionReason::NotListed {
            status: ListStatus::Delisted,
        });
    }

    let Some(list_date) = listing.list_date else {
        return Some(ExclusionReason::UnknownListDate);
    };
    // Negative when the listing comes after `as_of`
    let listed_days = (as_of - list_date).num_days();
    if listed_days < min_listing_days {
        return Some(ExclusionReason::TooNew {
            list_date,
            listed_days,
        });
    }
    None
}

/// Builds stock pools from index constituents
pub struct StockPoolBuilder {
    client: Arc<MarketDataClient>,
}

impl StockPoolBuilder {
    pub fn new(client: Arc<MarketDataClient>) -> Self {
        Self { client }
    }

    /// Select the pool for `filters`
    ///
    /// Failing to read the index or the listings is fatal; a candidate whose
    /// price history cannot be fetched is only excluded.
    pub async fn build_pool(&self, filters: &PoolFilters) -> Result<StockPool> {
        filters.validate()?;
        let index_code = TsCode::parse(&filters.index_code)?;
        let as_of = filters.as_of.unwrap_or_else(|| Local::now().date_naive());

        let candidates = self.client.index_constituents(&index_code, as_of).await?;
        let listings: HashMap<TsCode, Listing> = self
            .client
            .listings()
            .await?
            .into_iter()
            .map(|l| (l.ts_code.clone(), l))
            .collect();

        tracing::info!(%index_code, %as_of, candidates = candidates.len(), "building stock pool");

        let mut pool = StockPool {
            index_code,
            as_of,
            members: Vec::new(),
            exclusions: Vec::new(),
        };

        for candidate in candidates {
            let ts_code = candidate.con_code;
            match self
                .screen(&ts_code, listings.get(&ts_code), as_of, filters)
                .await
            {
                None => pool.members.push(PoolMember {
                    ts_code,
                    weight: candidate.weight,
                }),
                Some(reason) => {
                    tracing::debug!(%ts_code, ?reason, "excluded from pool");
                    pool.exclusions.push(Exclusion { ts_code, reason });
                }
            }
        }

        if let Some(max) = filters.max_size {
            pool.members.truncate(max);
        }

        tracing::info!(
            members = pool.members.len(),
            excluded = pool.exclusions.len(),
            "stock pool built"
        );
        Ok(pool)
    }

    async fn screen(
        &self,
        ts_code: &TsCode,
        listing: Option<&Listing>,
        as_of: NaiveDate,
        filters: &PoolFilters,
    ) -> Option<ExclusionReason> {
        if let Some(reason) = listing_exclusion(listing, as_of, filters.min_listing_days) {
            return Some(reason);
        }

        let window = ACTIVITY_WINDOW_DAYS
            .max(filters.max_stale_days)
            .max(2 * filters.liquidity_lookback_days as i64);
        let start = as_of
            .checked_sub_signed(TimeDelta::days(window))
            .unwrap_or(NaiveDate::MIN);

        let series = match self
            .client
            .fetch(ts_code, start, as_of, FieldSet::Daily)
            .await
        {
            Ok(series) => series,
            Err(StockError::DataUnavailable { .. }) => {
                return Some(ExclusionReason::Stale { last_trade: None });
            }
            Err(err) => {
                return Some(ExclusionReason::FetchFailed {
                    error: err.report(Some(ts_code.as_str())),
                });
            }
        };

        let Some(last_trade) = series.last_date() else {
            return Some(ExclusionReason::Stale { last_trade: None });
        };
        if (as_of - last_trade).num_days() > filters.max_stale_days {
            return Some(ExclusionReason::Stale {
                last_trade: Some(last_trade),
            });
        }

        let recent = &series.points()[series.len().saturating_sub(filters.liquidity_lookback_days)..];
        let avg_turnover = recent.iter().map(|p| p.turnover).sum::<f64>() / recent.len() as f64;
        if avg_turnover < filters.min_avg_turnover {
            return Some(ExclusionReason::Illiquid { avg_turnover });
        }
        None
    }
}
