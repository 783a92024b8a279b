//! Cached, retrying access to daily market data

use chrono::{Days, NaiveDate};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::future::Future;
use std::sync::Arc;

use crate::api::{AdjFactor, IndexWeight, Listing, MarketDataProvider, TushareClient};
use crate::cache::{SeriesCache, SeriesKey};
use crate::config::ForecastConfig;
use crate::error::{Result, StockError};
use crate::series::{FieldSet, PricePoint, TickerSeries, TsCode};

/// How far back to look for the latest index weight publication
const INDEX_WEIGHT_LOOKBACK_DAYS: u64 = 90;

/// Attempts at filling a request before giving up on a churning cache entry
const FILL_ROUNDS: usize = 3;

/// Market data client: provider calls behind a range-aware cache
pub struct MarketDataClient {
    provider: Arc<dyn MarketDataProvider>,
    cache: SeriesCache,
    config: Arc<ForecastConfig>,
}

impl MarketDataClient {
    /// Create a client with a fresh cache
    pub fn new(provider: Arc<dyn MarketDataProvider>, config: Arc<ForecastConfig>) -> Self {
        let cache = SeriesCache::new(config.cache_ttl);
        Self::with_cache(provider, config, cache)
    }

    /// Create a client sharing an existing cache
    pub fn with_cache(
        provider: Arc<dyn MarketDataProvider>,
        config: Arc<ForecastConfig>,
        cache: SeriesCache,
    ) -> Self {
        Self {
            provider,
            cache,
            config,
        }
    }

    /// Create a client backed by Tushare Pro
    pub fn from_config(config: Arc<ForecastConfig>) -> Result<Self> {
        let provider = Arc::new(TushareClient::from_config(&config)?);
        Ok(Self::new(provider, config))
    }

    pub fn config(&self) -> &ForecastConfig {
        &self.config
    }

    pub fn cache(&self) -> &SeriesCache {
        &self.cache
    }

    /// Fetch the daily series for `[start, end]`
    ///
    /// Only sub-ranges missing from the cache are requested from the
    /// provider. Either every row of the request is returned or an error is.
    pub async fn fetch(
        &self,
        ts_code: &TsCode,
        start: NaiveDate,
        end: NaiveDate,
        fields: FieldSet,
    ) -> Result<TickerSeries> {
        if start > end {
            return Err(StockError::InvalidRequest(format!(
                "{ts_code}: start date {start} is after end date {end}"
            )));
        }

        let key = SeriesKey::new(ts_code.clone(), fields);
        let mut entry = self.cache.get(&key).await.unwrap_or_default();

        // The entry can expire or be invalidated while gaps are in flight,
        // so coverage is checked again after every write.
        for round in 0..FILL_ROUNDS {
            let gaps = entry.missing(start, end);
            if gaps.is_empty() {
                if round == 0 {
                    tracing::debug!(%ts_code, %start, %end, "cache hit");
                }
                break;
            }
            tracing::debug!(%ts_code, %start, %end, gaps = gaps.len(), round, "cache miss");

            let mut batches = Vec::with_capacity(gaps.len());
            for (from, to) in gaps {
                let rows = self.fetch_range(ts_code, from, to, fields).await?;
                batches.push(((from, to), rows));
            }
            entry = self.cache.upsert_ranges(key.clone(), batches).await;
        }

        if !entry.covers(start, end) {
            return Err(StockError::Other(format!(
                "{ts_code}: cache entry kept expiring while filling {start}..{end}"
            )));
        }

        let points = entry.slice(start, end);
        if points.is_empty() {
            return Err(StockError::DataUnavailable {
                ts_code: ts_code.to_string(),
                start,
                end,
            });
        }

        TickerSeries::new(ts_code.clone(), fields, points)
    }

    /// Constituent weights of `index_code` at the latest publication on or before `as_of`
    ///
    /// Sorted by weight descending, then code.
    pub async fn index_constituents(
        &self,
        index_code: &TsCode,
        as_of: NaiveDate,
    ) -> Result<Vec<IndexWeight>> {
        let start = as_of
            .checked_sub_days(Days::new(INDEX_WEIGHT_LOOKBACK_DAYS))
            .unwrap_or(NaiveDate::MIN);

        let weights = self
            .with_retry(|| self.provider.index_weight(index_code, start, as_of))
            .await?;

        let Some(latest) = weights.iter().map(|w| w.trade_date).max() else {
            return Err(StockError::DataUnavailable {
                ts_code: index_code.to_string(),
                start,
                end: as_of,
            });
        };

        // One row per constituent; a repeated code keeps its highest weight
        let mut by_code: HashMap<TsCode, IndexWeight> = HashMap::new();
        for weight in weights.into_iter().filter(|w| w.trade_date == latest) {
            match by_code.entry(weight.con_code.clone()) {
                Entry::Occupied(mut held) if weight.weight > held.get().weight => {
                    held.insert(weight);
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(weight);
                }
            }
        }

        let mut members: Vec<IndexWeight> = by_code.into_values().collect();
        members.sort_by(|a, b| {
            b.weight
                .total_cmp(&a.weight)
                .then_with(|| a.con_code.cmp(&b.con_code))
        });
        Ok(members)
    }

    /// Listing information for every known stock
    pub async fn listings(&self) -> Result<Vec<Listing>> {
        self.with_retry(|| self.provider.stock_basic()).await
    }

    async fn fetch_range(
        &self,
        ts_code: &TsCode,
        start: NaiveDate,
        end: NaiveDate,
        fields: FieldSet,
    ) -> Result<Vec<PricePoint>> {
        let daily = self
            .with_retry(|| self.provider.daily(ts_code, start, end))
            .await?;

        match fields {
            FieldSet::Daily => Ok(daily),
            FieldSet::Adjusted => {
                let factors = self
                    .with_retry(|| self.provider.adj_factor(ts_code, start, end))
                    .await?;
                Ok(apply_adjustment(&daily, &factors))
            }
        }
    }

    /// Run a provider call, retrying throttled attempts with exponential backoff
    async fn with_retry<T, F, Fut>(&self, mut operation: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let max_attempts = self.config.max_retries.max(1);

        for attempt in 0..max_attempts {
            match operation().await {
                Err(err) if err.is_retryable() => {
                    if attempt + 1 < max_attempts {
                        let backoff = self.config.retry_backoff(attempt);
                        tracing::warn!(
                            provider = self.provider.name(),
                            attempt = attempt + 1,
                            ?backoff,
                            "provider throttled, backing off"
                        );
                        tokio::time::sleep(backoff).await;
                    }
                }
                other => return other,
            }
        }

        Err(StockError::RateLimited {
            provider: self.provider.name().to_string(),
            attempts: max_attempts,
        })
    }
}

/// Multiply prices by the cumulative adjustment factor
///
/// Days without a published factor reuse the previous one; rows before the
/// first factor are dropped rather than left unadjusted.
pub fn apply_adjustment(points: &[PricePoint], factors: &[AdjFactor]) -> Vec<PricePoint> {
    let mut adjusted = Vec::with_capacity(points.len());
    let mut factors = factors.iter().peekable();
    let mut current: Option<f64> = None;

    for point in points {
        while let Some(f) = factors.next_if(|f| f.date <= point.date) {
            current = Some(f.factor);
        }
        if let Some(factor) = current {
            adjusted.push(point.scaled(factor));
        }
    }
    adjusted
}
