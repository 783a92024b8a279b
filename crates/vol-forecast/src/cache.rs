//! Caching layer for price series to reduce provider calls
//!
//! Entries are keyed by ticker and field set. Each entry remembers which
//! calendar ranges have already been fetched, so an overlapping request only
//! needs the uncovered sub-ranges from the provider.

use cached::{Cached, TimedCache};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::series::{FieldSet, PricePoint, TsCode};

/// Cache key for a price series
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SeriesKey {
    pub ts_code: TsCode,
    pub fields: FieldSet,
}

impl SeriesKey {
    pub fn new(ts_code: TsCode, fields: FieldSet) -> Self {
        Self { ts_code, fields }
    }
}

/// Inclusive calendar date range
pub type DateRange = (NaiveDate, NaiveDate);

/// Rows and fetched ranges for one key
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CachedSeries {
    /// Sorted, disjoint, non-adjacent ranges already fetched
    covered: Vec<DateRange>,
    points: BTreeMap<NaiveDate, PricePoint>,
}

impl CachedSeries {
    /// Sub-ranges of `[start, end]` that have not been fetched yet
    pub fn missing(&self, start: NaiveDate, end: NaiveDate) -> Vec<DateRange> {
        let mut gaps = Vec::new();
        let mut cursor = start;

        for &(from, to) in &self.covered {
            if to < cursor {
                continue;
            }
            if from > end {
                break;
            }
            if from > cursor {
                if let Some(before) = from.pred_opt() {
                    gaps.push((cursor, before));
                }
            }
            match to.succ_opt() {
                Some(next) => cursor = next,
                None => return gaps,
            }
            if cursor > end {
                return gaps;
            }
        }

        gaps.push((cursor, end));
        gaps
    }

    /// Whether `[start, end]` is fully fetched
    pub fn covers(&self, start: NaiveDate, end: NaiveDate) -> bool {
        self.missing(start, end).is_empty()
    }

    /// Upsert rows fetched for `[start, end]` and mark the range covered
    ///
    /// Rows outside the range are ignored so coverage stays truthful.
    pub fn merge(&mut self, start: NaiveDate, end: NaiveDate, points: Vec<PricePoint>) {
        for point in points {
            if point.date >= start && point.date <= end {
                self.points.insert(point.date, point);
            }
        }

        self.covered.push((start, end));
        self.covered.sort_unstable();

        let mut merged: Vec<DateRange> = Vec::with_capacity(self.covered.len());
        for (from, to) in self.covered.drain(..) {
            match merged.last_mut() {
                Some(last) if last.1.succ_opt().is_none_or(|next| from <= next) => {
                    last.1 = last.1.max(to);
                }
                _ => merged.push((from, to)),
            }
        }
        self.covered = merged;
    }

    /// Cached rows in `[start, end]`, date ascending
    pub fn slice(&self, start: NaiveDate, end: NaiveDate) -> Vec<PricePoint> {
        self.points.range(start..=end).map(|(_, p)| *p).collect()
    }

    pub fn covered(&self) -> &[DateRange] {
        &self.covered
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// Thread-safe cache for price series
pub struct SeriesCache {
    cache: Arc<RwLock<TimedCache<SeriesKey, CachedSeries>>>,
}

impl SeriesCache {
    /// Create a new cache with specified TTL
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Arc::new(RwLock::new(TimedCache::with_lifespan(ttl))),
        }
    }

    /// Get a snapshot of an entry
    pub async fn get(&self, key: &SeriesKey) -> Option<CachedSeries> {
        let mut cache = self.cache.write().await;
        cache.cache_get(key).cloned()
    }

    /// Merge freshly fetched rows into an entry
    ///
    /// Concurrent writers for the same key are serialised by the lock; the
    /// later write wins for any date both touched.
    pub async fn upsert(
        &self,
        key: SeriesKey,
        start: NaiveDate,
        end: NaiveDate,
        points: Vec<PricePoint>,
    ) -> CachedSeries {
        self.upsert_ranges(key, vec![((start, end), points)]).await
    }

    /// Merge several fetched ranges into an entry under a single write lock
    pub async fn upsert_ranges(
        &self,
        key: SeriesKey,
        batches: Vec<(DateRange, Vec<PricePoint>)>,
    ) -> CachedSeries {
        let mut cache = self.cache.write().await;
        let mut entry = cache.cache_get(&key).cloned().unwrap_or_default();
        for ((start, end), points) in batches {
            entry.merge(start, end, points);
        }
        let _ = cache.cache_set(key, entry.clone());
        entry
    }

    /// Invalidate a specific cache entry
    pub async fn invalidate(&self, key: &SeriesKey) {
        let mut cache = self.cache.write().await;
        let _ = cache.cache_remove(key);
    }

    /// Clear all cached entries
    pub async fn clear(&self) {
        let mut cache = self.cache.write().await;
        cache.cache_clear();
    }

    /// Get the number of cached entries
    pub async fn len(&self) -> usize {
        let cache = self.cache.read().await;
        cache.cache_size()
    }

    /// Check if the cache is empty
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Clone for SeriesCache {
    fn clone(&self) -> Self {
        Self {
            cache: Arc::clone(&self.cache),
        }
    }
}
