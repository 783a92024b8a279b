//! Deterministic in-memory market data for tests

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{HashMap, HashSet};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::api::{AdjFactor, IndexWeight, ListStatus, Listing, MarketDataProvider};
use crate::error::{Result, StockError};
use crate::series::{PricePoint, TsCode};

/// Weekdays starting at `start`
pub(crate) fn trading_days(start: NaiveDate, count: usize) -> Vec<NaiveDate> {
    start
        .iter_days()
        .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
        .take(count)
        .collect()
}

/// Random walk whose daily volatility moves through slow regimes
pub(crate) fn synthetic_points(seed: u64, days: &[NaiveDate]) -> Vec<PricePoint> {
    let mut rng = StdRng::seed_from_u64(seed);
    let phase = rng.gen_range(0.0..2.0 * PI);
    let mut close = rng.gen_range(10.0..200.0);

    days.iter()
        .enumerate()
        .map(|(t, &date)| {
            let sigma = 0.008 + 0.02 * (2.0 * PI * t as f64 / 120.0 + phase).sin().abs();
            let shock = rng.gen_range(-1.0..1.0) * sigma * 3f64.sqrt();
            let open = close;
            close *= shock.exp();
            let spread = close * sigma * rng.gen_range(0.2..1.0);
            let volume = 1.0e6 * (1.0 + 20.0 * sigma) * rng.gen_range(0.5..1.5);
            PricePoint {
                date,
                open,
                high: open.max(close) + spread,
                low: (open.min(close) - spread).max(0.01),
                close,
                volume,
                turnover: volume * close,
            }
        })
        .collect()
}

/// In-memory provider with call counters
#[derive(Default)]
pub(crate) struct SyntheticProvider {
    series: HashMap<TsCode, Vec<PricePoint>>,
    listings: HashMap<TsCode, Listing>,
    weights: Vec<IndexWeight>,
    failing: HashSet<TsCode>,
    daily_calls: AtomicUsize,
    adj_calls: AtomicUsize,
}

impl SyntheticProvider {
    pub(crate) const START: NaiveDate = match NaiveDate::from_ymd_opt(2020, 1, 1) {
        Some(date) => date,
        None => NaiveDate::MIN,
    };
    pub(crate) const ADJ_FACTOR: f64 = 1.5;

    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Add `rows` trading days of data from [`Self::START`], listed three years earlier
    pub(crate) fn with_ticker(mut self, code: &str, seed: u64, rows: usize) -> Self {
        let ts_code = code_of(code);
        let points = synthetic_points(seed, &trading_days(Self::START, rows));
        let listed = Self::START.checked_sub_days(Days::new(3 * 365));
        self.listings.insert(
            ts_code.clone(),
            Listing {
                ts_code: ts_code.clone(),
                name: format!("Synthetic {code}"),
                status: ListStatus::Listed,
                list_date: listed,
                delist_date: None,
            },
        );
        self.series.insert(ts_code, points);
        self
    }

    pub(crate) fn with_points(mut self, code: &str, points: Vec<PricePoint>) -> Self {
        self.series.insert(code_of(code), points);
        self
    }

    pub(crate) fn with_listing(mut self, listing: Listing) -> Self {
        self.listings.insert(listing.ts_code.clone(), listing);
        self
    }

    pub(crate) fn with_weight(
        mut self,
        index: &str,
        member: &str,
        trade_date: NaiveDate,
        weight: f64,
    ) -> Self {
        self.weights.push(IndexWeight {
            index_code: code_of(index),
            con_code: code_of(member),
            trade_date,
            weight,
        });
        self
    }

    /// Make every daily request for `code` fail with a provider error
    pub(crate) fn with_failure(mut self, code: &str) -> Self {
        self.failing.insert(code_of(code));
        self
    }

    pub(crate) fn daily_calls(&self) -> usize {
        self.daily_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn adj_calls(&self) -> usize {
        self.adj_calls.load(Ordering::SeqCst)
    }

    fn rows(&self, ts_code: &TsCode, start: NaiveDate, end: NaiveDate) -> Result<Vec<PricePoint>> {
        if self.failing.contains(ts_code) {
            return Err(StockError::Provider(format!("{ts_code}: upstream failure")));
        }
        Ok(self
            .series
            .get(ts_code)
            .map(|points| {
                points
                    .iter()
                    .filter(|p| p.date >= start && p.date <= end)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

fn code_of(code: &str) -> TsCode {
    TsCode::parse(code).unwrap_or_else(|e| panic!("test ticker {code}: {e}"))
}

#[async_trait]
impl MarketDataProvider for SyntheticProvider {
    fn name(&self) -> &'static str {
        "synthetic"
    }

    async fn daily(
        &self,
        ts_code: &TsCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        self.daily_calls.fetch_add(1, Ordering::SeqCst);
        self.rows(ts_code, start, end)
    }

    async fn adj_factor(
        &self,
        ts_code: &TsCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AdjFactor>> {
        self.adj_calls.fetch_add(1, Ordering::SeqCst);
        let points = self.rows(ts_code, start, end)?;
        Ok(points
            .iter()
            .map(|p| AdjFactor {
                date: p.date,
                factor: Self::ADJ_FACTOR,
            })
            .collect())
    }

    async fn index_weight(
        &self,
        index_code: &TsCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IndexWeight>> {
        Ok(self
            .weights
            .iter()
            .filter(|w| &w.index_code == index_code)
            .filter(|w| w.trade_date >= start && w.trade_date <= end)
            .cloned()
            .collect())
    }

    async fn stock_basic(&self) -> Result<Vec<Listing>> {
        let mut listings: Vec<Listing> = self.listings.values().cloned().collect();
        listings.sort_by(|a, b| a.ts_code.cmp(&b.ts_code));
        Ok(listings)
    }
}
