//! Price series domain types

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use crate::error::{Result, StockError};

static TS_CODE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\d{6}\.(SH|SZ)$").unwrap_or_else(|e| panic!("ts_code pattern: {e}"))
});

/// Date format used by the provider (`YYYYMMDD`)
pub const DATE_FORMAT: &str = "%Y%m%d";

/// Parse a provider date
pub fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT)
        .map_err(|e| StockError::InvalidRequest(format!("bad date '{value}': {e}")))
}

/// Format a date for the provider
pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Exchange-qualified ticker, e.g. `600519.SH`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TsCode(String);

impl TsCode {
    /// Validate and normalise a ticker code
    pub fn parse(code: &str) -> Result<Self> {
        let normalized = code.trim().to_ascii_uppercase();
        if TS_CODE_RE.is_match(&normalized) {
            Ok(Self(normalized))
        } else {
            Err(StockError::InvalidSymbol(code.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for TsCode {
    type Err = StockError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for TsCode {
    type Error = StockError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<TsCode> for String {
    fn from(code: TsCode) -> Self {
        code.0
    }
}

impl fmt::Display for TsCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Price basis of a fetched series
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldSet {
    /// Raw exchange prices
    #[default]
    Daily,
    /// Prices multiplied by the cumulative adjustment factor
    ///
    /// The factor only grows with corporate actions, so adjusted rows from
    /// different fetches stay comparable and merge cleanly in the cache.
    Adjusted,
}

/// One ticker-day of market data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    /// Traded amount
    pub turnover: f64,
}

impl PricePoint {
    /// Scale the price fields, leaving volume and turnover untouched
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            open: self.open * factor,
            high: self.high * factor,
            low: self.low * factor,
            close: self.close * factor,
            ..*self
        }
    }
}

/// Date-ordered price history for one ticker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TickerSeries {
    ts_code: TsCode,
    fields: FieldSet,
    points: Vec<PricePoint>,
}

impl TickerSeries {
    /// Build a series, rejecting unordered or duplicate dates
    pub fn new(ts_code: TsCode, fields: FieldSet, points: Vec<PricePoint>) -> Result<Self> {
        if let Some(pair) = points.windows(2).find(|w| w[0].date >= w[1].date) {
            return Err(StockError::InvalidRequest(format!(
                "{ts_code}: price points out of order at {} / {}",
                pair[0].date, pair[1].date
            )));
        }
        Ok(Self {
            ts_code,
            fields,
            points,
        })
    }

    pub fn ts_code(&self) -> &TsCode {
        &self.ts_code
    }

    pub fn fields(&self) -> FieldSet {
        self.fields
    }

    pub fn points(&self) -> &[PricePoint] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.points.first().map(|p| p.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.points.last().map(|p| p.date)
    }

    /// Closing prices in date order
    pub fn closes(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.close).collect()
    }
}
