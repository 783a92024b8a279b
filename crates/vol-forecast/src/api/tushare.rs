//! Tushare Pro API client
//!
//! Every endpoint is a JSON POST of `{api_name, token, params, fields}`; the
//! response carries a status code and a column-major `{fields, items}` frame.
//!
//! Rate Limit: depends on account tier, 200 requests per minute for `daily`

use async_trait::async_trait;
use chrono::NaiveDate;
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::num::NonZeroU32;
use std::sync::Arc;

use super::provider::{AdjFactor, IndexWeight, ListStatus, Listing, MarketDataProvider};
use crate::config::ForecastConfig;
use crate::error::{Result, StockError};
use crate::series::{PricePoint, TsCode, format_date, parse_date};

type SharedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

const PROVIDER: &str = "tushare";

/// Status code Tushare returns when the per-minute quota is exhausted
const RATE_LIMIT_CODE: i64 = 40203;

/// Request body
#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    api_name: &'a str,
    token: &'a str,
    params: Value,
    fields: &'a str,
}

/// Response envelope
#[derive(Debug, Deserialize)]
struct ApiResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    data: Option<Frame>,
}

/// Column-major result table
#[derive(Debug, Default, Deserialize)]
struct Frame {
    fields: Vec<String>,
    items: Vec<Vec<Value>>,
}

impl Frame {
    fn column(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| StockError::Provider(format!("response is missing column '{name}'")))
    }
}

fn cell_str(row: &[Value], idx: usize) -> Option<&str> {
    row.get(idx).and_then(Value::as_str)
}

fn cell_f64(row: &[Value], idx: usize) -> Option<f64> {
    row.get(idx).and_then(Value::as_f64)
}

fn cell_date(row: &[Value], idx: usize) -> Option<NaiveDate> {
    cell_str(row, idx).and_then(|s| parse_date(s).ok())
}

/// Tushare Pro API client
pub struct TushareClient {
    client: Client,
    api_url: String,
    token: String,
    rate_limiter: SharedRateLimiter,
}

impl TushareClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `api_url` - Endpoint, normally [`crate::config::DEFAULT_API_URL`]
    /// * `token` - Account token
    /// * `rate_limit` - Requests per minute (default 200)
    pub fn new(
        api_url: impl Into<String>,
        token: impl Into<String>,
        rate_limit: Option<u32>,
    ) -> Self {
        let per_minute = NonZeroU32::new(rate_limit.unwrap_or(200)).unwrap_or(NonZeroU32::MIN);
        Self {
            client: Client::new(),
            api_url: api_url.into(),
            token: token.into(),
            rate_limiter: Arc::new(RateLimiter::direct(Quota::per_minute(per_minute))),
        }
    }

    /// Create from configuration; the token is required
    pub fn from_config(config: &ForecastConfig) -> Result<Self> {
        let token = config.api_token.clone().ok_or_else(|| {
            StockError::Config("TUSHARE_TOKEN is not set".to_string())
        })?;
        let client = Client::builder().timeout(config.request_timeout).build()?;

        Ok(Self {
            client,
            ..Self::new(
                config.api_url.clone(),
                token,
                Some(config.requests_per_minute),
            )
        })
    }

    /// Call one endpoint and return its frame
    async fn query(&self, api_name: &str, params: Value, fields: &str) -> Result<Frame> {
        self.rate_limiter.until_ready().await;

        let body = ApiRequest {
            api_name,
            token: &self.token,
            params,
            fields,
        };

        tracing::debug!(api_name, "tushare request");
        let response = self.client.post(&self.api_url).json(&body).send().await?;

        if response.status() == StatusCode::TOO_MANY_REQUESTS {
            return Err(StockError::RateLimited {
                provider: PROVIDER.to_string(),
                attempts: 1,
            });
        }

        let response: ApiResponse = response.error_for_status()?.json().await?;
        match response.code {
            0 => Ok(response.data.unwrap_or_default()),
            RATE_LIMIT_CODE => Err(StockError::RateLimited {
                provider: PROVIDER.to_string(),
                attempts: 1,
            }),
            code => Err(StockError::Provider(format!(
                "{api_name} failed with code {code}: {}",
                response.msg.unwrap_or_default()
            ))),
        }
    }

    fn range_params(code: &TsCode, start: NaiveDate, end: NaiveDate) -> Value {
        json!({
            "ts_code": code.as_str(),
            "start_date": format_date(start),
            "end_date": format_date(end),
        })
    }
}

/// Sort ascending and drop repeated dates, keeping the first occurrence
fn sort_dedup_by_date<T, F>(rows: &mut Vec<T>, date: F)
where
    F: Fn(&T) -> NaiveDate,
{
    rows.sort_by_key(|r| date(r));
    rows.dedup_by_key(|r| date(r));
}

/// Daily row the provider returned with a missing or non-numeric cell
#[derive(Debug, Clone, PartialEq)]
struct SkippedRow {
    ts_code: String,
    trade_date: String,
}

/// Column positions of the daily frame
struct DailyColumns {
    date: usize,
    open: usize,
    high: usize,
    low: usize,
    close: usize,
    vol: usize,
    amount: usize,
}

impl DailyColumns {
    fn locate(frame: &Frame) -> Result<Self> {
        Ok(Self {
            date: frame.column("trade_date")?,
            open: frame.column("open")?,
            high: frame.column("high")?,
            low: frame.column("low")?,
            close: frame.column("close")?,
            vol: frame.column("vol")?,
            amount: frame.column("amount")?,
        })
    }

    fn point(&self, row: &[Value]) -> Option<PricePoint> {
        Some(PricePoint {
            date: cell_date(row, self.date)?,
            open: cell_f64(row, self.open)?,
            high: cell_f64(row, self.high)?,
            low: cell_f64(row, self.low)?,
            close: cell_f64(row, self.close)?,
            volume: cell_f64(row, self.vol)?,
            turnover: cell_f64(row, self.amount)?,
        })
    }
}

fn parse_daily(frame: &Frame) -> Result<(Vec<PricePoint>, Vec<SkippedRow>)> {
    let columns = DailyColumns::locate(frame)?;
    let code = frame.column("ts_code").ok();

    let mut points = Vec::with_capacity(frame.items.len());
    let mut skipped = Vec::new();
    for row in &frame.items {
        match columns.point(row) {
            Some(point) => points.push(point),
            None => {
                let skip = SkippedRow {
                    ts_code: code.and_then(|c| cell_str(row, c)).unwrap_or("?").to_string(),
                    trade_date: cell_str(row, columns.date).unwrap_or("?").to_string(),
                };
                tracing::warn!(
                    ts_code = %skip.ts_code,
                    trade_date = %skip.trade_date,
                    "dropping daily row with missing values"
                );
                skipped.push(skip);
            }
        }
    }

    sort_dedup_by_date(&mut points, |p| p.date);
    Ok((points, skipped))
}

fn parse_adj_factor(frame: &Frame) -> Result<Vec<AdjFactor>> {
    let date = frame.column("trade_date")?;
    let factor = frame.column("adj_factor")?;

    let mut factors: Vec<AdjFactor> = frame
        .items
        .iter()
        .filter_map(|row| {
            Some(AdjFactor {
                date: cell_date(row, date)?,
                factor: cell_f64(row, factor)?,
            })
        })
        .collect();

    sort_dedup_by_date(&mut factors, |f| f.date);
    Ok(factors)
}

fn parse_index_weight(frame: &Frame) -> Result<Vec<IndexWeight>> {
    let index_code = frame.column("index_code")?;
    let con_code = frame.column("con_code")?;
    let date = frame.column("trade_date")?;
    let weight = frame.column("weight")?;

    Ok(frame
        .items
        .iter()
        .filter_map(|row| {
            Some(IndexWeight {
                index_code: TsCode::parse(cell_str(row, index_code)?).ok()?,
                con_code: TsCode::parse(cell_str(row, con_code)?).ok()?,
                trade_date: cell_date(row, date)?,
                weight: cell_f64(row, weight)?,
            })
        })
        .collect())
}

fn parse_stock_basic(frame: &Frame) -> Result<Vec<Listing>> {
    let ts_code = frame.column("ts_code")?;
    let name = frame.column("name")?;
    let status = frame.column("list_status")?;
    let list_date = frame.column("list_date")?;
    let delist_date = frame.column("delist_date")?;

    Ok(frame
        .items
        .iter()
        .filter_map(|row| {
            Some(Listing {
                // Beijing exchange codes and other formats are out of scope
                ts_code: TsCode::parse(cell_str(row, ts_code)?).ok()?,
                name: cell_str(row, name).unwrap_or_default().to_string(),
                status: ListStatus::from_code(cell_str(row, status)?)?,
                list_date: cell_date(row, list_date),
                delist_date: cell_date(row, delist_date),
            })
        })
        .collect())
}

#[async_trait]
impl MarketDataProvider for TushareClient {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn daily(
        &self,
        ts_code: &TsCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        let frame = self
            .query(
                "daily",
                Self::range_params(ts_code, start, end),
                "ts_code,trade_date,open,high,low,close,vol,amount",
            )
            .await?;
        let (points, _) = parse_daily(&frame)?;
        Ok(points)
    }

    async fn adj_factor(
        &self,
        ts_code: &TsCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<AdjFactor>> {
        let frame = self
            .query(
                "adj_factor",
                Self::range_params(ts_code, start, end),
                "ts_code,trade_date,adj_factor",
            )
            .await?;
        parse_adj_factor(&frame)
    }

    async fn index_weight(
        &self,
        index_code: &TsCode,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<IndexWeight>> {
        let params = json!({
            "index_code": index_code.as_str(),
            "start_date": format_date(start),
            "end_date": format_date(end),
        });
        let frame = self
            .query("index_weight", params, "index_code,con_code,trade_date,weight")
            .await?;
        parse_index_weight(&frame)
    }

    async fn stock_basic(&self) -> Result<Vec<Listing>> {
        let mut listings = Vec::new();
        // The endpoint filters by status; an empty status returns listed only
        for status in ["L", "D", "P"] {
            let frame = self
                .query(
                    "stock_basic",
                    json!({ "list_status": status }),
                    "ts_code,name,list_status,list_date,delist_date",
                )
                .await?;
            listings.extend(parse_stock_basic(&frame)?);
        }
        Ok(listings)
    }
}
