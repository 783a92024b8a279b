//! Market data provider adapters

pub mod provider;
pub mod tushare;

pub use provider::{AdjFactor, IndexWeight, ListStatus, Listing, MarketDataProvider};
pub use tushare::TushareClient;

#[cfg(test)]
pub use provider::MockMarketDataProvider;
