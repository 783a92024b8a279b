//! Shared utilities for the volatility forecasting workspace
//!
//! Logging setup and the process-level settings shared by the library and
//! the command-line tool.

pub mod config;
pub mod logging;

pub use config::{Settings, SettingsError};
pub use logging::{LogFormat, init_tracing};
