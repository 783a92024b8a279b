//! Process-level settings

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogFormat;

/// Errors raised while reading settings
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A setting had a value that could not be parsed
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Settings shared by every binary in the workspace
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Application name, used as the tracing target prefix
    pub app_name: String,
    /// Environment (development, production, ...)
    pub environment: String,
    /// Log output format
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app_name: "volforecast".to_string(),
            environment: "development".to_string(),
            log_format: LogFormat::Pretty,
        }
    }
}

impl Settings {
    /// Overlay `VOL_ENV` and `VOL_LOG_FORMAT` from the environment
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Overlay values from an arbitrary lookup, e.g. a parsed `.env` map
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        if let Some(env) = lookup("VOL_ENV") {
            settings.environment = env;
        }
        if let Some(format) = lookup("VOL_LOG_FORMAT") {
            settings.log_format = format.parse()?;
        }
        Ok(settings)
    }

    /// Whether this is a production deployment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_lookup(|_| None).unwrap();
        assert_eq!(settings, Settings::default());
        assert!(!settings.is_production());
    }

    #[test]
    fn test_lookup_overrides() {
        let vars: HashMap<&str, &str> =
            HashMap::from([("VOL_ENV", "production"), ("VOL_LOG_FORMAT", "json")]);
        let settings = Settings::from_lookup(|k| vars.get(k).map(ToString::to_string)).unwrap();
        assert!(settings.is_production());
        assert_eq!(settings.log_format, LogFormat::Json);
    }

    #[test]
    fn test_bad_format_rejected() {
        let err = Settings::from_lookup(|k| (k == "VOL_LOG_FORMAT").then(|| "yaml".to_string()))
            .unwrap_err();
        assert!(err.to_string().contains("log_format"));
    }
}
