use std::str::FromStr;

use rust_decimal::Decimal;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable {key} has invalid value `{value}`")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0}")]
    Inconsistent(&'static str),
}

/// Tunables injected into [`crate::engine::Engine`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub default_daily_transfer_limit: Decimal,
    pub default_daily_withdrawal_limit: Decimal,
    pub account_number_prefix: String,
    pub default_page_size: u32,
    pub max_page_size: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_daily_transfer_limit: Decimal::from(100_000),
            default_daily_withdrawal_limit: Decimal::from(50_000),
            account_number_prefix: "40817810".to_string(),
            default_page_size: 20,
            max_page_size: 100,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `LEDGER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(v) = parse_var(&lookup, "LEDGER_DAILY_TRANSFER_LIMIT")? {
            config.default_daily_transfer_limit = v;
        }
        if let Some(v) = parse_var(&lookup, "LEDGER_DAILY_WITHDRAWAL_LIMIT")? {
            config.default_daily_withdrawal_limit = v;
        }
        if let Some(v) = lookup("LEDGER_ACCOUNT_NUMBER_PREFIX") {
            if v.is_empty() || !v.chars().all(|c| c.is_ascii_digit()) {
                return Err(ConfigError::InvalidValue {
                    key: "LEDGER_ACCOUNT_NUMBER_PREFIX",
                    value: v,
                });
            }
            config.account_number_prefix = v;
        }
        if let Some(v) = parse_var(&lookup, "LEDGER_DEFAULT_PAGE_SIZE")? {
            config.default_page_size = v;
        }
        if let Some(v) = parse_var(&lookup, "LEDGER_MAX_PAGE_SIZE")? {
            config.max_page_size = v;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_daily_transfer_limit < Decimal::ZERO
            || self.default_daily_withdrawal_limit < Decimal::ZERO
        {
            return Err(ConfigError::Inconsistent("daily limits must not be negative"));
        }
        if self.max_page_size == 0 || self.default_page_size > self.max_page_size {
            return Err(ConfigError::Inconsistent(
                "default page size must be positive and not exceed the maximum",
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { key, value }),
    }
}
