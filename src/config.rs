use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use thiserror::Error;

use crate::errors::LoanError;

/// configuration errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),

    #[error("max_page_size must not be below default_page_size")]
    PageSizeOrder,
}

impl From<ConfigError> for LoanError {
    fn from(err: ConfigError) -> Self {
        LoanError::InvalidConfiguration {
            message: err.to_string(),
        }
    }
}

/// loan book configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoanBookConfig {
    /// loan numbers look like `{prefix}{counter}`
    pub loan_number_prefix: String,
    /// counter is zero padded to this many digits
    pub loan_number_width: usize,
    /// repayments can be edited or deleted this long after creation
    pub repayment_edit_window_hours: i64,
    pub default_page_size: usize,
    pub max_page_size: usize,
    /// decimal places of stored amounts
    pub currency_scale: u32,
}

impl Default for LoanBookConfig {
    fn default() -> Self {
        Self {
            loan_number_prefix: "LN".to_string(),
            loan_number_width: 8,
            repayment_edit_window_hours: 24,
            default_page_size: 20,
            max_page_size: 100,
            currency_scale: 2,
        }
    }
}

impl LoanBookConfig {
    /// load from environment variables, after reading `.env` if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// load from any key lookup; unset keys keep their defaults
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let config = Self {
            loan_number_prefix: lookup("LOAN_NUMBER_PREFIX")
                .unwrap_or(defaults.loan_number_prefix),
            loan_number_width: parse(&lookup, "LOAN_NUMBER_WIDTH", defaults.loan_number_width)?,
            repayment_edit_window_hours: parse(
                &lookup,
                "REPAYMENT_EDIT_WINDOW_HOURS",
                defaults.repayment_edit_window_hours,
            )?,
            default_page_size: parse(&lookup, "DEFAULT_PAGE_SIZE", defaults.default_page_size)?,
            max_page_size: parse(&lookup, "MAX_PAGE_SIZE", defaults.max_page_size)?,
            currency_scale: parse(&lookup, "CURRENCY_SCALE", defaults.currency_scale)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.loan_number_width == 0 {
            return Err(ConfigError::MustBePositive("loan_number_width"));
        }
        if self.repayment_edit_window_hours <= 0 {
            return Err(ConfigError::MustBePositive("repayment_edit_window_hours"));
        }
        if self.default_page_size == 0 {
            return Err(ConfigError::MustBePositive("default_page_size"));
        }
        if self.max_page_size < self.default_page_size {
            return Err(ConfigError::PageSizeOrder);
        }
        Ok(())
    }

    /// format the `n`th loan number
    pub fn loan_number(&self, n: u64) -> String {
        format!(
            "{}{:0width$}",
            self.loan_number_prefix,
            n,
            width = self.loan_number_width
        )
    }

    /// numeric part of a loan number issued under this prefix
    pub fn parse_loan_number(&self, loan_number: &str) -> Option<u64> {
        loan_number
            .strip_prefix(&self.loan_number_prefix)
            .and_then(|digits| digits.parse().ok())
    }
}

fn parse<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { key, value: raw }),
        None => Ok(default),
    }
}
