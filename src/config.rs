// 7.0 config.rs: every protocol constant in one place. window, leverage cap, fees.
// 7.1 presets for mainnet and the short-window test network, plus env overrides.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// How a feed reference picks among the readings of a price sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeedSelection {
    /// Always the smoothed reading. This is what deployed networks run.
    Smoothed,
    /// Inside the cost basis window, longs take the larger and shorts the
    /// smaller of the extremum and smoothed readings.
    WindowExtremum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtocolParams {
    // Blocks after opening during which the cost basis is still moving
    pub window: u32,
    // Largest allowed |leverage|
    pub max_leverage: i16,
    // Longest compiled expression, in opcodes
    pub max_expression_len: usize,
    // Escrow kept as position size: amount * num / den (199/200)
    pub position_fee_num: i64,
    pub position_fee_den: i64,
    // Rekt fee is total bets / this (500 = 0.2%)
    pub rekt_fee_divisor: i64,
    // Flat network fee, used as the dust threshold for change outputs
    pub tx_fee: i64,
    pub feed_selection: FeedSelection,
}

impl Default for ProtocolParams {
    fn default() -> Self {
        Self {
            window: 1440,
            max_leverage: 777,
            max_expression_len: 4096,
            position_fee_num: 199,
            position_fee_den: 200,
            rekt_fee_divisor: 500,
            tx_fee: 10_000,
            feed_selection: FeedSelection::Smoothed,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
    #[error("Inconsistent parameters: {0}")]
    Inconsistent(String),
}

impl ProtocolParams {
    // Short window so a test chain reaches frozen cost basis in a few blocks
    pub fn testnet() -> Self {
        Self {
            window: 7,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window == 0 {
            return Err(ConfigError::Inconsistent("window must be at least 1 block".into()));
        }
        if self.max_leverage <= 0 {
            return Err(ConfigError::Inconsistent("max_leverage must be positive".into()));
        }
        if self.position_fee_den <= 0 || self.position_fee_num <= 0 || self.position_fee_num > self.position_fee_den {
            return Err(ConfigError::Inconsistent(format!(
                "position fee ratio {}/{} out of range",
                self.position_fee_num, self.position_fee_den
            )));
        }
        if self.rekt_fee_divisor <= 0 {
            return Err(ConfigError::Inconsistent("rekt_fee_divisor must be positive".into()));
        }
        if self.max_expression_len == 0 {
            return Err(ConfigError::Inconsistent("max_expression_len must be positive".into()));
        }
        Ok(())
    }

    /// Part of the escrowed amount that becomes position size.
    pub fn position_size(&self, escrowed: i64) -> i64 {
        ((escrowed as i128 * self.position_fee_num as i128) / self.position_fee_den as i128) as i64
    }

    pub fn rekt_fee(&self, total_bets: i64) -> i64 {
        total_bets / self.rekt_fee_divisor
    }

    /// Defaults overridden by `PRICES_WINDOW`, `PRICES_MAX_LEVERAGE` and
    /// `PRICES_FEED_SELECTION` (`smoothed` | `extremum`).
    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut params = Self::default();

        if let Some(window) = env_map.get("PRICES_WINDOW") {
            params.window = window.parse::<u32>().map_err(|_| {
                ConfigError::InvalidValue("PRICES_WINDOW".to_string(), "must be a valid u32".to_string())
            })?;
        }

        if let Some(max_leverage) = env_map.get("PRICES_MAX_LEVERAGE") {
            params.max_leverage = max_leverage.parse::<i16>().map_err(|_| {
                ConfigError::InvalidValue("PRICES_MAX_LEVERAGE".to_string(), "must be a valid i16".to_string())
            })?;
        }

        params.feed_selection = match env_map
            .get("PRICES_FEED_SELECTION")
            .map(|s| s.as_str())
            .unwrap_or("smoothed")
        {
            "smoothed" => FeedSelection::Smoothed,
            "extremum" => FeedSelection::WindowExtremum,
            other => {
                return Err(ConfigError::InvalidValue(
                    "PRICES_FEED_SELECTION".to_string(),
                    format!("must be smoothed or extremum, got {}", other),
                ))
            }
        };

        params.validate()?;
        Ok(params)
    }
}
