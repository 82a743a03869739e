//! Engine configuration options.

use crate::config::{ConfigError, ProtocolParams};
use crate::feeds::FeedCatalog;
use std::collections::HashMap;

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Consensus parameters shared with validation.
    pub protocol: ProtocolParams,
    /// Feed names used when rendering expressions.
    pub catalog: FeedCatalog,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            protocol: ProtocolParams::default(),
            catalog: FeedCatalog::standard(),
        }
    }
}

impl EngineConfig {
    pub fn testnet() -> Self {
        Self {
            protocol: ProtocolParams::testnet(),
            ..Self::default()
        }
    }

    pub fn from_env_map(env_map: HashMap<String, String>) -> Result<Self, ConfigError> {
        Ok(Self {
            protocol: ProtocolParams::from_env_map(env_map)?,
            ..Self::default()
        })
    }
}
