use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::ledger::{Address, PriceSchedule};
use crate::units::{parse_units, UnitsError};

pub const DEFAULT_CONFIG_FILE: &str = "fractions.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config at {path:?}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path:?}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {field} price: {source}")]
    Price {
        field: &'static str,
        source: UnitsError,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LedgerConfig {
    /// Identity of the ledger itself; it holds every reserve pool.
    pub ledger_id: Address,
    pub admin: Address,
    pub state_file: PathBuf,
    pub prices: PriceConfig,
}

/// Initial prices as decimal strings, e.g. `buy = "0.1"`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PriceConfig {
    pub buy: String,
    pub sell: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_id: "fractions-ledger".into(),
            admin: "admin".into(),
            state_file: PathBuf::from("fractions.state.json"),
            prices: PriceConfig::default(),
        }
    }
}

impl Default for PriceConfig {
    fn default() -> Self {
        Self {
            buy: "0.1".into(),
            sell: "0.05".into(),
        }
    }
}

impl LedgerConfig {
    /// Load `path`, falling back to defaults when the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(?path, "no config file, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger_id.trim().is_empty() {
            return Err(ConfigError::Invalid("ledger_id must not be empty".into()));
        }
        if self.admin.trim().is_empty() {
            return Err(ConfigError::Invalid("admin must not be empty".into()));
        }
        if self.admin == self.ledger_id {
            return Err(ConfigError::Invalid(
                "admin and ledger_id must be different identities".into(),
            ));
        }
        self.price_schedule()?;
        Ok(())
    }

    pub fn price_schedule(&self) -> Result<PriceSchedule, ConfigError> {
        let buy = parse_units(&self.prices.buy).map_err(|source| ConfigError::Price {
            field: "buy",
            source,
        })?;
        let sell = parse_units(&self.prices.sell).map_err(|source| ConfigError::Price {
            field: "sell",
            source,
        })?;
        PriceSchedule::new(buy, sell).map_err(|err| ConfigError::Invalid(err.to_string()))
    }
}
