//! Engine configuration
//!
//! Each component carries its own config struct with defaults. The whole
//! tree can be loaded from an optional TOML file layered under
//! `MENTOR_ESCROW__*` environment variables.

use crate::{error::EscrowError, EscrowResult};
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Environment variable prefix for configuration overrides
pub const ENV_PREFIX: &str = "MENTOR_ESCROW";

/// Configuration for the escrow vault
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    /// How long a withdrawal waits on the payout gateway before reporting it pending
    pub transfer_timeout_ms: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            transfer_timeout_ms: 5_000,
        }
    }
}

/// Configuration for the event log
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventLogConfig {
    /// Capacity of the live broadcast feed
    pub channel_capacity: usize,
}

impl Default for EventLogConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Configuration for the session ledger
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Longest bookable session in hours, unbounded when unset
    pub max_session_hours: Option<u64>,
}

/// Configuration for the whole engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Marketplace operator principal
    pub operator: String,
    /// Default tracing filter for binaries
    pub log_level: String,
    pub vault: VaultConfig,
    pub events: EventLogConfig,
    pub ledger: LedgerConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            operator: "operator".to_string(),
            log_level: "info".to_string(),
            vault: VaultConfig::default(),
            events: EventLogConfig::default(),
            ledger: LedgerConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional file and the environment
    pub fn load(path: Option<&Path>) -> EscrowResult<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> EscrowResult<()> {
        if self.operator.trim().is_empty() {
            return Err(EscrowError::config("operator cannot be empty"));
        }
        if self.vault.transfer_timeout_ms == 0 {
            return Err(EscrowError::config(
                "vault.transfer_timeout_ms must be greater than 0",
            ));
        }
        if self.events.channel_capacity == 0 {
            return Err(EscrowError::config(
                "events.channel_capacity must be greater than 0",
            ));
        }
        if self.ledger.max_session_hours == Some(0) {
            return Err(EscrowError::config(
                "ledger.max_session_hours must be greater than 0 when set",
            ));
        }
        Ok(())
    }
}
