//! Link configuration.
//!
//! A [`LinkConfig`] is loaded once at startup from YAML. Every field has a
//! default, so an empty file (or no file at all) describes a typed-generation
//! link on `/dev/ttyUSB0` at 9600 baud.
//!
//! ```yaml
//! endpoint: /dev/ttyUSB0
//! baud_rate: 9600
//! generation: typed
//! record_size: 16
//! poll_budget: 2000
//! tick_interval_ms: 5
//! credentials:
//!   - user: "1001"
//!     pin: "4321"
//! parameters:
//!   recharge.user1: 100
//!   volume.user1: 500
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use mni_protocol::{DEFAULT_BAUD_RATE, MASTER_TX_SIZE, NODE_RX_SIZE};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Which record generation the node side uses for incoming requests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Generation {
    /// Requests are decoded field by field.
    #[default]
    Typed,
    /// Requests are taken as opaque bytes; only the opcode group is checked.
    Raw,
}

/// One user allowed to issue requests from the master.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// User identifier.
    pub user: String,
    /// PIN for the user.
    pub pin: String,
}

/// Configuration for one end of the link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Serial endpoint (device path or port name).
    pub endpoint: String,
    /// Baud rate. The link is always 8N1.
    pub baud_rate: u32,
    /// Record generation for node-side receive.
    pub generation: Generation,
    /// Record size both sides agree on.
    pub record_size: usize,
    /// Unsuccessful readiness probes the master allows per exchange. The
    /// last one declares the node unresponsive.
    pub poll_budget: u32,
    /// Delay between driving-loop ticks, in milliseconds.
    pub tick_interval_ms: u64,
    /// Users accepted by the master.
    pub credentials: Vec<Credential>,
    /// Initial stored parameters (`recharge.userN`, `volume.userN`).
    pub parameters: BTreeMap<String, u32>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            endpoint: "/dev/ttyUSB0".to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
            generation: Generation::Typed,
            record_size: MASTER_TX_SIZE,
            poll_budget: 2000,
            tick_interval_ms: 5,
            credentials: Vec::new(),
            parameters: BTreeMap::new(),
        }
    }
}

impl LinkConfig {
    /// Parse a config from YAML text and validate it.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: LinkConfig = if text.trim().is_empty() {
            LinkConfig::default()
        } else {
            serde_yaml::from_str(text)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a config file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_yaml(&text)
    }

    /// Check the config for values the link cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::invalid("endpoint", "must not be empty"));
        }
        if self.baud_rate == 0 {
            return Err(ConfigError::invalid("baud_rate", "must be greater than zero"));
        }
        if self.poll_budget == 0 {
            return Err(ConfigError::invalid("poll_budget", "must be greater than zero"));
        }
        // Record shapes are fixed at compile time; the config can only agree.
        if self.record_size != NODE_RX_SIZE {
            return Err(ConfigError::RecordSizeMismatch {
                configured: self.record_size,
                expected: NODE_RX_SIZE,
            });
        }
        Ok(())
    }

    /// Delay between driving-loop ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    /// Apply command-line overrides.
    pub fn with_overrides(mut self, endpoint: Option<String>, baud_rate: Option<u32>) -> Self {
        if let Some(endpoint) = endpoint {
            self.endpoint = endpoint;
        }
        if let Some(baud_rate) = baud_rate {
            self.baud_rate = baud_rate;
        }
        self
    }
}
