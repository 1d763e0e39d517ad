//! Application capabilities injected into the drivers.
//!
//! The drivers never reach into application state directly. Whatever they
//! need (checking credentials, reading a stored parameter, persisting one)
//! goes through [`Capabilities`], supplied at construction.

use std::collections::{BTreeMap, HashMap};

use crate::config::LinkConfig;

/// Prefix of the per-user recharge amount parameters.
pub const RECHARGE_PREFIX: &str = "recharge";
/// Prefix of the per-user accumulated volume parameters.
pub const VOLUME_PREFIX: &str = "volume";

/// Key of the parameter for `user` (1-based) under `prefix`, e.g.
/// `recharge.user2`.
pub fn parameter_key(prefix: &str, user: usize) -> String {
    format!("{}.user{}", prefix, user)
}

/// Operations the drivers may call on the surrounding application.
pub trait Capabilities {
    /// Whether `user` may issue requests with `pin`.
    fn validate_credentials(&self, user: &str, pin: &str) -> bool;

    /// Read a stored parameter.
    fn fetch_parameter(&self, key: &str) -> Option<u32>;

    /// Store a parameter, replacing any previous value.
    fn persist_parameter(&mut self, key: &str, value: u32);
}

impl<C: Capabilities + ?Sized> Capabilities for Box<C> {
    fn validate_credentials(&self, user: &str, pin: &str) -> bool {
        (**self).validate_credentials(user, pin)
    }

    fn fetch_parameter(&self, key: &str) -> Option<u32> {
        (**self).fetch_parameter(key)
    }

    fn persist_parameter(&mut self, key: &str, value: u32) {
        (**self).persist_parameter(key, value)
    }
}

/// In-memory capabilities, seeded from config.
#[derive(Debug, Clone, Default)]
pub struct MemoryCapabilities {
    pins: HashMap<String, String>,
    parameters: BTreeMap<String, u32>,
}

impl MemoryCapabilities {
    /// Create an empty store with no users.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed users and parameters from a config.
    pub fn from_config(config: &LinkConfig) -> Self {
        MemoryCapabilities {
            pins: config
                .credentials
                .iter()
                .map(|c| (c.user.clone(), c.pin.clone()))
                .collect(),
            parameters: config.parameters.clone(),
        }
    }

    /// Add or replace a user.
    pub fn with_user(mut self, user: impl Into<String>, pin: impl Into<String>) -> Self {
        self.pins.insert(user.into(), pin.into());
        self
    }

    /// Set a parameter.
    pub fn with_parameter(mut self, key: impl Into<String>, value: u32) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    /// All stored parameters.
    pub fn parameters(&self) -> &BTreeMap<String, u32> {
        &self.parameters
    }
}

impl Capabilities for MemoryCapabilities {
    fn validate_credentials(&self, user: &str, pin: &str) -> bool {
        self.pins.get(user).is_some_and(|p| p == pin)
    }

    fn fetch_parameter(&self, key: &str) -> Option<u32> {
        self.parameters.get(key).copied()
    }

    fn persist_parameter(&mut self, key: &str, value: u32) {
        self.parameters.insert(key.to_string(), value);
    }
}
