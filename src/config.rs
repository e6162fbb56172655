//! Engine Configuration
//!
//! Feature flags and rollout settings, loaded from JSON and hot-reloadable.
//! Readers take an `Arc` snapshot so one request always sees a consistent
//! configuration even while a reload swaps the current one.

use crate::error::{QueryError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::sync::{Arc, RwLock};
use tracing::info;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFlags {
    /// Master switch for the templated (unified) path. Off means every
    /// request goes to the legacy collaborator.
    #[serde(default = "default_true")]
    pub unified_system_enabled: bool,
}

fn default_true() -> bool {
    true
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            unified_system_enabled: true,
        }
    }
}

/// Percentage rollout settings. Immutable per routing epoch; a reload
/// replaces the whole config atomically.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloutConfig {
    /// Share of users routed to the templated path, 0-100.
    #[serde(default)]
    pub unified_percentage: u8,
    /// Salt mixed into the user-id hash; changing it reshuffles buckets.
    #[serde(default)]
    pub hash_salt: String,
    /// Users always routed to the templated path, regardless of percentage.
    #[serde(default)]
    pub override_users: HashSet<String>,
}

impl Default for RolloutConfig {
    fn default() -> Self {
        Self {
            unified_percentage: 100,
            hash_salt: String::new(),
            override_users: HashSet::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub feature_flags: FeatureFlags,
    #[serde(default)]
    pub rollout: RolloutConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rollout.unified_percentage > 100 {
            return Err(QueryError::Config(format!(
                "unified_percentage {} outside 0-100",
                self.rollout.unified_percentage
            )));
        }
        Ok(())
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }
}

/// Holds the current config and serves atomic snapshots.
pub struct ConfigStore {
    current: RwLock<Arc<EngineConfig>>,
}

impl ConfigStore {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(config)),
        }
    }

    /// One consistent snapshot for the duration of a request.
    pub fn snapshot(&self) -> Arc<EngineConfig> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Swap in a new config. Full replacement, never partial mutation.
    pub fn replace(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = Arc::new(config);
        info!("engine configuration replaced");
        Ok(())
    }

    pub fn reload_from_file(&self, path: &Path) -> Result<()> {
        let config = EngineConfig::from_json_file(path)?;
        self.replace(config)
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}
