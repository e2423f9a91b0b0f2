//! Configuration for the membership service

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GmsError, GmsResult};

/// Membership service configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GmsConfig {
    /// How long a client waits for a JOIN response per attempt
    pub join_timeout_ms: u64,
    /// How long a leaving member waits for the coordinator's acknowledgement
    pub leave_timeout_ms: u64,
    /// How long a coordinator waits for members to acknowledge a new view
    pub view_ack_collection_timeout_ms: u64,
    /// Number of JOIN attempts before giving up
    pub max_join_attempts: u32,
    /// Maximum number of requests handed to the processor in one batch (0 = unbounded)
    pub max_batch_size: usize,
}

impl Default for GmsConfig {
    fn default() -> Self {
        Self {
            join_timeout_ms: 3000,
            leave_timeout_ms: 1000,
            view_ack_collection_timeout_ms: 2000,
            max_join_attempts: 5,
            max_batch_size: 0,
        }
    }
}

impl GmsConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> GmsResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse configuration from TOML text; missing keys take their defaults
    pub fn from_toml_str(content: &str) -> GmsResult<Self> {
        let config: GmsConfig = toml::from_str(content)
            .map_err(|e| GmsError::Config(format!("Failed to parse configuration: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML
    pub fn to_toml_string(&self) -> GmsResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| GmsError::Config(format!("Failed to serialize configuration: {}", e)))
    }

    pub fn validate(&self) -> GmsResult<()> {
        if self.join_timeout_ms == 0 {
            return Err(GmsError::Config("join_timeout_ms must be positive".to_string()));
        }
        if self.leave_timeout_ms == 0 {
            return Err(GmsError::Config("leave_timeout_ms must be positive".to_string()));
        }
        if self.view_ack_collection_timeout_ms == 0 {
            return Err(GmsError::Config(
                "view_ack_collection_timeout_ms must be positive".to_string(),
            ));
        }
        if self.max_join_attempts == 0 {
            return Err(GmsError::Config("max_join_attempts must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn leave_timeout(&self) -> Duration {
        Duration::from_millis(self.leave_timeout_ms)
    }

    pub fn view_ack_collection_timeout(&self) -> Duration {
        Duration::from_millis(self.view_ack_collection_timeout_ms)
    }
}
