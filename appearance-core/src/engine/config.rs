use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::constants::{DEFAULT_MAX_ACCESSORY_SLOTS, DEFAULT_RANDOM_SEED, DEFAULT_TRIGGER_CEILING_MS};
use crate::entity::PeerId;
use crate::logging::TracingConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("config ron: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("unsupported config format '{0}' (expected .json or .ron)")]
    UnsupportedFormat(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Peer this process runs as
    pub local_peer: PeerId,
    pub max_accessory_slots: usize,
    /// Saturation ceiling of `elapsed_in_trigger`
    pub trigger_ceiling_ms: u64,
    /// Seed for Randomized frame sets
    pub random_seed: u64,
    pub tracing: TracingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            local_peer: PeerId(0),
            max_accessory_slots: DEFAULT_MAX_ACCESSORY_SLOTS,
            trigger_ceiling_ms: DEFAULT_TRIGGER_CEILING_MS,
            random_seed: DEFAULT_RANDOM_SEED,
            tracing: TracingConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn for_peer(local_peer: PeerId) -> Self {
        Self {
            local_peer,
            ..Default::default()
        }
    }

    pub fn trigger_ceiling(&self) -> Duration {
        Duration::from_millis(self.trigger_ceiling_ms)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_accessory_slots == 0 {
            return Err(ConfigError::Invalid(
                "max_accessory_slots must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Load from a `.json` or `.ron` file; missing fields take defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_default();
        let config: Self = match extension.as_str() {
            "json" => serde_json::from_str(&text)?,
            "ron" => ron::from_str(&text)?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };
        config.validate()?;
        tracing::info!(path = %path.display(), peer = %config.local_peer, "loaded engine config");
        Ok(config)
    }
}
