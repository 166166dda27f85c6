//! Configuration plumbing: the top-level [`EngineConfig`] every other
//! crate builds its components from.
//!
//! `chroma-config` fans `Configurable` components out through a
//! type-keyed `Registry` because a worker wires up dozens of
//! independently-constructed collaborators at startup. This engine's
//! collaborators (`Orchestrator`, `DeviceLink`, the RPC session per
//! device) are each built from a single `&EngineConfig` plus the
//! parameters the caller already has in hand — `Orchestrator::new`,
//! `DeviceLink::new`, and friends take them directly as constructor
//! arguments, so there is no independent wiring step for a locator to
//! sit in front of.

use ivf_error::{CoreError, ErrorCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config error: {0}")]
    Figment(#[from] figment::Error),
    #[error("config error: {0}")]
    Invalid(String),
}

impl CoreError for ConfigError {
    fn code(&self) -> ErrorCode {
        ErrorCode::UnsupportedConfiguration
    }
}

/// Top-level engine configuration: the device list, the per-device
/// resource cap, and the tunables named throughout spec.md §4/§5.
#[derive(Clone, Debug, Deserialize, serde::Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Logical device ids the orchestrator will shard work across.
    pub devices: Vec<u32>,
    /// Per-device stack-arena size in bytes (C1).
    pub device_arena_bytes: usize,
    /// Discrete batch sizes operators are pre-compiled for (C3).
    pub supported_batch_sizes: Vec<usize>,
    /// Tile size used to segment a probed inverted list (C6).
    pub search_list_tile_size: usize,
    /// Flag-poll deadline before a `DeviceTimeout` is raised (C2/§5).
    #[serde(with = "duration_secs")]
    pub flag_poll_deadline: Duration,
    /// Number of spins between wall-clock deadline checks while polling.
    pub flag_poll_spins_per_check: u32,
    /// Number of threads in the top-K merge pool (C6/§5), capped at 6.
    pub topk_pool_threads: usize,
    /// First core id the top-K pool pins to; `topk_pool_threads`
    /// contiguous cores starting here are used.
    pub topk_pool_first_core: usize,
    /// Byte-size threshold above which an `add`/`search` request is paged (§4.7).
    pub max_request_bytes: usize,
    /// Vector-count threshold above which an `add`/`search` request is paged (§4.7).
    pub max_request_vectors: usize,
    /// Multiplier on `K1` bounding the k-means training subsample size (§4.7).
    pub max_points_per_centroid: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            devices: vec![0],
            device_arena_bytes: 256 * 1024 * 1024,
            supported_batch_sizes: vec![1, 2, 4, 8, 16, 32, 64, 128, 256, 512, 1024],
            search_list_tile_size: 16384,
            flag_poll_deadline: Duration::from_secs(50),
            flag_poll_spins_per_check: 4096,
            topk_pool_threads: 4,
            topk_pool_first_core: 0,
            max_request_bytes: 64 * 1024 * 1024 - 2 * 1024,
            max_request_vectors: 512 * 1024,
            max_points_per_centroid: 60,
        }
    }
}

impl EngineConfig {
    /// Load from the process environment under the `IVF_` prefix,
    /// falling back to defaults for anything unset, mirroring
    /// `chroma-config`'s figment-based `Configurable` loaders.
    pub fn from_env() -> Result<Self, ConfigError> {
        use figment::providers::{Env, Serialized};
        use figment::Figment;

        let config: EngineConfig = Figment::new()
            .merge(Serialized::defaults(EngineConfig::default()))
            .merge(Env::prefixed("IVF_"))
            .extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::Invalid("devices must not be empty".into()));
        }
        if self.topk_pool_threads == 0 || self.topk_pool_threads > 6 {
            return Err(ConfigError::Invalid(
                "topk_pool_threads must be in 1..=6".into(),
            ));
        }
        if self.search_list_tile_size == 0 {
            return Err(ConfigError::Invalid(
                "search_list_tile_size must be > 0".into(),
            ));
        }
        Ok(())
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = u64::deserialize(d)?;
        Ok(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn rejects_empty_devices() {
        let mut c = EngineConfig::default();
        c.devices.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn rejects_oversized_topk_pool() {
        let mut c = EngineConfig::default();
        c.topk_pool_threads = 7;
        assert!(c.validate().is_err());
    }
}
