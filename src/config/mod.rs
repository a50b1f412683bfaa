//! Engine Configuration Module
//!
//! Provides the tunables consumed at engine construction (storm detector
//! thresholds, worker intervals, timeouts). Replaces per-deployment
//! hardcoded values with an operator-tunable TOML file.
//!
//! ## Loading Order
//!
//! 1. `ALERT_ENGINE_CONFIG` environment variable (path to TOML file)
//! 2. `alert_engine.toml` in the current working directory
//! 3. Built-in defaults (matching the engine's documented tunables)
//!
//! ## Usage
//!
//! Call `config::init()` once at startup, then `config::get()` anywhere:
//!
//! ```ignore
//! config::init(EngineConfig::load());
//! let interval = config::get().throttle_summary_interval_secs;
//! ```

pub mod defaults;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::storm::StormConfig;

#[derive(Debug, Error)]
pub enum EngineConfigError {
    #[error("could not read {0}: {1}")]
    Io(PathBuf, std::io::Error),
    #[error("could not parse {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
}

/// Root configuration for an engine deployment. Every field has a default
/// matching the engine's documented tunables, so an absent config file produces
/// identical behavior to an explicit one with all-default fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub storm: StormSettings,
    #[serde(default = "defaults::throttle_summary_interval_secs")]
    pub throttle_summary_interval_secs: u64,
    #[serde(default = "defaults::digest_worker_tick_secs")]
    pub digest_worker_tick_secs: u64,
    #[serde(default = "defaults::digest_delivery_timeout_secs")]
    pub digest_delivery_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            storm: StormSettings::default(),
            throttle_summary_interval_secs: defaults::throttle_summary_interval_secs(),
            digest_worker_tick_secs: defaults::digest_worker_tick_secs(),
            digest_delivery_timeout_secs: defaults::digest_delivery_timeout_secs(),
        }
    }
}

/// TOML-shaped mirror of `crate::storm::StormConfig` (kept separate so the
/// storm module has no `serde` dependency of its own — it only needs
/// `Copy` struct fields, constructed here from parsed config).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StormSettings {
    #[serde(default = "defaults::storm_threshold")]
    pub threshold: usize,
    #[serde(default = "defaults::storm_window_seconds")]
    pub window_seconds: i64,
    #[serde(default = "defaults::storm_cooldown_seconds")]
    pub cooldown_seconds: i64,
}

impl Default for StormSettings {
    fn default() -> Self {
        Self {
            threshold: defaults::storm_threshold(),
            window_seconds: defaults::storm_window_seconds(),
            cooldown_seconds: defaults::storm_cooldown_seconds(),
        }
    }
}

impl From<StormSettings> for StormConfig {
    fn from(settings: StormSettings) -> Self {
        StormConfig {
            threshold: settings.threshold,
            window_seconds: settings.window_seconds,
            cooldown_seconds: settings.cooldown_seconds,
        }
    }
}

impl EngineConfig {
    /// Loading order: `$ALERT_ENGINE_CONFIG`, then `./alert_engine.toml`,
    /// then built-in defaults.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("ALERT_ENGINE_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "loaded engine config from ALERT_ENGINE_CONFIG");
                        return config;
                    }
                    Err(e) => warn!(path = %p.display(), error = %e, "failed to load config from ALERT_ENGINE_CONFIG, falling back"),
                }
            } else {
                warn!(path = %path, "ALERT_ENGINE_CONFIG points to a non-existent file, falling back");
            }
        }

        let local = PathBuf::from("alert_engine.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("loaded engine config from ./alert_engine.toml");
                    return config;
                }
                Err(e) => warn!(error = %e, "failed to load ./alert_engine.toml, using defaults"),
            }
        }

        info!("using default engine config");
        Self::default()
    }

    pub fn load_from_file(path: &Path) -> Result<Self, EngineConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineConfigError::Io(path.to_path_buf(), e))?;
        toml::from_str(&contents).map_err(|e| EngineConfigError::Parse(path.to_path_buf(), e))
    }
}

/// Global engine configuration, initialized once at startup.
static ENGINE_CONFIG: OnceLock<EngineConfig> = OnceLock::new();

/// Initialize the global engine configuration. Must be called exactly
/// once before any calls to `get()`.
pub fn init(config: EngineConfig) {
    if ENGINE_CONFIG.set(config).is_err() {
        warn!("config::init() called more than once — ignoring");
    }
}

/// Get a reference to the global engine configuration.
///
/// Panics if `init()` has not been called. This is by design — a missing
/// config is a fatal startup error, not a recoverable condition.
pub fn get() -> &'static EngineConfig {
    ENGINE_CONFIG
        .get()
        .expect("config::get() called before config::init() — this is a startup bug")
}

pub fn is_initialized() -> bool {
    ENGINE_CONFIG.get().is_some()
}
