//! Lamp configuration.
//!
//! Loaded from TOML at startup and handed to the engine builder — the
//! config is a per-instance handle, not a global.
//!
//! ## Loading Order
//!
//! 1. `LUMEN_CONFIG` environment variable (path to a TOML file)
//! 2. `lumen.toml` in the current working directory
//! 3. Built-in defaults

pub mod defaults;

use std::path::PathBuf;

use serde::Deserialize;
use tracing::{info, warn};

/// Storage file locations. `None` disables persistence for that store
/// (used by tests and dry runs).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub memory_file: Option<PathBuf>,
    pub pipelines_file: Option<PathBuf>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            memory_file: Some(PathBuf::from(defaults::DEFAULT_MEMORY_FILE)),
            pipelines_file: Some(PathBuf::from(defaults::DEFAULT_PIPELINES_FILE)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Custom tool and LLM step bound, in seconds.
    pub tool_secs: u64,
    /// Preset API fetch bound, in seconds.
    pub api_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            tool_secs: defaults::DEFAULT_TOOL_TIMEOUT_SECS,
            api_secs: defaults::DEFAULT_API_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Frame interval for expression states that do not set a speed.
    pub frame_ms: u64,
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            frame_ms: defaults::DEFAULT_FRAME_MS,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LampConfig {
    pub storage: StorageConfig,
    pub timeouts: TimeoutConfig,
    pub animation: AnimationConfig,
}

impl LampConfig {
    /// Load following the documented precedence. Unreadable or invalid
    /// files fall back to defaults with a warning rather than aborting
    /// startup.
    pub fn load() -> Self {
        let path = std::env::var("LUMEN_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(defaults::DEFAULT_CONFIG_FILE));
        Self::from_path(&path)
    }

    pub fn from_path(path: &std::path::Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str::<LampConfig>(&text) {
                Ok(config) => {
                    info!("[Config] Loaded {}", path.display());
                    config
                }
                Err(e) => {
                    warn!("[Config] {} invalid ({e}), using defaults", path.display());
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    /// Config with persistence disabled; tests build engines from this.
    pub fn ephemeral() -> Self {
        Self {
            storage: StorageConfig {
                memory_file: None,
                pipelines_file: None,
            },
            ..Self::default()
        }
    }

    /// Range checks for operator-tunable values.
    pub fn validate(&self) -> Result<(), String> {
        if self.timeouts.tool_secs == 0 {
            return Err("timeouts.tool_secs must be positive".into());
        }
        if self.timeouts.api_secs == 0 {
            return Err("timeouts.api_secs must be positive".into());
        }
        if self.animation.frame_ms == 0 {
            return Err("animation.frame_ms must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(LampConfig::default().validate().is_ok());
        assert!(LampConfig::ephemeral().validate().is_ok());
    }

    #[test]
    fn sparse_toml_fills_from_defaults() {
        let config: LampConfig = toml::from_str(
            r#"
[timeouts]
tool_secs = 10
"#,
        )
        .unwrap();
        assert_eq!(config.timeouts.tool_secs, 10);
        assert_eq!(config.timeouts.api_secs, defaults::DEFAULT_API_TIMEOUT_SECS);
        assert_eq!(config.animation.frame_ms, defaults::DEFAULT_FRAME_MS);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let mut config = LampConfig::default();
        config.timeouts.tool_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn invalid_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lumen.toml");
        std::fs::write(&path, "not = [valid").unwrap();
        let config = LampConfig::from_path(&path);
        assert_eq!(config.timeouts.api_secs, defaults::DEFAULT_API_TIMEOUT_SECS);
    }
}
