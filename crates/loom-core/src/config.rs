//! Runtime configuration
//!
//! Loaded from `~/.config/loom/config.toml` when present, then overridden by
//! environment variables. Every field has a default so an empty or missing
//! file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::agent::startup_hook::StartupHookConfig;
use crate::ai::retry::RetryConfig;
use crate::constants::{agent, env, hooks, tools};
use crate::error::ConfigError;
use crate::paths;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoomConfig {
    pub db_path: PathBuf,
    pub max_iterations: usize,
    pub max_parallel_tools: usize,
    pub tool_timeout_secs: u64,
    pub model_timeout_secs: u64,
    pub startup_hook_timeout_secs: u64,
    pub disable_startup_hook: bool,
    pub track_git: bool,
    pub retry: RetrySettings,
}

/// Serializable form of [`RetryConfig`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let defaults = RetryConfig::default();
        Self {
            max_attempts: defaults.max_attempts,
            initial_delay_ms: defaults.initial_delay.as_millis() as u64,
            max_delay_ms: defaults.max_delay.as_millis() as u64,
        }
    }
}

impl Default for LoomConfig {
    fn default() -> Self {
        Self {
            db_path: paths::default_db_path(),
            max_iterations: agent::MAX_ITERATIONS,
            max_parallel_tools: agent::MAX_PARALLEL_TOOLS,
            tool_timeout_secs: tools::DEFAULT_TOOL_TIMEOUT.as_secs(),
            model_timeout_secs: agent::MODEL_CALL_TIMEOUT.as_secs(),
            startup_hook_timeout_secs: hooks::STARTUP_HOOK_TIMEOUT.as_secs(),
            disable_startup_hook: false,
            track_git: true,
            retry: RetrySettings::default(),
        }
    }
}

impl LoomConfig {
    /// Load from the default config file and apply environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::load_file(&paths::config_file())?;
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Load a config file; a missing file yields defaults.
    pub fn load_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply environment overrides through a lookup function (testable without
    /// touching the process environment).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(db_path) = lookup(env::DB_PATH).filter(|v| !v.is_empty()) {
            self.db_path = PathBuf::from(db_path);
        }
        if lookup(hooks::DISABLE_STARTUP_HOOK_ENV).is_some_and(|v| !v.is_empty()) {
            self.disable_startup_hook = true;
        }
    }

    pub fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.tool_timeout_secs)
    }

    pub fn model_timeout(&self) -> Duration {
        Duration::from_secs(self.model_timeout_secs)
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.retry.initial_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            ..RetryConfig::default()
        }
    }

    pub fn startup_hook(&self) -> StartupHookConfig {
        StartupHookConfig {
            path: paths::startup_hook_path(),
            timeout: Duration::from_secs(self.startup_hook_timeout_secs),
            disabled: self.disable_startup_hook,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = LoomConfig::load_file(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, LoomConfig::default());
    }

    #[test]
    fn partial_file_keeps_remaining_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "max_iterations = 7\ntrack_git = false\n\n[retry]\nmax_attempts = 5\n",
        )
        .unwrap();

        let config = LoomConfig::load_file(&path).unwrap();
        assert_eq!(config.max_iterations, 7);
        assert!(!config.track_git);
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.max_parallel_tools, agent::MAX_PARALLEL_TOOLS);
        assert_eq!(config.startup_hook_timeout_secs, 5);
    }

    #[test]
    fn invalid_toml_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "max_iterations = \"many\"").unwrap();

        let err = LoomConfig::load_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn env_overrides_db_path_and_hook_switch() {
        let mut config = LoomConfig::default();
        config.apply_env(|key| match key {
            "LOOM_DB_PATH" => Some("/tmp/other.db".to_string()),
            "LOOM_DISABLE_STARTUP_HOOK" => Some("1".to_string()),
            _ => None,
        });
        assert_eq!(config.db_path, PathBuf::from("/tmp/other.db"));
        assert!(config.disable_startup_hook);
        assert!(config.startup_hook().disabled);
    }

    #[test]
    fn empty_disable_value_keeps_hook_enabled() {
        let mut config = LoomConfig::default();
        config.apply_env(|key| (key == "LOOM_DISABLE_STARTUP_HOOK").then(String::new));
        assert!(!config.disable_startup_hook);
    }
}
