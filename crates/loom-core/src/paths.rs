//! Centralized path utilities
//!
//! All application paths in one place for consistency

use std::path::PathBuf;

use crate::constants::{dirs as names, hooks};

/// Get the loom config directory (~/.config/loom)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join(names::CONFIG_DIR_NAME)
}

/// Get the logs directory (~/.config/loom/logs)
pub fn logs_dir() -> PathBuf {
    config_dir().join(names::LOGS_DIR_NAME)
}

/// Default database location (~/.config/loom/loom.db)
pub fn default_db_path() -> PathBuf {
    config_dir().join(names::DATABASE_FILE_NAME)
}

/// Config file (~/.config/loom/config.toml)
pub fn config_file() -> PathBuf {
    config_dir().join(names::CONFIG_FILE_NAME)
}

/// Fixed lookup location of the session-start hook
pub fn startup_hook_path() -> PathBuf {
    config_dir().join(hooks::STARTUP_HOOK_FILE_NAME)
}
