//! Application-wide constants

/// Directory names under the user's config root
pub mod dirs {
    /// `~/.config/loom`
    pub const CONFIG_DIR_NAME: &str = "loom";
    pub const LOGS_DIR_NAME: &str = "logs";
    pub const DATABASE_FILE_NAME: &str = "loom.db";
    pub const CONFIG_FILE_NAME: &str = "config.toml";
}

/// Session-start hook
pub mod hooks {
    use std::time::Duration;

    pub const STARTUP_HOOK_FILE_NAME: &str = "on-conversation-start";
    pub const STARTUP_HOOK_TIMEOUT: Duration = Duration::from_secs(5);
    /// Any non-empty value disables the hook
    pub const DISABLE_STARTUP_HOOK_ENV: &str = "LOOM_DISABLE_STARTUP_HOOK";
}

/// Turn orchestration limits
pub mod agent {
    use std::time::Duration;

    pub const MAX_ITERATIONS: usize = 50;
    pub const MAX_PARALLEL_TOOLS: usize = 4;
    pub const MODEL_CALL_TIMEOUT: Duration = Duration::from_secs(300);
}

/// Tool execution limits
pub mod tools {
    use std::time::Duration;

    pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);
    /// Upper bound on text re-entering model context from one tool call
    pub const MAX_LLM_CONTENT_BYTES: usize = 30_000;
    pub const MAX_LLM_CONTENT_LINES: usize = 2_000;
    /// Slack added to a tool's own deadline so it can report its timeout
    /// before the registry's fires
    pub const SELF_TIMED_GRACE: Duration = Duration::from_secs(5);

    pub const BASH_DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
    pub const BASH_MAX_TIMEOUT: Duration = Duration::from_secs(600);
    pub const BASH_OUTPUT_MAX_LINES: usize = 2_000;
    pub const BASH_OUTPUT_MAX_BYTES: usize = 25_000;
}

/// External command capture limits
pub mod process {
    use std::time::Duration;

    pub const RAW_CAPTURE_MAX_LINES: usize = 8_000;
    pub const RAW_CAPTURE_MAX_BYTES: usize = 2_000_000;
    pub const READER_JOIN_TIMEOUT: Duration = Duration::from_secs(2);
    pub const TERMINATE_GRACE: Duration = Duration::from_millis(200);
    pub const KILL_WAIT: Duration = Duration::from_millis(800);
}

/// Environment overrides
pub mod env {
    pub const DB_PATH: &str = "LOOM_DB_PATH";
}
