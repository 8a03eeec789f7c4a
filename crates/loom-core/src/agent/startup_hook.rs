//! On-conversation-start hook
//!
//! Runs `~/.config/loom/on-conversation-start` once for every new
//! conversation. A missing hook is silent; any other outcome is recorded as a
//! `startup-hook` message.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::ai::types::Content;
use crate::constants::hooks::STARTUP_HOOK_TIMEOUT;
use crate::error::CommandError;
use crate::paths;
use crate::process::{run_executable, RunOutcome};
use crate::storage::{MessageType, NewMessage};

const OUTPUT_PREFIX: &str = "Output of on-conversation-start hook:\n";

/// Where the hook lives and how long it may run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupHookConfig {
    pub path: PathBuf,
    pub timeout: Duration,
    pub disabled: bool,
}

impl Default for StartupHookConfig {
    fn default() -> Self {
        Self {
            path: paths::startup_hook_path(),
            timeout: STARTUP_HOOK_TIMEOUT,
            disabled: false,
        }
    }
}

impl StartupHookConfig {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn disabled() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    Disabled,
    Absent,
    Succeeded { output: String },
    Failed { output: String, error: String },
}

impl HookOutcome {
    /// The `startup-hook` message to record, if any.
    pub fn into_message(self) -> Option<NewMessage> {
        match self {
            HookOutcome::Disabled | HookOutcome::Absent => None,
            HookOutcome::Succeeded { output } => {
                let mut message = NewMessage::new(MessageType::StartupHook)
                    .with_user_data(json!({ "output": output }));
                if !output.is_empty() {
                    message = message.with_llm_data(json!([Content::text(format!(
                        "{OUTPUT_PREFIX}{output}"
                    ))]));
                }
                Some(message)
            }
            HookOutcome::Failed { output, error } => Some(
                NewMessage::new(MessageType::StartupHook)
                    .with_user_data(json!({ "output": output, "error": error })),
            ),
        }
    }
}

/// Run the hook with `cwd` as its working directory.
pub async fn run_startup_hook(
    config: &StartupHookConfig,
    cwd: Option<&Path>,
    cancel: &CancellationToken,
) -> HookOutcome {
    if config.disabled {
        tracing::debug!("Startup hook disabled");
        return HookOutcome::Disabled;
    }

    match run_executable(&config.path, cwd, config.timeout, cancel).await {
        Ok(RunOutcome::Absent) => HookOutcome::Absent,
        Ok(RunOutcome::Finished(result)) => {
            tracing::info!(path = %config.path.display(), "Startup hook finished");
            HookOutcome::Succeeded {
                output: result.output,
            }
        }
        Err(err) => {
            tracing::warn!(path = %config.path.display(), error = %err, "Startup hook failed");
            let error = match &err {
                CommandError::Timeout { timeout, .. } => {
                    format!("hook timed out after {}s", timeout.as_secs())
                }
                other => other.to_string(),
            };
            HookOutcome::Failed {
                output: err.output().unwrap_or_default().to_string(),
                error,
            }
        }
    }
}
