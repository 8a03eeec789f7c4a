//! Git HEAD tracking for `gitinfo` messages

use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::process::{run_command, CommandSpec};
use crate::storage::{MessageType, NewMessage};

const GIT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GitState {
    pub head: String,
    pub branch: String,
}

impl GitState {
    /// Capture HEAD and branch for `working_dir`. Anything other than a git
    /// work tree with at least one commit yields `None`.
    pub async fn capture(working_dir: &Path, cancel: &CancellationToken) -> Option<Self> {
        let head = rev_parse(working_dir, &["HEAD"], cancel).await?;
        let branch = rev_parse(working_dir, &["--abbrev-ref", "HEAD"], cancel).await?;
        Some(Self { head, branch })
    }

    pub fn to_message(&self) -> NewMessage {
        NewMessage::new(MessageType::GitInfo)
            .with_user_data(json!({ "head": self.head, "branch": self.branch }))
    }
}

async fn rev_parse(working_dir: &Path, args: &[&str], cancel: &CancellationToken) -> Option<String> {
    let spec = args
        .iter()
        .fold(CommandSpec::new("git", GIT_TIMEOUT).arg("rev-parse"), |spec, arg| {
            spec.arg(*arg)
        })
        .cwd(working_dir);

    match run_command(&spec, cancel).await {
        Ok(result) => {
            let value = result.output.trim();
            (!value.is_empty()).then(|| value.to_string())
        }
        Err(e) => {
            tracing::debug!(dir = %working_dir.display(), error = %e, "git rev-parse failed");
            None
        }
    }
}

/// Tracks HEAD across one turn.
#[derive(Debug, Default)]
pub struct GitTracker {
    last: Option<GitState>,
}

impl GitTracker {
    pub async fn start(working_dir: &Path, cancel: &CancellationToken) -> Self {
        Self {
            last: GitState::capture(working_dir, cancel).await,
        }
    }

    /// Re-capture; returns the new state when HEAD moved.
    pub async fn refresh(&mut self, working_dir: &Path, cancel: &CancellationToken) -> Option<GitState> {
        let current = GitState::capture(working_dir, cancel).await?;
        let changed = self.last.as_ref().map_or(true, |last| last.head != current.head);
        self.last = Some(current.clone());
        changed.then_some(current)
    }
}
