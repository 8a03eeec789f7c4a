//! Bash tool - Execute shell commands through the command runner
//!
//! The model gets the tail of the combined output; the display channel gets
//! everything that was captured.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::constants::tools::{
    BASH_DEFAULT_TIMEOUT, BASH_MAX_TIMEOUT, BASH_OUTPUT_MAX_BYTES, BASH_OUTPUT_MAX_LINES,
};
use crate::error::{CommandError, ExitStatusInfo};
use crate::process::{run_command, CommandSpec};
use crate::tools::registry::{Tool, ToolCategory, ToolContext, ToolError, ToolOut};
use crate::tools::truncation;

pub struct BashTool;

#[derive(Deserialize)]
struct Params {
    command: String,
    #[serde(default)]
    timeout_ms: Option<u64>,
    #[serde(default)]
    description: Option<String>,
}

fn effective_timeout(requested_ms: Option<u64>) -> Duration {
    requested_ms
        .map(Duration::from_millis)
        .unwrap_or(BASH_DEFAULT_TIMEOUT)
        .min(BASH_MAX_TIMEOUT)
}

/// Tail-truncated output for the model.
fn process_output(combined: &str) -> String {
    if combined.is_empty() {
        return "(no output)".to_string();
    }
    truncation::truncate_tail(combined, BASH_OUTPUT_MAX_LINES, BASH_OUTPUT_MAX_BYTES)
        .into_text_with_notice()
}

fn display(command: &str, output: &str, exit: Option<ExitStatusInfo>, timed_out: bool) -> Value {
    let (exit_code, signal) = match exit {
        Some(ExitStatusInfo::Code(code)) => (Some(code), None),
        Some(ExitStatusInfo::Signal(signal)) => (None, Some(signal)),
        None => (None, None),
    };
    json!({
        "type": "bash",
        "command": command,
        "output": output,
        "exit_code": exit_code,
        "signal": signal,
        "timed_out": timed_out,
    })
}

#[async_trait]
impl Tool for BashTool {
    fn name(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute a shell command with `sh -c` in the conversation's working directory. \
         Combined stdout and stderr is returned; long output is truncated to its tail."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "minLength": 1,
                    "description": "The command to execute"
                },
                "timeout_ms": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": BASH_MAX_TIMEOUT.as_millis() as u64,
                    "description": "Optional timeout in milliseconds (default 120000, max 600000)"
                },
                "description": {
                    "type": "string",
                    "description": "Clear, concise description of what this command does in 5-10 words"
                }
            },
            "required": ["command"],
            "additionalProperties": false
        })
    }

    fn category(&self) -> ToolCategory {
        ToolCategory::Mutating
    }

    fn requested_timeout(&self, input: &Value) -> Option<Duration> {
        Some(effective_timeout(input.get("timeout_ms").and_then(Value::as_u64)))
    }

    async fn run(&self, ctx: &ToolContext, input: Value) -> ToolOut {
        let params: Params = match serde_json::from_value(input) {
            Ok(p) => p,
            Err(e) => return ToolOut::error(ToolError::new("invalid_input", e)),
        };

        match &params.description {
            Some(desc) => {
                tracing::info!(command = %params.command, description = %desc, "Executing bash command")
            }
            None => tracing::info!(command = %params.command, "Executing bash command"),
        }

        let spec = CommandSpec::shell(params.command.clone(), effective_timeout(params.timeout_ms))
            .cwd(&ctx.working_dir)
            .env("NO_COLOR", "1");

        match run_command(&spec, &ctx.cancel).await {
            Ok(result) => ToolOut::text(process_output(&result.output)).with_display(display(
                &params.command,
                &result.output,
                Some(result.status),
                false,
            )),
            Err(err) => command_failure(&params.command, &err),
        }
    }
}

/// A failed command still reports whatever it printed.
fn command_failure(command: &str, err: &CommandError) -> ToolOut {
    let Some(output) = err.output() else {
        return ToolOut::error(ToolError::from(err));
    };

    let (exit, timed_out) = match err {
        CommandError::NonZeroExit { status, .. } => (Some(*status), false),
        CommandError::Timeout { .. } => (None, true),
        _ => (None, false),
    };

    ToolOut {
        llm_content: vec![crate::ai::types::Content::text(format!(
            "{}\n{}",
            err,
            process_output(output)
        ))],
        display: Some(display(command, output, exit, timed_out)),
        error: Some(ToolError::from(err)),
    }
}
