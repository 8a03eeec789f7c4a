//! Tool registry and invocation protocol
//!
//! The registry is built once at startup through [`ToolRegistryBuilder`] and
//! is immutable afterwards. Every invocation goes through [`ToolRegistry::invoke`],
//! which validates input against the tool's schema, bounds execution time,
//! captures panics and bounds what re-enters model context. Whatever happens
//! inside a tool, the caller gets a [`ToolOut`].

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::truncation::truncate_head;
use crate::ai::types::{AiTool, Content};
use crate::constants::tools::{
    DEFAULT_TOOL_TIMEOUT, MAX_LLM_CONTENT_BYTES, MAX_LLM_CONTENT_LINES, SELF_TIMED_GRACE,
};
use crate::error::{CommandError, RegistryError, ValidationError};

/// Whether a tool changes state. Mutating tools are serialized per
/// conversation; read-only tools may run concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolCategory {
    ReadOnly,
    Mutating,
}

/// Failure carried inside a [`ToolOut`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolError {
    pub code: String,
    pub message: String,
}

impl ToolError {
    pub fn new(code: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self {
            code: code.into(),
            message: message.to_string(),
        }
    }

    pub fn invalid_input(error: &ValidationError) -> Self {
        Self::new("invalid_input", error)
    }

    pub fn unknown_tool(name: &str) -> Self {
        Self::new("unknown_tool", RegistryError::NotFound(name.to_string()))
    }

    pub fn timeout(name: &str, timeout: Duration) -> Self {
        Self::new(
            "timeout",
            format!("Tool '{}' timed out after {} ms", name, timeout.as_millis()),
        )
    }

    pub fn cancelled() -> Self {
        Self::new("cancelled", "Tool call cancelled")
    }

    pub fn panicked(name: &str, detail: &str) -> Self {
        Self::new("panic", format!("Tool '{}' panicked: {}", name, detail))
    }
}

impl From<&CommandError> for ToolError {
    fn from(error: &CommandError) -> Self {
        Self::new(error.code(), error)
    }
}

/// Result of a tool invocation, split into what the model sees and what the
/// UI sees.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ToolOut {
    /// Re-enters model context; bounded by the registry
    pub llm_content: Vec<Content>,
    /// UI projection; never sent to the model
    pub display: Option<Value>,
    /// When set, `llm_content` and `display` are advisory
    pub error: Option<ToolError>,
}

impl ToolOut {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            llm_content: vec![Content::text(text)],
            ..Default::default()
        }
    }

    /// Error result whose model-visible content is the error message
    pub fn error(error: ToolError) -> Self {
        Self {
            llm_content: vec![Content::text(format!("Error: {}", error.message))],
            display: None,
            error: Some(error),
        }
    }

    pub fn with_display(mut self, display: Value) -> Self {
        self.display = Some(display);
        self
    }

    pub fn with_llm_text(mut self, text: impl Into<String>) -> Self {
        self.llm_content.push(Content::text(text));
        self
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// `tool_result` block answering the call `tool_use_id`
    pub fn tool_result(&self, tool_use_id: &str) -> Content {
        Content::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content: self.llm_content.clone(),
            is_error: self.is_error(),
        }
    }
}

/// Context for tool execution
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub working_dir: PathBuf,
    pub conversation_id: String,
    /// Cancelled when the turn is cancelled
    pub cancel: CancellationToken,
    /// Per-call deadline enforced by the registry
    pub timeout: Duration,
}

impl ToolContext {
    pub fn new(working_dir: impl Into<PathBuf>, conversation_id: impl Into<String>) -> Self {
        Self {
            working_dir: working_dir.into(),
            conversation_id: conversation_id.into(),
            cancel: CancellationToken::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Trait for tool implementations
#[async_trait]
pub trait Tool: Send + Sync {
    /// Tool name (id)
    fn name(&self) -> &str;

    /// Tool description for the model
    fn description(&self) -> &str;

    /// JSON schema for the input; checked before `run` is called
    fn input_schema(&self) -> Value;

    fn category(&self) -> ToolCategory {
        ToolCategory::Mutating
    }

    /// Deadline the tool enforces itself for this input. The registry then
    /// waits that long plus a grace period instead of the context timeout.
    fn requested_timeout(&self, _input: &Value) -> Option<Duration> {
        None
    }

    /// Execute the tool. `input` has already passed schema validation.
    async fn run(&self, ctx: &ToolContext, input: Value) -> ToolOut;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: jsonschema::Validator,
    definition: AiTool,
    category: ToolCategory,
}

/// A registered tool, borrowed from the registry
#[derive(Clone, Copy)]
pub struct ToolHandle<'a> {
    entry: &'a RegisteredTool,
}

impl<'a> ToolHandle<'a> {
    pub fn name(&self) -> &'a str {
        &self.entry.definition.name
    }

    pub fn category(&self) -> ToolCategory {
        self.entry.category
    }

    /// Check `input` against the declared schema, collecting every violation.
    pub fn validate(&self, input: &Value) -> Result<(), ValidationError> {
        if self.entry.validator.is_valid(input) {
            return Ok(());
        }
        let errors = self
            .entry
            .validator
            .iter_errors(input)
            .map(|e| e.to_string())
            .collect();
        Err(ValidationError {
            tool: self.name().to_string(),
            errors,
        })
    }
}

/// Startup-time registration
pub struct ToolRegistryBuilder {
    tools: Vec<RegisteredTool>,
    default_timeout: Duration,
}

impl Default for ToolRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolRegistryBuilder {
    pub fn new() -> Self {
        Self {
            tools: Vec::new(),
            default_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }

    /// Upper bound on any run that does not set its own deadline.
    pub fn default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Register a tool. Duplicate names and schemas that do not compile are
    /// configuration errors.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<&mut Self, RegistryError> {
        let name = tool.name().to_string();
        if self.tools.iter().any(|t| t.definition.name == name) {
            return Err(RegistryError::DuplicateTool(name));
        }

        let schema = tool.input_schema();
        let validator = jsonschema::Validator::new(&schema).map_err(|e| RegistryError::InvalidSchema {
            name: name.clone(),
            reason: e.to_string(),
        })?;

        tracing::debug!(tool = %name, "Registered tool");
        self.tools.push(RegisteredTool {
            definition: AiTool {
                name,
                description: tool.description().to_string(),
                input_schema: schema,
            },
            category: tool.category(),
            validator,
            tool,
        });
        Ok(self)
    }

    pub fn build(self) -> ToolRegistry {
        let order = self.tools.iter().map(|t| t.definition.name.clone()).collect();
        let tools = self
            .tools
            .into_iter()
            .map(|t| (t.definition.name.clone(), t))
            .collect();
        ToolRegistry {
            tools,
            order,
            default_timeout: self.default_timeout,
        }
    }
}

/// Immutable name -> tool mapping
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
    /// Registration order, used when advertising tools
    order: Vec<String>,
    default_timeout: Duration,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::new()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn lookup(&self, name: &str) -> Result<ToolHandle<'_>, RegistryError> {
        self.tools
            .get(name)
            .map(|entry| ToolHandle { entry })
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))
    }

    /// Category of a registered tool; unknown tools count as mutating.
    pub fn category(&self, name: &str) -> ToolCategory {
        self.lookup(name)
            .map(|handle| handle.category())
            .unwrap_or(ToolCategory::Mutating)
    }

    /// Validate input for a tool by name
    pub fn validate(&self, name: &str, input: &Value) -> Result<(), ValidationError> {
        match self.lookup(name) {
            Ok(handle) => handle.validate(input),
            Err(e) => Err(ValidationError {
                tool: name.to_string(),
                errors: vec![e.to_string()],
            }),
        }
    }

    /// All tools as model-facing definitions, in registration order
    pub fn ai_tools(&self) -> Vec<AiTool> {
        self.order
            .iter()
            .filter_map(|name| self.tools.get(name))
            .map(|entry| entry.definition.clone())
            .collect()
    }

    /// Invoke a tool. Never panics and never fails: unknown tools, invalid
    /// input, panics, timeouts and cancellation all become `ToolOut.error`.
    pub async fn invoke(&self, name: &str, ctx: &ToolContext, input: Value) -> ToolOut {
        let entry = match self.tools.get(name) {
            Some(entry) => entry,
            None => {
                tracing::warn!(tool = name, "Model requested unknown tool");
                return ToolOut::error(ToolError::unknown_tool(name));
            }
        };

        if let Err(error) = (ToolHandle { entry }).validate(&input) {
            tracing::info!(tool = name, error = %error, "Rejected tool input");
            return ToolOut::error(ToolError::invalid_input(&error));
        }

        if ctx.cancel.is_cancelled() {
            return ToolOut::error(ToolError::cancelled());
        }

        let timeout = entry
            .tool
            .requested_timeout(&input)
            .map_or(ctx.timeout.min(self.default_timeout), |own| own + SELF_TIMED_GRACE);
        let start = Instant::now();
        let run = AssertUnwindSafe(entry.tool.run(ctx, input)).catch_unwind();

        let out = tokio::select! {
            result = tokio::time::timeout(timeout, run) => match result {
                Ok(Ok(out)) => out,
                Ok(Err(panic)) => {
                    let detail = panic_message(panic.as_ref());
                    tracing::error!(tool = name, panic = %detail, "Tool panicked");
                    ToolOut::error(ToolError::panicked(name, &detail))
                }
                Err(_) => {
                    tracing::warn!(
                        tool = name,
                        timeout_ms = timeout.as_millis() as u64,
                        "Tool execution timed out"
                    );
                    ToolOut::error(ToolError::timeout(name, timeout))
                }
            },
            _ = ctx.cancel.cancelled() => ToolOut::error(ToolError::cancelled()),
        };

        tracing::info!(
            tool = name,
            duration_ms = start.elapsed().as_millis() as u64,
            is_error = out.is_error(),
            "Tool finished"
        );
        bound_llm_content(out)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Bound the text re-entering model context to one shared byte budget across
/// all blocks. Display is untouched.
fn bound_llm_content(mut out: ToolOut) -> ToolOut {
    let mut remaining = MAX_LLM_CONTENT_BYTES;
    let mut bounded = Vec::with_capacity(out.llm_content.len());

    for block in out.llm_content {
        match block {
            Content::Text { text } => {
                if remaining == 0 {
                    continue;
                }
                let result = truncate_head(&text, MAX_LLM_CONTENT_LINES, remaining);
                remaining = remaining.saturating_sub(result.bytes_shown);
                if result.was_truncated {
                    remaining = 0;
                }
                bounded.push(Content::text(result.into_text_with_notice()));
            }
            other => bounded.push(other),
        }
    }

    out.llm_content = bounded;
    out
}
