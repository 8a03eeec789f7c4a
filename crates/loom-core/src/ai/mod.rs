//! Model boundary
//!
//! - `types`: provider-facing messages, content blocks and tool definitions
//! - `provider`: the `ModelProvider` trait the orchestrator calls
//! - `scripted`: deterministic provider for tests and the CLI
//! - `retry`: backoff for transient failures

pub mod provider;
pub mod retry;
pub mod scripted;
pub mod types;

pub use provider::ModelProvider;
pub use scripted::{ScriptStep, ScriptedError, ScriptedProvider};
pub use types::{AiTool, AiToolCall, Content, ModelMessage, ModelRequest, ModelResponse, Role, Usage};
