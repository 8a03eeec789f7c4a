//! Turn orchestrator - the agentic loop
//!
//! Drives one user -> agent cycle per call to [`TurnOrchestrator::run_turn`]:
//!
//! ```text
//! AwaitingUser -> ModelCall -> ToolDispatch -> ModelCall -> ... -> Finalizing -> AwaitingUser
//! ```
//!
//! Every step is recorded in the conversation store before the next one
//! starts, so the log reflects a consistent state whichever way a turn ends.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashSet;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;

use super::executor::{append_message, Dispatch};
use super::git_state::GitTracker;
use super::loop_events::{EventSink, LoopEvent, TurnState};
use super::startup_hook::{run_startup_hook, StartupHookConfig};
use crate::ai::provider::ModelProvider;
use crate::ai::retry::{with_retry, RetryConfig, RetryError};
use crate::ai::types::{Content, ModelMessage, ModelRequest, ModelResponse, Role};
use crate::config::LoomConfig;
use crate::constants::{agent, tools};
use crate::error::{ModelError, StorageError, TurnError};
use crate::storage::{Conversation, ConversationStore, Message, MessageType, NewMessage};
use crate::tools::{ToolContext, ToolRegistry};

/// Orchestrator configuration
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Model calls per turn before giving up
    pub max_iterations: usize,
    pub max_parallel_tools: usize,
    pub tool_timeout: Duration,
    pub model_timeout: Duration,
    pub retry: RetryConfig,
    pub startup_hook: StartupHookConfig,
    pub track_git: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_iterations: agent::MAX_ITERATIONS,
            max_parallel_tools: agent::MAX_PARALLEL_TOOLS,
            tool_timeout: tools::DEFAULT_TOOL_TIMEOUT,
            model_timeout: agent::MODEL_CALL_TIMEOUT,
            retry: RetryConfig::default(),
            startup_hook: StartupHookConfig::default(),
            track_git: true,
        }
    }
}

impl From<&LoomConfig> for OrchestratorConfig {
    fn from(config: &LoomConfig) -> Self {
        Self {
            max_iterations: config.max_iterations,
            max_parallel_tools: config.max_parallel_tools.max(1),
            tool_timeout: config.tool_timeout(),
            model_timeout: config.model_timeout(),
            retry: config.retry_config(),
            startup_hook: config.startup_hook(),
            track_git: config.track_git,
        }
    }
}

/// Services the orchestrator needs
#[derive(Clone)]
pub struct OrchestratorServices {
    pub provider: Arc<dyn ModelProvider>,
    pub tools: Arc<ToolRegistry>,
    pub store: ConversationStore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnStatus {
    /// The model gave a final answer
    Completed,
    Cancelled,
    /// The iteration budget ran out while the model kept calling tools
    MaxIterations,
}

/// How a turn ended. Model failures are reported as [`TurnError::Model`]
/// instead.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub final_text: Option<String>,
    /// Model calls made
    pub iterations: usize,
    /// Sequence id of the last message this turn appended
    pub last_sequence_id: i64,
}

pub struct TurnOrchestrator {
    services: OrchestratorServices,
    config: OrchestratorConfig,
    events: EventSink,
    /// At most one turn per conversation; this also keeps its mutating tools
    /// from ever overlapping.
    active_turns: DashSet<String>,
}

impl TurnOrchestrator {
    pub fn new(services: OrchestratorServices, config: OrchestratorConfig) -> Self {
        Self {
            services,
            config,
            events: EventSink::default(),
            active_turns: DashSet::new(),
        }
    }

    pub fn with_events(mut self, events: EventSink) -> Self {
        self.events = events;
        self
    }

    pub fn store(&self) -> &ConversationStore {
        &self.services.store
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Create a conversation and run the startup hook in its working
    /// directory. The conversation is left awaiting its first user message.
    pub async fn start_conversation(
        &self,
        working_dir: Option<&Path>,
        cancel: &CancellationToken,
    ) -> Result<Conversation, StorageError> {
        let conversation = self.services.store.create_conversation(working_dir).await?;
        self.initialize(&conversation, cancel).await?;
        self.events.state(&conversation.id, TurnState::AwaitingUser);
        Ok(conversation)
    }

    /// Run one turn: append `user_text`, then alternate model calls and tool
    /// dispatch until the model answers without tool calls.
    ///
    /// An id with no conversation behind it is created here, startup hook
    /// included, before the user message is appended.
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        user_text: &str,
        cancel: CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        if !self.active_turns.insert(conversation_id.to_string()) {
            return Err(TurnError::TurnInProgress(conversation_id.to_string()));
        }
        let _active = scopeguard::guard((), |_| {
            self.active_turns.remove(conversation_id);
        });

        let conversation = match self.services.store.get_conversation(conversation_id).await? {
            Some(conversation) => conversation,
            None => {
                let conversation = self
                    .services
                    .store
                    .create_conversation_with_id(conversation_id, None)
                    .await?;
                self.initialize(&conversation, &cancel).await?;
                conversation
            }
        };

        let result = self.drive(&conversation, user_text, &cancel).await;
        if let Err(e) = &result {
            tracing::error!(conversation_id, error = %e, "Turn failed");
            self.events.emit(LoopEvent::Error {
                error: e.to_string(),
            });
        }
        self.events.state(conversation_id, TurnState::AwaitingUser);
        result
    }

    /// Announce a new conversation and record its startup hook.
    async fn initialize(
        &self,
        conversation: &Conversation,
        cancel: &CancellationToken,
    ) -> Result<(), StorageError> {
        tracing::info!(conversation_id = %conversation.id, "Created conversation");
        let cwd = conversation.working_dir.as_deref().map(Path::new);
        let outcome = run_startup_hook(&self.config.startup_hook, cwd, cancel).await;
        if let Some(message) = outcome.into_message() {
            self.append(&conversation.id, message).await?;
        }
        Ok(())
    }

    async fn drive(
        &self,
        conversation: &Conversation,
        user_text: &str,
        cancel: &CancellationToken,
    ) -> Result<TurnOutcome, TurnError> {
        let id = conversation.id.as_str();
        let working_dir = working_dir(conversation);

        self.append(
            id,
            NewMessage::new(MessageType::User)
                .with_llm_data(json!([Content::text(user_text)]))
                .with_user_data(json!({ "text": user_text })),
        )
        .await?;

        let mut git = if self.config.track_git {
            Some(GitTracker::start(&working_dir, cancel).await)
        } else {
            None
        };

        let ctx = ToolContext::new(&working_dir, id)
            .with_cancel(cancel.clone())
            .with_timeout(self.config.tool_timeout);

        for iteration in 1..=self.config.max_iterations {
            if cancel.is_cancelled() {
                return self.finish_cancelled(id, iteration - 1).await;
            }

            self.events.state(id, TurnState::ModelCall);
            let request = ModelRequest {
                messages: model_context(&self.services.store.read(id, 1).await?)?,
                tools: self.services.tools.ai_tools(),
            };

            let response = match self.call_model(request, cancel).await {
                Ok(response) => response,
                Err(RetryError::Cancelled { .. }) => {
                    return self.finish_cancelled(id, iteration).await;
                }
                Err(RetryError::Failed { attempts, error }) => {
                    self.append(
                        id,
                        NewMessage::new(MessageType::Error).with_user_data(json!({
                            "kind": "model",
                            "error": format!("model call failed: {error}"),
                            "attempts": attempts,
                        })),
                    )
                    .await?;
                    return Err(TurnError::Model {
                        attempts,
                        source: error,
                    });
                }
            };

            if let Some(usage) = &response.usage {
                self.events.emit(LoopEvent::Usage {
                    prompt_tokens: usage.prompt_tokens,
                    completion_tokens: usage.completion_tokens,
                });
            }

            if response.tool_calls.is_empty() {
                self.events.state(id, TurnState::Finalizing);
                let message = self.append(id, agent_message(&response)).await?;
                return Ok(self.finish(
                    id,
                    TurnStatus::Completed,
                    Some(response.text),
                    iteration,
                    message.sequence_id,
                ));
            }

            self.append(id, agent_message(&response)).await?;
            self.events.state(id, TurnState::ToolDispatch);
            tracing::info!(
                conversation_id = id,
                iteration,
                calls = response.tool_calls.len(),
                "Dispatching tool calls"
            );

            let summary = Dispatch {
                registry: &self.services.tools,
                store: &self.services.store,
                events: &self.events,
                ctx: &ctx,
                max_parallel: self.config.max_parallel_tools,
            }
            .run(&response.tool_calls)
            .await?;
            tracing::debug!(
                conversation_id = id,
                recorded = summary.recorded,
                failed = summary.failed,
                "Tool dispatch finished"
            );

            if summary.cancelled {
                return self.finish_cancelled(id, iteration).await;
            }

            if summary.ran_mutating {
                if let Some(tracker) = git.as_mut() {
                    if let Some(state) = tracker.refresh(&working_dir, cancel).await {
                        tracing::info!(conversation_id = id, head = %state.head, "HEAD moved");
                        self.append(id, state.to_message()).await?;
                    }
                }
            }
        }

        let max = self.config.max_iterations;
        tracing::warn!(conversation_id = id, max_iterations = max, "Iteration budget exhausted");
        let message = self
            .append(
                id,
                error_message(
                    "max_iterations",
                    &format!("stopped after {max} model calls without a final answer"),
                ),
            )
            .await?;
        Ok(self.finish(id, TurnStatus::MaxIterations, None, max, message.sequence_id))
    }

    async fn call_model(
        &self,
        request: ModelRequest,
        cancel: &CancellationToken,
    ) -> Result<ModelResponse, RetryError<ModelError>> {
        let provider = &self.services.provider;
        let timeout = self.config.model_timeout;
        let events = &self.events;

        let (response, attempts) = with_retry(
            &self.config.retry,
            cancel,
            |attempt, error: &ModelError, delay| {
                events.emit(LoopEvent::ModelRetry {
                    attempt,
                    delay_ms: delay.as_millis() as u64,
                    error: error.to_string(),
                })
            },
            || {
                let request = request.clone();
                async move {
                    match tokio::time::timeout(timeout, provider.send(request)).await {
                        Ok(result) => result,
                        Err(_) => Err(ModelError::Timeout(timeout)),
                    }
                }
            },
        )
        .await?;

        tracing::debug!(
            provider = provider.name(),
            attempts,
            tool_calls = response.tool_calls.len(),
            "Model responded"
        );
        Ok(response)
    }

    async fn finish_cancelled(&self, id: &str, iterations: usize) -> Result<TurnOutcome, TurnError> {
        tracing::info!(conversation_id = id, "Turn cancelled");
        let message = self
            .append(id, error_message("cancelled", "turn cancelled"))
            .await?;
        Ok(self.finish(id, TurnStatus::Cancelled, None, iterations, message.sequence_id))
    }

    fn finish(
        &self,
        id: &str,
        status: TurnStatus,
        final_text: Option<String>,
        iterations: usize,
        last_sequence_id: i64,
    ) -> TurnOutcome {
        tracing::info!(conversation_id = id, ?status, iterations, "Turn finished");
        self.events.emit(LoopEvent::TurnFinished {
            conversation_id: id.to_string(),
            iterations,
        });
        TurnOutcome {
            status,
            final_text,
            iterations,
            last_sequence_id,
        }
    }

    async fn append(&self, conversation_id: &str, message: NewMessage) -> Result<Message, StorageError> {
        append_message(&self.services.store, &self.events, conversation_id, message).await
    }
}

fn working_dir(conversation: &Conversation) -> PathBuf {
    match &conversation.working_dir {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn agent_message(response: &ModelResponse) -> NewMessage {
    let message = NewMessage::new(MessageType::Agent)
        .with_llm_data(json!(response.content()))
        .with_user_data(json!({
            "text": response.text,
            "tool_calls": response.tool_calls,
        }));
    match &response.usage {
        Some(usage) => message.with_usage(usage.clone()),
        None => message,
    }
}

/// Terminal `error` message; never re-fed to the model.
fn error_message(kind: &str, error: &str) -> NewMessage {
    NewMessage::new(MessageType::Error).with_user_data(json!({ "kind": kind, "error": error }))
}

/// The ordered prefix the model sees. Messages without `llm_data` are UI-only
/// and skipped.
pub fn model_context(messages: &[Message]) -> Result<Vec<ModelMessage>, StorageError> {
    let mut context = Vec::with_capacity(messages.len());

    for message in messages {
        let Some(llm_data) = &message.llm_data else {
            continue;
        };
        let role = match message.message_type {
            MessageType::User | MessageType::StartupHook => Role::User,
            MessageType::Agent => Role::Assistant,
            MessageType::Tool => Role::Tool,
            MessageType::System => Role::System,
            MessageType::Error | MessageType::GitInfo => continue,
        };
        let content: Vec<Content> =
            serde_json::from_value(llm_data.clone()).map_err(|source| StorageError::Decode {
                field: "llm_data",
                message_id: message.message_id.clone(),
                source,
            })?;
        if !content.is_empty() {
            context.push(ModelMessage { role, content });
        }
    }

    Ok(context)
}
