//! Tool execution for one model response
//!
//! Calls are dispatched in request order. Consecutive read-only calls fan out
//! up to `max_parallel` at a time; a mutating call runs alone, after every
//! earlier call has finished. Results are appended as `tool` messages strictly
//! in request order, whatever order they finish in.

use futures::stream::{self, StreamExt};
use serde_json::json;

use super::loop_events::{EventSink, LoopEvent};
use crate::ai::types::AiToolCall;
use crate::error::StorageError;
use crate::storage::{ConversationStore, Message, MessageType, NewMessage};
use crate::tools::{ToolCategory, ToolContext, ToolOut, ToolRegistry};

/// What a dispatch did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSummary {
    /// Results appended, one per requested call
    pub recorded: usize,
    pub failed: usize,
    /// At least one registered mutating tool was started
    pub ran_mutating: bool,
    pub cancelled: bool,
}

pub(crate) struct Dispatch<'a> {
    pub registry: &'a ToolRegistry,
    pub store: &'a ConversationStore,
    pub events: &'a EventSink,
    pub ctx: &'a ToolContext,
    pub max_parallel: usize,
}

impl Dispatch<'_> {
    /// Run every call and append its result. Once the turn is cancelled the
    /// registry refuses to start new calls, so every remaining call is
    /// recorded as cancelled. Only a storage failure stops early.
    pub(crate) async fn run(&self, calls: &[AiToolCall]) -> Result<DispatchSummary, StorageError> {
        let mut summary = DispatchSummary::default();
        let mut index = 0;

        while index < calls.len() {
            let read_only = calls[index..]
                .iter()
                .take_while(|call| self.registry.category(&call.name) == ToolCategory::ReadOnly)
                .count();

            if read_only > 0 {
                let batch = &calls[index..index + read_only];
                let pending: Vec<_> = batch.iter().map(|call| self.invoke_call(call)).collect();
                let mut results = stream::iter(pending).buffered(self.max_parallel.max(1));
                while let Some((call, out)) = results.next().await {
                    self.record(call, out, &mut summary).await?;
                }
                index += read_only;
                continue;
            }

            let call = &calls[index];
            if !self.ctx.cancel.is_cancelled() && self.registry.lookup(&call.name).is_ok() {
                summary.ran_mutating = true;
            }
            let out = self.invoke(call).await;
            self.record(call, out, &mut summary).await?;
            index += 1;
        }

        summary.cancelled = self.ctx.cancel.is_cancelled();
        Ok(summary)
    }

    async fn invoke_call<'c>(&self, call: &'c AiToolCall) -> (&'c AiToolCall, ToolOut) {
        (call, self.invoke(call).await)
    }

    async fn invoke(&self, call: &AiToolCall) -> ToolOut {
        self.events.emit(LoopEvent::ToolExecuting {
            id: call.id.clone(),
            name: call.name.clone(),
        });
        self.registry
            .invoke(&call.name, self.ctx, call.arguments.clone())
            .await
    }

    async fn record(
        &self,
        call: &AiToolCall,
        out: ToolOut,
        summary: &mut DispatchSummary,
    ) -> Result<(), StorageError> {
        summary.recorded += 1;
        if out.is_error() {
            summary.failed += 1;
        }
        self.events.emit(LoopEvent::ToolFinished {
            id: call.id.clone(),
            name: call.name.clone(),
            is_error: out.is_error(),
        });
        append_message(
            self.store,
            self.events,
            &self.ctx.conversation_id,
            tool_message(call, out),
        )
        .await?;
        Ok(())
    }
}

/// `tool` message for a finished call
pub(crate) fn tool_message(call: &AiToolCall, out: ToolOut) -> NewMessage {
    let message = NewMessage::new(MessageType::Tool)
        .with_llm_data(json!([out.tool_result(&call.id)]))
        .with_user_data(json!({
            "tool_use_id": call.id,
            "name": call.name,
            "input": call.arguments,
            "error": out.error,
        }));

    match out.display {
        Some(display) => message.with_display_data(display),
        None => message,
    }
}

/// Append and announce a message.
pub(crate) async fn append_message(
    store: &ConversationStore,
    events: &EventSink,
    conversation_id: &str,
    message: NewMessage,
) -> Result<Message, StorageError> {
    let message = store.append(conversation_id, message).await?;
    events.emit(LoopEvent::MessageAppended {
        conversation_id: message.conversation_id.clone(),
        sequence_id: message.sequence_id,
        message_type: message.message_type,
    });
    Ok(message)
}
