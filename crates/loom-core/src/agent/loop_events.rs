//! Event protocol for the turn loop.
//!
//! `LoopEvent` is everything the orchestrator emits while driving a turn.
//! Presentation layers consume these and map them to their own format; the
//! message log stays the source of truth.

use serde::Serialize;
use tokio::sync::mpsc;

use crate::storage::MessageType;

/// States of the turn state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    AwaitingUser,
    ModelCall,
    ToolDispatch,
    Finalizing,
}

impl std::fmt::Display for TurnState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            TurnState::AwaitingUser => "awaiting_user",
            TurnState::ModelCall => "model_call",
            TurnState::ToolDispatch => "tool_dispatch",
            TurnState::Finalizing => "finalizing",
        })
    }
}

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LoopEvent {
    // ── State machine ──────────────────────────────────────────────────
    StateChanged {
        conversation_id: String,
        state: TurnState,
    },

    /// A message was committed to the log.
    MessageAppended {
        conversation_id: String,
        sequence_id: i64,
        message_type: MessageType,
    },

    // ── Tool lifecycle ─────────────────────────────────────────────────
    ToolExecuting { id: String, name: String },

    ToolFinished {
        id: String,
        name: String,
        is_error: bool,
    },

    // ── Model ──────────────────────────────────────────────────────────
    /// A transient model failure is being retried.
    ModelRetry {
        attempt: u32,
        delay_ms: u64,
        error: String,
    },

    Usage {
        prompt_tokens: usize,
        completion_tokens: usize,
    },

    // ── Turn lifecycle ─────────────────────────────────────────────────
    TurnFinished {
        conversation_id: String,
        iterations: usize,
    },

    Error { error: String },
}

/// Optional event channel. Sending never blocks and a dropped receiver is
/// ignored.
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<mpsc::UnboundedSender<LoopEvent>>,
}

impl EventSink {
    pub fn new(tx: mpsc::UnboundedSender<LoopEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Sink with a fresh channel
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LoopEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn emit(&self, event: LoopEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    pub fn state(&self, conversation_id: &str, state: TurnState) {
        tracing::debug!(conversation_id, %state, "Turn state changed");
        self.emit(LoopEvent::StateChanged {
            conversation_id: conversation_id.to_string(),
            state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn events_serialize_with_type_tag() {
        let event = LoopEvent::StateChanged {
            conversation_id: "c1".into(),
            state: TurnState::ToolDispatch,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "state_changed", "conversation_id": "c1", "state": "tool_dispatch"})
        );

        let event = LoopEvent::MessageAppended {
            conversation_id: "c1".into(),
            sequence_id: 3,
            message_type: MessageType::StartupHook,
        };
        assert_eq!(serde_json::to_value(&event).unwrap()["message_type"], "startup-hook");
    }

    #[tokio::test]
    async fn sink_without_channel_is_a_no_op() {
        EventSink::default().emit(LoopEvent::Error { error: "x".into() });

        let (sink, mut rx) = EventSink::channel();
        sink.state("c1", TurnState::ModelCall);
        assert!(matches!(
            rx.recv().await,
            Some(LoopEvent::StateChanged { state: TurnState::ModelCall, .. })
        ));
    }
}
