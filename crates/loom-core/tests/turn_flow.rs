//! End-to-end turns through the public API: scripted model, built-in tools,
//! real shell commands and a SQLite store on disk.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use loom_core::agent::{EventSink, LoopEvent, StartupHookConfig};
use loom_core::ai::{ModelResponse, ScriptedProvider};
use loom_core::storage::MessageType;
use loom_core::{
    tools, ConversationStore, LoomConfig, OrchestratorConfig, OrchestratorServices, ToolRegistry,
    TurnOrchestrator, TurnStatus,
};

fn registry() -> Arc<ToolRegistry> {
    let mut builder = ToolRegistry::builder();
    tools::register_builtin_tools(&mut builder).unwrap();
    Arc::new(builder.build())
}

fn config(dir: &TempDir) -> OrchestratorConfig {
    let mut loom = LoomConfig {
        db_path: dir.path().join("loom.db"),
        track_git: false,
        ..LoomConfig::default()
    };
    loom.retry.initial_delay_ms = 1;
    OrchestratorConfig {
        startup_hook: StartupHookConfig::at(dir.path().join("no-hook")),
        ..OrchestratorConfig::from(&loom)
    }
}

#[tokio::test]
async fn bash_turn_is_recorded_and_resumable() {
    let dir = TempDir::new().unwrap();
    let workspace = TempDir::new().unwrap();
    let store = ConversationStore::open(dir.path().join("loom.db")).await.unwrap();
    let provider = Arc::new(ScriptedProvider::from_responses(vec![
        ModelResponse::text("Creating the file").with_tool_call(
            "call-1",
            "bash",
            json!({ "command": "echo hello > greeting.txt && cat greeting.txt" }),
        ),
        ModelResponse::text("Done"),
    ]));

    let (events, mut rx) = EventSink::channel();
    let orchestrator = TurnOrchestrator::new(
        OrchestratorServices {
            provider: provider.clone(),
            tools: registry(),
            store: store.clone(),
        },
        config(&dir),
    )
    .with_events(events);

    let conversation = orchestrator
        .start_conversation(Some(workspace.path()), &CancellationToken::new())
        .await
        .unwrap();
    let outcome = orchestrator
        .run_turn(&conversation.id, "make a greeting", CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome.status, TurnStatus::Completed);
    assert_eq!(outcome.final_text.as_deref(), Some("Done"));
    assert_eq!(
        std::fs::read_to_string(workspace.path().join("greeting.txt")).unwrap(),
        "hello\n"
    );

    // A second store on the same file sees the whole turn, in order.
    let reopened = ConversationStore::open(dir.path().join("loom.db")).await.unwrap();
    let log = reopened.read(&conversation.id, 1).await.unwrap();
    let types: Vec<MessageType> = log.iter().map(|m| m.message_type).collect();
    assert_eq!(
        types,
        vec![MessageType::User, MessageType::Agent, MessageType::Tool, MessageType::Agent]
    );
    let sequence: Vec<i64> = log.iter().map(|m| m.sequence_id).collect();
    assert_eq!(sequence, vec![1, 2, 3, 4]);

    let tool = &log[2];
    assert_eq!(tool.display_data.as_ref().unwrap()["exit_code"], 0);
    assert_eq!(tool.display_data.as_ref().unwrap()["output"], "hello");

    let tail = reopened.read(&conversation.id, 3).await.unwrap();
    assert_eq!(tail.len(), 2);

    let mut appended = 0;
    while let Ok(event) = rx.try_recv() {
        if matches!(event, LoopEvent::MessageAppended { .. }) {
            appended += 1;
        }
    }
    assert_eq!(appended, 4);
}

#[tokio::test]
async fn failing_command_becomes_tool_error_and_turn_continues() {
    let dir = TempDir::new().unwrap();
    let store = ConversationStore::open(dir.path().join("loom.db")).await.unwrap();
    let provider = Arc::new(ScriptedProvider::from_responses(vec![
        ModelResponse::default().with_tool_call(
            "call-1",
            "bash",
            json!({ "command": "echo nope >&2; exit 3" }),
        ),
        ModelResponse::text("It failed"),
    ]));
    let orchestrator = TurnOrchestrator::new(
        OrchestratorServices {
            provider: provider.clone(),
            tools: registry(),
            store: store.clone(),
        },
        config(&dir),
    );

    let conversation = orchestrator
        .start_conversation(Some(dir.path()), &CancellationToken::new())
        .await
        .unwrap();
    orchestrator
        .run_turn(&conversation.id, "try it", CancellationToken::new())
        .await
        .unwrap();

    let log = store.read(&conversation.id, 3).await.unwrap();
    assert_eq!(log[0].message_type, MessageType::Tool);
    let user_data = log[0].user_data.as_ref().unwrap();
    assert_eq!(user_data["error"]["code"], "command_failed");
    let result = &log[0].llm_data.as_ref().unwrap()[0];
    assert_eq!(result["is_error"], true);
    assert!(result["content"][0]["text"].as_str().unwrap().contains("nope"));

    // The model saw the failure on its second call.
    let second = &provider.requests().await[1];
    assert_eq!(second.messages.len(), 3);
}

#[tokio::test]
async fn cancelled_bash_leaves_consistent_log() {
    let dir = TempDir::new().unwrap();
    let store = ConversationStore::open(dir.path().join("loom.db")).await.unwrap();
    let provider = Arc::new(ScriptedProvider::from_responses(vec![ModelResponse::default()
        .with_tool_call("call-1", "bash", json!({ "command": "sleep 30" }))
        .with_tool_call("call-2", "output_iframe", json!({ "html": "<p>never</p>" }))]));
    let orchestrator = TurnOrchestrator::new(
        OrchestratorServices {
            provider,
            tools: registry(),
            store: store.clone(),
        },
        config(&dir),
    );
    let conversation = orchestrator
        .start_conversation(Some(dir.path()), &CancellationToken::new())
        .await
        .unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    let outcome = orchestrator
        .run_turn(&conversation.id, "wait", cancel)
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(10));
    assert_eq!(outcome.status, TurnStatus::Cancelled);

    let log = store.read(&conversation.id, 1).await.unwrap();
    let types: Vec<MessageType> = log.iter().map(|m| m.message_type).collect();
    assert_eq!(
        types,
        vec![
            MessageType::User,
            MessageType::Agent,
            MessageType::Tool,
            MessageType::Tool,
            MessageType::Error,
        ]
    );
    assert_eq!(log[2].user_data.as_ref().unwrap()["error"]["code"], "cancelled");
    assert!(log[3].display_data.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn independent_conversations_run_as_spawned_tasks() {
    let dir = TempDir::new().unwrap();
    let store = ConversationStore::open(dir.path().join("loom.db")).await.unwrap();
    let provider = Arc::new(ScriptedProvider::from_responses(vec![
        ModelResponse::text("done"),
        ModelResponse::text("done"),
    ]));
    let orchestrator = Arc::new(TurnOrchestrator::new(
        OrchestratorServices {
            provider,
            tools: registry(),
            store: store.clone(),
        },
        config(&dir),
    ));

    let mut handles = Vec::new();
    for id in ["left", "right"] {
        let orchestrator = orchestrator.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.run_turn(id, "go", CancellationToken::new()).await
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.unwrap().unwrap().status, TurnStatus::Completed);
    }

    for id in ["left", "right"] {
        let types: Vec<MessageType> = store
            .read(id, 1)
            .await
            .unwrap()
            .iter()
            .map(|m| m.message_type)
            .collect();
        assert_eq!(types, vec![MessageType::User, MessageType::Agent]);
    }
}
