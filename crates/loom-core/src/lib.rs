//! Loom core library
//!
//! Conversation orchestration engine: a durable per-conversation message log,
//! a schema-validated tool registry, a bounded external command runner and the
//! turn orchestrator that ties them to a model provider.

pub mod agent;
pub mod ai;
pub mod config;
pub mod constants;
pub mod error;
pub mod paths;
pub mod process;
pub mod storage;
pub mod tools;

pub use agent::{
    OrchestratorConfig, OrchestratorServices, TurnOrchestrator, TurnOutcome, TurnStatus,
};
pub use config::LoomConfig;
pub use storage::ConversationStore;
pub use tools::ToolRegistry;
