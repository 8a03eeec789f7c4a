//! Agent system for Loom
//!
//! ## Orchestrator (the agentic loop)
//! - `TurnOrchestrator` - Drives one user -> agent cycle: model calls, tool dispatch, retries
//! - `LoopEvent` / `TurnState` - Event protocol between orchestrator and consumers
//! - `OrchestratorConfig` / `OrchestratorServices` - Configuration and dependencies
//!
//! ## Around the loop
//! - `startup_hook` - Runs the on-conversation-start hook for new conversations
//! - `git_state` - Records `gitinfo` messages when HEAD moves during a turn

pub mod executor;
pub mod git_state;
pub mod loop_events;
pub mod orchestrator;
pub mod startup_hook;

pub use executor::DispatchSummary;
pub use git_state::{GitState, GitTracker};
pub use loop_events::{EventSink, LoopEvent, TurnState};
pub use orchestrator::{
    model_context, OrchestratorConfig, OrchestratorServices, TurnOrchestrator, TurnOutcome,
    TurnStatus,
};
pub use startup_hook::{run_startup_hook, HookOutcome, StartupHookConfig};
