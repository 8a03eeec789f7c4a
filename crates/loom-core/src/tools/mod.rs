//! Tools
//!
//! Provides the tool registry and the built-in tool implementations.

pub mod implementations;
pub mod registry;
pub mod truncation;

pub use implementations::register_builtin_tools;
pub use registry::{
    Tool, ToolCategory, ToolContext, ToolError, ToolHandle, ToolOut, ToolRegistry,
    ToolRegistryBuilder,
};
