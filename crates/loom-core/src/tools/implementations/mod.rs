//! Tool implementations
//!
//! Built-in tools:
//! - bash: Execute shell commands (mutating)
//! - output_iframe: Render HTML for the user (read-only)

pub mod bash;
pub mod output_iframe;

pub use bash::BashTool;
pub use output_iframe::OutputIframeTool;

use std::sync::Arc;

use crate::error::RegistryError;
use crate::tools::registry::ToolRegistryBuilder;

/// Register all built-in tools
pub fn register_builtin_tools(builder: &mut ToolRegistryBuilder) -> Result<(), RegistryError> {
    builder
        .register(Arc::new(BashTool))?
        .register(Arc::new(OutputIframeTool))?;
    Ok(())
}
