//! Model provider seam

use async_trait::async_trait;

use super::types::{ModelRequest, ModelResponse};
use crate::error::ModelError;

/// A model reachable over a request/response boundary.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    async fn send(&self, request: ModelRequest) -> Result<ModelResponse, ModelError>;
}
