//! Deterministic model provider
//!
//! Replays a fixed script of responses and failures, recording every request
//! it receives. Used by tests and by the CLI in place of a real model.

use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::Mutex;

use super::provider::ModelProvider;
use super::types::{ModelRequest, ModelResponse};
use crate::error::ModelError;

/// One scripted reply.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ScriptStep {
    Fail { error: ScriptedError },
    Respond(ModelResponse),
}

/// Serializable stand-in for [`ModelError`].
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScriptedError {
    Network {
        #[serde(default)]
        message: String,
    },
    RateLimited {
        #[serde(default)]
        retry_after_ms: Option<u64>,
    },
    InvalidResponse {
        #[serde(default)]
        message: String,
    },
}

impl From<ScriptedError> for ModelError {
    fn from(error: ScriptedError) -> Self {
        match error {
            ScriptedError::Network { message } => ModelError::Network(message),
            ScriptedError::RateLimited { retry_after_ms } => ModelError::RateLimited {
                retry_after: retry_after_ms.map(Duration::from_millis),
            },
            ScriptedError::InvalidResponse { message } => ModelError::InvalidResponse(message),
        }
    }
}

pub struct ScriptedProvider {
    steps: Mutex<VecDeque<ScriptStep>>,
    requests: Mutex<Vec<ModelRequest>>,
    /// Simulated latency per call
    latency: Duration,
}

impl ScriptedProvider {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
            latency: Duration::ZERO,
        }
    }

    /// Script made only of successful responses
    pub fn from_responses(responses: impl IntoIterator<Item = ModelResponse>) -> Self {
        Self::new(responses.into_iter().map(ScriptStep::Respond))
    }

    /// Load a JSON array of steps.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        let steps: Vec<ScriptStep> = serde_json::from_str(json)?;
        Ok(Self::new(steps))
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        use anyhow::Context;

        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read script {}", path.display()))?;
        Self::from_json(&json).with_context(|| format!("Invalid script {}", path.display()))
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Requests received so far, in order
    pub async fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().await.clone()
    }

    pub async fn remaining(&self) -> usize {
        self.steps.lock().await.len()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn send(&self, request: ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().await.push(request);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        match self.steps.lock().await.pop_front() {
            Some(ScriptStep::Respond(response)) => Ok(response),
            Some(ScriptStep::Fail { error }) => Err(error.into()),
            None => Err(ModelError::InvalidResponse("script exhausted".to_string())),
        }
    }
}
