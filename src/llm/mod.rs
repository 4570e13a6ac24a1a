//! LLM 协作者
//!
//! The pipeline only needs `prompt in, text out`. [`LlmService`] adds the
//! bounded timeout every stage relies on.

pub mod openai;
pub mod prompts;

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

use crate::config::config::LlmConfig;
use crate::error::{AppError, Result};

pub use openai::OpenAiClient;

/// Per-call options
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LlmRequest {
    pub system_prompt: Option<String>,
    /// Ask the endpoint for a JSON object response
    pub json_response: bool,
    pub max_tokens: Option<u32>,
}

impl LlmRequest {
    pub fn with_system(system_prompt: impl Into<String>) -> Self {
        Self {
            system_prompt: Some(system_prompt.into()),
            ..Default::default()
        }
    }

    pub fn json(mut self) -> Self {
        self.json_response = true;
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Text-completion collaborator
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, prompt: &str, request: &LlmRequest) -> Result<String>;
}

/// Timeout-bounded wrapper around an [`LlmClient`]
#[derive(Clone)]
pub struct LlmService {
    client: Arc<dyn LlmClient>,
    timeout: Duration,
}

impl LlmService {
    pub fn new(client: Arc<dyn LlmClient>, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self> {
        let client = OpenAiClient::new(config)?;
        Ok(Self::new(
            Arc::new(client),
            Duration::from_secs(config.timeout_secs),
        ))
    }

    pub async fn complete(&self, prompt: &str, request: &LlmRequest) -> Result<String> {
        tracing::debug!("LLM call: {} prompt chars", prompt.len());
        match tokio::time::timeout(self.timeout, self.client.complete(prompt, request)).await {
            Ok(result) => result,
            Err(_) => Err(AppError::Timeout(format!(
                "LLM call exceeded {}s",
                self.timeout.as_secs_f32()
            ))),
        }
    }
}
