//! LLM Module - text completion services used by the chat pipeline
//! Supports OpenAI, Azure OpenAI and any OpenAI-compatible endpoint

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub mod simple_external;
pub mod tokenizer;

pub use simple_external::SimpleExternalProvider;
pub use tokenizer::{token_count, TokenCounter};

use crate::config::{CompletionServiceConfig, PromptsConfig, SamplingConfig};
use crate::error::ChatError;

/// Stop sequence for intent extraction so the model never starts a bot turn.
pub const INTENT_STOP_SEQUENCE: &str = "] bot:";

/// External API providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ApiProvider {
    OpenAI,
    AzureOpenAI {
        endpoint: String,
        deployment: String,
        api_version: String,
    },
    /// OpenAI-compatible endpoint (full chat completions URL).
    Custom { endpoint: String },
}

impl ApiProvider {
    /// Resolve provider, API key and model from config. An OpenAI key wins
    /// over Azure settings.
    pub fn from_config(config: &CompletionServiceConfig) -> Result<(Self, String, String), ChatError> {
        if let Some(key) = config.openai_api_key.as_deref().filter(|k| !k.trim().is_empty()) {
            return Ok((ApiProvider::OpenAI, key.to_string(), config.openai_model.clone()));
        }

        let endpoint = config
            .azure_endpoint
            .as_deref()
            .filter(|e| !e.trim().is_empty())
            .ok_or_else(|| {
                ChatError::Configuration(
                    "no completion service configured (set OPEN_AI_KEY or AZURE_OPENAI_ENDPOINT)"
                        .into(),
                )
            })?;
        let key = config
            .azure_api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ChatError::Configuration("AZURE_OPENAI_API_KEY is not set".into()))?;
        let deployment = config
            .azure_deployment
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .ok_or_else(|| {
                ChatError::Configuration("AZURE_OPENAI_DEPLOYMENT_NAME is not set".into())
            })?;

        Ok((
            ApiProvider::AzureOpenAI {
                endpoint: endpoint.trim_end_matches('/').to_string(),
                deployment: deployment.to_string(),
                api_version: config.azure_api_version.clone(),
            },
            key.to_string(),
            deployment.to_string(),
        ))
    }

    pub fn name(&self) -> &'static str {
        match self {
            ApiProvider::OpenAI => "OpenAI",
            ApiProvider::AzureOpenAI { .. } => "AzureOpenAI",
            ApiProvider::Custom { .. } => "Custom",
        }
    }
}

/// Core trait for LLM providers
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Generate a completion
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String>;

    /// Get provider info
    fn info(&self) -> ProviderInfo;
}

/// Generation configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GenerationConfig {
    pub max_tokens: usize,
    pub temperature: f32,
    pub top_p: f32,
    pub presence_penalty: f32,
    pub frequency_penalty: f32,
    pub stop_sequences: Vec<String>,
}

impl GenerationConfig {
    fn from_sampling(sampling: &SamplingConfig, max_tokens: usize) -> Self {
        Self {
            max_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            presence_penalty: sampling.presence_penalty,
            frequency_penalty: sampling.frequency_penalty,
            stop_sequences: vec![],
        }
    }

    /// Settings for the final bot answer.
    pub fn for_chat_response(prompts: &PromptsConfig) -> Self {
        Self::from_sampling(&prompts.response, prompts.response_token_limit)
    }

    /// Settings for intent extraction.
    pub fn for_intent(prompts: &PromptsConfig) -> Self {
        let mut config = Self::from_sampling(&prompts.intent, prompts.response_token_limit);
        config.stop_sequences.push(INTENT_STOP_SEQUENCE.to_string());
        config
    }

    /// Short, deterministic settings for one-word classification calls.
    pub fn for_classification() -> Self {
        Self {
            max_tokens: 16,
            temperature: 0.0,
            top_p: 1.0,
            presence_penalty: 0.0,
            frequency_penalty: 0.0,
            stop_sequences: vec![],
        }
    }
}

/// Provider information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInfo {
    pub name: String,
    pub model: String,
    pub context_window: usize,
}
