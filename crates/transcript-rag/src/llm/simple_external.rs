//! Chat completions over HTTP for OpenAI, Azure OpenAI and compatible APIs

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::json;

use super::{ApiProvider, GenerationConfig, LLMProvider, ProviderInfo};
use crate::config::CompletionServiceConfig;
use crate::error::ChatError;

/// External API provider
pub struct SimpleExternalProvider {
    provider: ApiProvider,
    api_key: String,
    model: String,
    client: Client,
}

/// Parse a response body as JSON, returning a clear error if the server returned HTML
/// (e.g. a gateway error page) instead of valid JSON.
pub(crate) async fn parse_json_response<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
    endpoint: &str,
) -> Result<T> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| anyhow!("Failed to read response body from {}: {}", endpoint, e))?;

    let trimmed = body.trim_start();
    if trimmed.starts_with('<') {
        let preview: String = trimmed.chars().take(200).collect();
        return Err(anyhow!(
            "Endpoint {} returned HTML instead of JSON (HTTP {}). Response: {}",
            endpoint,
            status,
            preview
        ));
    }

    serde_json::from_str::<T>(&body).map_err(|e| {
        let preview: String = body.chars().take(300).collect();
        anyhow!(
            "Failed to parse JSON from {} (HTTP {}): {}. Response body: {}",
            endpoint,
            status,
            e,
            preview
        )
    })
}

/// Send a request, turning transport failures and non-2xx statuses into
/// descriptive errors.
pub(crate) async fn send_checked(request: RequestBuilder, endpoint: &str) -> Result<reqwest::Response> {
    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            tracing::error!(endpoint = %endpoint, "Request timed out (connect or response timeout)");
            anyhow!("Request to {} timed out", endpoint)
        } else if e.is_connect() {
            tracing::error!(endpoint = %endpoint, error = %e, "Connection failed");
            anyhow!("Failed to connect to {}: {}", endpoint, e)
        } else {
            tracing::error!(endpoint = %endpoint, error = %e, "Request failed");
            anyhow!("Request to {} failed: {}", endpoint, e)
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        let error = response.text().await.unwrap_or_default();
        tracing::error!(endpoint = %endpoint, status = %status, error = %error, "API returned error");
        return Err(anyhow!("API error ({}): {}", status, error));
    }
    Ok(response)
}

pub(crate) fn http_client() -> Result<Client> {
    Client::builder()
        .connect_timeout(std::time::Duration::from_secs(15))
        .timeout(std::time::Duration::from_secs(300))
        .pool_idle_timeout(std::time::Duration::from_secs(90))
        .tcp_nodelay(true)
        .build()
        .context("Failed to build HTTP client")
}

impl SimpleExternalProvider {
    pub fn new(provider: ApiProvider, api_key: String, model: String) -> Result<Self> {
        let client = http_client()?;

        tracing::info!(
            provider = ?provider,
            model = %model,
            "Creating SimpleExternalProvider (connect_timeout=15s)"
        );

        Ok(Self {
            provider,
            api_key,
            model,
            client,
        })
    }

    pub fn from_config(config: &CompletionServiceConfig) -> Result<Self, ChatError> {
        let (provider, api_key, model) = ApiProvider::from_config(config)?;
        Self::new(provider, api_key, model)
            .map_err(|e| ChatError::Configuration(format!("{:#}", e)))
    }

    fn get_endpoint(&self) -> String {
        match &self.provider {
            ApiProvider::OpenAI => "https://api.openai.com/v1/chat/completions".to_string(),
            ApiProvider::AzureOpenAI {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/chat/completions?api-version={}",
                endpoint, deployment, api_version
            ),
            ApiProvider::Custom { endpoint } => endpoint.clone(),
        }
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.provider {
            ApiProvider::AzureOpenAI { .. } => request.header("api-key", &self.api_key),
            _ => request.header("Authorization", format!("Bearer {}", self.api_key)),
        }
    }
}

#[async_trait]
impl LLMProvider for SimpleExternalProvider {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<String> {
        let endpoint = self.get_endpoint();
        tracing::debug!(
            endpoint = %endpoint,
            model = %self.model,
            max_tokens = config.max_tokens,
            prompt_len = prompt.len(),
            "Sending chat completion request"
        );

        let mut request = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "max_tokens": config.max_tokens,
            "temperature": config.temperature,
            "top_p": config.top_p,
            "presence_penalty": config.presence_penalty,
            "frequency_penalty": config.frequency_penalty,
            "stream": false
        });
        if !config.stop_sequences.is_empty() {
            request["stop"] = json!(config.stop_sequences);
        }

        let response = send_checked(
            self.authorize(self.client.post(&endpoint)).json(&request),
            &endpoint,
        )
        .await?;
        let result: OpenAIResponse = parse_json_response(response, &endpoint).await?;

        let content = result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("No choices returned from API"))?;

        tracing::debug!("API response received, {} chars", content.len());
        Ok(content)
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: self.provider.name().to_string(),
            model: self.model.clone(),
            context_window: 4096,
        }
    }
}

// ============================================================================
// Response Types
// ============================================================================

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
}

#[derive(Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
}
