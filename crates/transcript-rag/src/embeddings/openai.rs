//! Query embeddings from the OpenAI / Azure OpenAI embeddings endpoint.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

use super::EmbeddingModel;
use crate::config::CompletionServiceConfig;
use crate::error::ChatError;
use crate::llm::simple_external::{http_client, parse_json_response, send_checked};
use crate::llm::ApiProvider;

/// `text-embedding-ada-002` output size.
pub const ADA_002_DIMENSION: usize = 1536;

pub struct OpenAIEmbeddings {
    provider: ApiProvider,
    api_key: String,
    model: String,
    client: Client,
}

impl OpenAIEmbeddings {
    pub fn new(provider: ApiProvider, api_key: String, model: String) -> Result<Self> {
        Ok(Self {
            provider,
            api_key,
            model,
            client: http_client()?,
        })
    }

    /// Same credentials as the completion service; the Azure deployment is
    /// named after the embedding model.
    pub fn from_config(config: &CompletionServiceConfig) -> Result<Self, ChatError> {
        let (provider, api_key, _) = ApiProvider::from_config(config)?;
        let provider = match provider {
            ApiProvider::AzureOpenAI {
                endpoint,
                api_version,
                ..
            } => ApiProvider::AzureOpenAI {
                endpoint,
                deployment: config.embedding_model.clone(),
                api_version,
            },
            other => other,
        };
        Self::new(provider, api_key, config.embedding_model.clone())
            .map_err(|e| ChatError::Configuration(format!("{:#}", e)))
    }

    fn get_endpoint(&self) -> String {
        match &self.provider {
            ApiProvider::OpenAI => "https://api.openai.com/v1/embeddings".to_string(),
            ApiProvider::AzureOpenAI {
                endpoint,
                deployment,
                api_version,
            } => format!(
                "{}/openai/deployments/{}/embeddings?api-version={}",
                endpoint, deployment, api_version
            ),
            ApiProvider::Custom { endpoint } => endpoint.clone(),
        }
    }
}

#[async_trait]
impl EmbeddingModel for OpenAIEmbeddings {
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let endpoint = self.get_endpoint();
        let request = self.client.post(&endpoint);
        let request = match &self.provider {
            ApiProvider::AzureOpenAI { .. } => request.header("api-key", &self.api_key),
            _ => request.header("Authorization", format!("Bearer {}", self.api_key)),
        };

        let response = send_checked(
            request.json(&json!({"model": self.model, "input": text})),
            &endpoint,
        )
        .await?;
        let result: EmbeddingResponse = parse_json_response(response, &endpoint).await?;

        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow!("Embedding response from {} contained no vectors", endpoint))
    }

    fn dimension(&self) -> usize {
        ADA_002_DIMENSION
    }
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_embed_query() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/embeddings"))
            .and(body_partial_json(json!({"input": "rust async", "model": "text-embedding-ada-002"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"index": 0, "embedding": [0.25, -0.5, 1.0]}]
            })))
            .mount(&server)
            .await;

        let embeddings = OpenAIEmbeddings::new(
            ApiProvider::Custom {
                endpoint: format!("{}/v1/embeddings", server.uri()),
            },
            "k".into(),
            "text-embedding-ada-002".into(),
        )
        .unwrap();

        let vector = embeddings.embed_query("rust async").await.unwrap();
        assert_eq!(vector, vec![0.25, -0.5, 1.0]);
    }

    #[tokio::test]
    async fn test_empty_data_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": []})))
            .mount(&server)
            .await;

        let embeddings = OpenAIEmbeddings::new(
            ApiProvider::Custom { endpoint: server.uri() },
            "k".into(),
            "m".into(),
        )
        .unwrap();
        assert!(embeddings.embed_query("x").await.is_err());
    }
}
