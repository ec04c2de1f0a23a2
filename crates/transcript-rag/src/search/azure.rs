//! Azure AI Search REST backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;

use super::{IndexHit, IndexResponse, SearchIndex, SearchRequest};
use crate::config::SearchServiceConfig;
use crate::error::{ChatError, IndexError};

pub struct AzureSearchIndex {
    endpoint: String,
    api_key: String,
    api_version: String,
    client: Client,
}

impl AzureSearchIndex {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: impl Into<String>,
        api_version: impl Into<String>,
    ) -> Result<Self, ChatError> {
        let client = Client::builder()
            .connect_timeout(std::time::Duration::from_secs(15))
            .timeout(std::time::Duration::from_secs(60))
            .pool_idle_timeout(std::time::Duration::from_secs(90))
            .build()
            .map_err(|e| ChatError::Configuration(format!("Failed to build search client: {}", e)))?;

        Ok(Self {
            endpoint: endpoint.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            api_version: api_version.into(),
            client,
        })
    }

    pub fn from_config(config: &SearchServiceConfig) -> Result<Self, ChatError> {
        let endpoint = config.resolved_endpoint()?;
        let api_key = config.resolved_api_key()?;
        tracing::info!(endpoint = %endpoint, "Creating Azure AI Search client");
        Self::new(endpoint, api_key, config.api_version.clone())
    }

    fn search_url(&self, collection: &str) -> String {
        format!(
            "{}/indexes/{}/docs/search?api-version={}",
            self.endpoint, collection, self.api_version
        )
    }

    fn request_body(request: &SearchRequest) -> serde_json::Value {
        let mut body = json!({
            "search": request.query,
            "select": request.select.join(","),
            "top": request.size,
            "count": true,
        });
        if let Some(filter) = request.odata_filter() {
            body["filter"] = json!(filter);
        }
        if let Some(vector) = &request.vector {
            body["vectorQueries"] = json!([{
                "kind": "vector",
                "vector": vector.vector,
                "k": vector.k,
                "fields": vector.field,
            }]);
        }
        body
    }
}

#[async_trait]
impl SearchIndex for AzureSearchIndex {
    async fn search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> Result<IndexResponse, IndexError> {
        let url = self.search_url(collection);
        let response = self
            .client
            .post(&url)
            .header("api-key", &self.api_key)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(|e| IndexError::Request(format!("{}: {}", url, e)))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(IndexError::CollectionNotFound(collection.to_string()));
        }
        let body = response
            .text()
            .await
            .map_err(|e| IndexError::Request(e.to_string()))?;
        if !status.is_success() {
            return Err(IndexError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: AzureSearchResponse = serde_json::from_str(&body).map_err(|e| {
            let preview: String = body.chars().take(300).collect();
            IndexError::Decode(format!("{}. Response body: {}", e, preview))
        })?;

        Ok(IndexResponse {
            total_count: parsed.count.map(|c| c.max(0) as usize),
            hits: parsed.value.into_iter().map(AzureDocument::into_hit).collect(),
        })
    }
}

// ============================================================================
// Wire Types
// ============================================================================

#[derive(Deserialize)]
struct AzureSearchResponse {
    #[serde(rename = "@odata.count")]
    count: Option<i64>,
    #[serde(default)]
    value: Vec<AzureDocument>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct AzureDocument {
    id: String,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    external_source_name: Option<String>,
    #[serde(default)]
    additional_metadata: Option<String>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(rename = "@search.score", default)]
    score: f64,
    #[serde(rename = "@search.rerankerScore", default)]
    reranker_score: Option<f64>,
}

impl AzureDocument {
    fn into_hit(self) -> IndexHit {
        IndexHit {
            id: self.id,
            text: self.text.unwrap_or_default(),
            description: self.description.unwrap_or_default(),
            external_source_name: self.external_source_name.unwrap_or_default(),
            additional_metadata: self.additional_metadata.unwrap_or_default(),
            created_at: self.created_at,
            score: self.score,
            reranker_score: self.reranker_score,
        }
    }
}
