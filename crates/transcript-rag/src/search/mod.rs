pub mod azure;
pub mod client;
pub mod text_search;

pub use azure::AzureSearchIndex;
pub use client::SearchClient;
pub use text_search::{LocalTextIndex, TranscriptDocument};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::error::IndexError;

/// Fields returned for every hit.
pub const SELECT_FIELDS: [&str; 5] = ["Text", "Description", "ExternalSourceName", "Id", "CreatedAt"];

/// Nearest neighbours requested by the vector clause.
pub const VECTOR_K: usize = 5;
pub const VECTOR_FIELD: &str = "Vector";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorQuery {
    pub vector: Vec<f32>,
    pub k: usize,
    pub field: String,
}

/// Backend-neutral query built by [`SearchClient`].
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    pub select: Vec<String>,
    /// Only documents with `CreatedAt >= created_after`.
    pub created_after: Option<DateTime<Utc>>,
    pub size: usize,
    pub vector: Option<VectorQuery>,
}

impl SearchRequest {
    /// OData expression for the date filter, e.g. `CreatedAt ge 2024-05-04T12:00:00Z`.
    pub fn odata_filter(&self) -> Option<String> {
        self.created_after.map(|after| {
            format!(
                "CreatedAt ge {}",
                after.to_rfc3339_opts(SecondsFormat::Secs, true)
            )
        })
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexResponse {
    /// Total matches as reported by the index, when it reports one.
    pub total_count: Option<usize>,
    pub hits: Vec<IndexHit>,
}

impl IndexResponse {
    /// Count used for the re-sort threshold.
    pub fn raw_count(&self) -> usize {
        self.total_count.unwrap_or(self.hits.len())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct IndexHit {
    pub id: String,
    pub text: String,
    pub description: String,
    pub external_source_name: String,
    pub additional_metadata: String,
    pub created_at: Option<DateTime<Utc>>,
    pub score: f64,
    pub reranker_score: Option<f64>,
}

/// A searchable store of transcript collections.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn search(
        &self,
        collection: &str,
        request: &SearchRequest,
    ) -> Result<IndexResponse, IndexError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_odata_filter_format() {
        let request = SearchRequest {
            query: "q".into(),
            select: vec![],
            created_after: Some(Utc.with_ymd_and_hms(2024, 5, 4, 12, 0, 0).unwrap()),
            size: 25,
            vector: None,
        };
        assert_eq!(
            request.odata_filter().as_deref(),
            Some("CreatedAt ge 2024-05-04T12:00:00Z")
        );
    }

    #[test]
    fn test_raw_count_prefers_total() {
        let response = IndexResponse {
            total_count: Some(40),
            hits: vec![IndexHit::default(); 3],
        };
        assert_eq!(response.raw_count(), 40);
        assert_eq!(IndexResponse { total_count: None, ..response }.raw_count(), 3);
    }
}
