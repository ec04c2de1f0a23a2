//! Time-windowed transcript search on top of a [`SearchIndex`].

use futures::stream::{self, BoxStream, StreamExt};
use std::sync::Arc;

use super::{IndexHit, SearchIndex, SearchRequest, VectorQuery, SELECT_FIELDS, VECTOR_FIELD, VECTOR_K};
use crate::clock::Clock;
use crate::embeddings::EmbeddingModel;
use crate::error::{ChatError, IndexError, Result};
use crate::types::{MemoryQueryResult, SortType};

/// Results at or below this count are yielded in index order; above it they
/// are re-sorted newest first and cut to this size.
pub const RESORT_THRESHOLD: usize = 10;

pub struct SearchClient {
    index: Arc<dyn SearchIndex>,
    embeddings: Option<Arc<dyn EmbeddingModel>>,
    clock: Arc<dyn Clock>,
}

impl SearchClient {
    pub fn new(index: Arc<dyn SearchIndex>, clock: Arc<dyn Clock>) -> Self {
        Self {
            index,
            embeddings: None,
            clock,
        }
    }

    pub fn with_embeddings(mut self, embeddings: Arc<dyn EmbeddingModel>) -> Self {
        self.embeddings = Some(embeddings);
        self
    }

    pub fn build_request(
        &self,
        query: &str,
        sort_type: SortType,
        vector: Option<Vec<f32>>,
    ) -> SearchRequest {
        SearchRequest {
            query: query.to_string(),
            select: SELECT_FIELDS.iter().map(|f| f.to_string()).collect(),
            created_after: sort_type.created_after(self.clock.now()),
            size: sort_type.size_cap(),
            vector: vector.map(|vector| VectorQuery {
                vector,
                k: VECTOR_K,
                field: VECTOR_FIELD.to_string(),
            }),
        }
    }

    /// Search one collection. A collection that does not exist yields an
    /// empty stream.
    pub async fn search(
        &self,
        collection: &str,
        query: &str,
        sort_type: SortType,
        with_embeddings: bool,
    ) -> Result<BoxStream<'static, MemoryQueryResult>> {
        if collection.trim().is_empty() {
            return Err(ChatError::Configuration("collection name is empty".into()));
        }
        if query.trim().is_empty() {
            return Err(ChatError::Configuration("search query is empty".into()));
        }

        let vector = if with_embeddings {
            let embeddings = self.embeddings.as_ref().ok_or_else(|| {
                ChatError::Configuration(
                    "embedding search requested but no embedding model is configured".into(),
                )
            })?;
            Some(
                embeddings
                    .embed_query(query)
                    .await
                    .map_err(ChatError::retrieval)?,
            )
        } else {
            None
        };

        let request = self.build_request(query, sort_type, vector);
        tracing::debug!(
            collection = %collection,
            sort_type = %sort_type,
            size = request.size,
            filter = ?request.odata_filter(),
            vector = request.vector.is_some(),
            "Searching collection"
        );

        let response = match self.index.search(collection, &request).await {
            Ok(response) => response,
            Err(IndexError::CollectionNotFound(name)) => {
                tracing::warn!(collection = %name, "Collection not found, skipping");
                return Ok(stream::empty().boxed());
            }
            Err(err) => return Err(err.into()),
        };

        let raw_count = response.raw_count();
        let mut hits = response.hits;
        if raw_count > RESORT_THRESHOLD {
            sort_newest_first(&mut hits);
            hits.truncate(RESORT_THRESHOLD);
        }
        tracing::debug!(collection = %collection, raw_count, yielded = hits.len(), "Search complete");

        Ok(stream::iter(hits.into_iter().map(to_memory_result)).boxed())
    }
}

/// Stable sort by `created_at` descending; undated hits go last.
fn sort_newest_first(hits: &mut [IndexHit]) {
    hits.sort_by(|a, b| match (a.created_at, b.created_at) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => std::cmp::Ordering::Less,
        (None, Some(_)) => std::cmp::Ordering::Greater,
        (None, None) => std::cmp::Ordering::Equal,
    });
}

fn to_memory_result(hit: IndexHit) -> MemoryQueryResult {
    MemoryQueryResult {
        id: hit.id,
        text: hit.text,
        description: hit.description,
        external_source_name: hit.external_source_name,
        additional_metadata: hit.additional_metadata,
        relevance: hit.reranker_score.unwrap_or(1.0),
        created_at: hit.created_at,
    }
}
