//! Transcript memory: turns search hits into a token-budgeted prompt section.

use async_trait::async_trait;
use futures::StreamExt;
use std::sync::Arc;

use crate::error::Result;
use crate::llm::tokenizer::token_count;
use crate::search::SearchClient;
use crate::types::{MemoryQueryResult, SortType};

pub const SNIPPETS_HEADER: &str = "Here are relevant YouTube snippets and IDs:";
pub const SNIPPET_PREFIX: &str = "Transcript from YouTube ID:";

/// Something that can supply retrieved text for a query under a token budget.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn query_videos(
        &self,
        query: &str,
        token_limit: usize,
        sort_type: SortType,
    ) -> Result<String>;
}

pub struct TranscriptMemory {
    search: Arc<SearchClient>,
    collections: Vec<String>,
    with_embeddings: bool,
}

impl TranscriptMemory {
    pub fn new(search: Arc<SearchClient>, collections: Vec<String>, with_embeddings: bool) -> Self {
        Self {
            search,
            collections,
            with_embeddings,
        }
    }

    async fn collect(&self, query: &str, sort_type: SortType) -> Result<Vec<MemoryQueryResult>> {
        let mut results = Vec::new();
        for collection in &self.collections {
            let stream = self
                .search
                .search(collection, query, sort_type, self.with_embeddings)
                .await?;
            results.extend(stream.collect::<Vec<_>>().await);
        }
        Ok(results)
    }
}

#[async_trait]
impl Retriever for TranscriptMemory {
    async fn query_videos(
        &self,
        query: &str,
        token_limit: usize,
        sort_type: SortType,
    ) -> Result<String> {
        if token_limit == 0 {
            return Ok(String::new());
        }

        let mut results = self.collect(query, sort_type).await?;
        // Stable, so equal relevance keeps index order.
        results.sort_by(|a, b| {
            b.relevance
                .partial_cmp(&a.relevance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let (text, used) = fit_snippets(&results, token_limit);
        tracing::info!(
            sort_type = %sort_type,
            candidates = results.len(),
            snippets = used,
            budget = token_limit,
            "Retrieved transcript snippets"
        );
        Ok(text)
    }
}

pub fn format_snippet(result: &MemoryQueryResult) -> String {
    format!("{} {}: {}", SNIPPET_PREFIX, result.id, result.text)
}

/// Greedily take snippets in order while each fits the remaining budget.
/// Returns the rendered section and how many snippets it holds.
///
/// Only the snippets are charged against `token_limit`. The header and the
/// blank-line separators sit outside it, so the section can run a few tokens
/// over.
pub fn fit_snippets(results: &[MemoryQueryResult], token_limit: usize) -> (String, usize) {
    let mut remaining = token_limit;
    let mut snippets = Vec::new();
    for result in results {
        let snippet = format_snippet(result);
        let cost = token_count(&snippet);
        if cost > remaining {
            break;
        }
        remaining -= cost;
        snippets.push(snippet);
    }

    if snippets.is_empty() {
        return (String::new(), 0);
    }
    let count = snippets.len();
    (format!("{}\n\n{}", SNIPPETS_HEADER, snippets.join("\n\n")), count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::error::IndexError;
    use crate::search::{IndexHit, IndexResponse, SearchIndex, SearchRequest};
    use chrono::Utc;
    use std::collections::HashMap;

    fn result(id: &str, text: &str, relevance: f64) -> MemoryQueryResult {
        MemoryQueryResult {
            id: id.to_string(),
            text: text.to_string(),
            description: String::new(),
            external_source_name: String::new(),
            additional_metadata: String::new(),
            relevance,
            created_at: None,
        }
    }

    #[test]
    fn test_fit_snippets_stops_at_first_overflow() {
        let results = vec![
            result("a-00_00_01", "short", 1.0),
            result("b-00_00_02", &"very long text ".repeat(50), 1.0),
            result("c-00_00_03", "short", 1.0),
        ];
        let first_cost = token_count(&format_snippet(&results[0]));

        let (text, used) = fit_snippets(&results, first_cost + 5);
        assert_eq!(used, 1);
        assert!(text.starts_with(SNIPPETS_HEADER));
        assert!(text.contains("a-00_00_01"));
        assert!(!text.contains("c-00_00_03"));
    }

    #[test]
    fn test_fit_snippets_includes_exact_fit() {
        let results = vec![result("a-00_00_01", "exact budget", 1.0)];
        let cost = token_count(&format_snippet(&results[0]));
        let (text, used) = fit_snippets(&results, cost);
        assert_eq!(used, 1);
        // Header and separator are not charged.
        assert!(token_count(&text) > cost);
        assert!(text.ends_with(&format_snippet(&results[0])));
        assert_eq!(fit_snippets(&results, cost - 1), (String::new(), 0));
    }

    #[test]
    fn test_snippet_sum_never_exceeds_budget() {
        let results: Vec<_> = (0..20)
            .map(|i| result(&format!("v{}-00_00_{:02}", i, i), "some words of transcript", 1.0))
            .collect();
        for budget in [0, 10, 37, 120, 1000] {
            let (text, used) = fit_snippets(&results, budget);
            let sum: usize = results[..used].iter().map(|r| token_count(&format_snippet(r))).sum();
            assert!(sum <= budget);
            assert_eq!(text.is_empty(), used == 0);
        }
    }

    struct CollectionsIndex(HashMap<String, Vec<IndexHit>>);

    #[async_trait]
    impl SearchIndex for CollectionsIndex {
        async fn search(
            &self,
            collection: &str,
            _request: &SearchRequest,
        ) -> std::result::Result<IndexResponse, IndexError> {
            let hits = self
                .0
                .get(collection)
                .cloned()
                .ok_or_else(|| IndexError::CollectionNotFound(collection.to_string()))?;
            Ok(IndexResponse {
                total_count: Some(hits.len()),
                hits,
            })
        }
    }

    fn hit(id: &str, score: Option<f64>) -> IndexHit {
        IndexHit {
            id: id.to_string(),
            text: format!("text of {}", id),
            reranker_score: score,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_merges_collections_by_relevance() {
        let mut map = HashMap::new();
        map.insert("first".to_string(), vec![hit("low-00_00_01", Some(0.5))]);
        map.insert(
            "second".to_string(),
            vec![hit("high-00_00_02", Some(3.0)), hit("mid-00_00_03", Some(2.0))],
        );
        let search = SearchClient::new(
            Arc::new(CollectionsIndex(map)),
            Arc::new(FixedClock(Utc::now())),
        );
        let memory = TranscriptMemory::new(
            Arc::new(search),
            vec!["first".into(), "missing".into(), "second".into()],
            false,
        );

        let text = memory.query_videos("rust", 1000, SortType::None).await.unwrap();
        let high = text.find("high-00_00_02").unwrap();
        let mid = text.find("mid-00_00_03").unwrap();
        let low = text.find("low-00_00_01").unwrap();
        assert!(high < mid && mid < low);
        assert!(text.contains("\n\nTranscript from YouTube ID: high-00_00_02: text of high-00_00_02"));
    }

    #[tokio::test]
    async fn test_no_results_is_empty() {
        let search = SearchClient::new(
            Arc::new(CollectionsIndex(HashMap::new())),
            Arc::new(FixedClock(Utc::now())),
        );
        let memory = TranscriptMemory::new(Arc::new(search), vec!["embeddings".into()], false);
        assert_eq!(memory.query_videos("rust", 500, SortType::Month).await.unwrap(), "");
    }
}
