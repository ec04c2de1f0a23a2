//! Error taxonomy for the chat pipeline.
//!
//! Service clients (completion, embeddings) speak `anyhow` internally; the
//! pipeline converts their failures into [`ChatError`] at the step where they
//! happen so callers can tell a broken collection from a failed completion.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    /// Missing endpoint/key, invalid collection name, bad token limits.
    /// Raised at construction time and never retried.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Index unreachable, authentication failure, embedding generation failed.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// Completion service failure, with whatever detail the service supplied.
    #[error("completion failed: {message}")]
    Completion {
        message: String,
        detail: Option<String>,
    },

    #[error("request cancelled")]
    Cancelled,
}

impl ChatError {
    /// Wrap an `anyhow` chain from a completion provider. The outermost
    /// context becomes the message, the remaining chain the detail.
    pub fn completion(err: anyhow::Error) -> Self {
        let message = err.to_string();
        let detail: Vec<String> = err.chain().skip(1).map(|c| c.to_string()).collect();
        ChatError::Completion {
            message,
            detail: if detail.is_empty() {
                None
            } else {
                Some(detail.join(": "))
            },
        }
    }

    pub fn retrieval(err: anyhow::Error) -> Self {
        ChatError::Retrieval(format!("{:#}", err))
    }

    /// Full description including detail, used when recording a failure on a
    /// conversation context.
    pub fn description(&self) -> String {
        match self {
            ChatError::Completion {
                message,
                detail: Some(detail),
            } => format!("completion failed: {}: {}", message, detail),
            other => other.to_string(),
        }
    }
}

/// Failures reported by a [`crate::search::SearchIndex`] backend.
#[derive(Debug, Error)]
pub enum IndexError {
    /// The collection does not exist (yet). Tolerated by the search client.
    #[error("collection not found: {0}")]
    CollectionNotFound(String),

    #[error("search request failed: {0}")]
    Request(String),

    #[error("search service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("failed to decode search response: {0}")]
    Decode(String),

    #[error("local index error: {0}")]
    Local(String),
}

impl From<IndexError> for ChatError {
    fn from(err: IndexError) -> Self {
        ChatError::Retrieval(err.to_string())
    }
}

impl From<tantivy::TantivyError> for IndexError {
    fn from(err: tantivy::TantivyError) -> Self {
        IndexError::Local(err.to_string())
    }
}

pub type Result<T, E = ChatError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_completion_error_keeps_cause_chain() {
        let inner: anyhow::Result<()> = Err(anyhow::anyhow!("HTTP 429: rate limited"));
        let err = inner.context("chat completion request failed").unwrap_err();
        let chat_err = ChatError::completion(err);

        match &chat_err {
            ChatError::Completion { message, detail } => {
                assert_eq!(message, "chat completion request failed");
                assert_eq!(detail.as_deref(), Some("HTTP 429: rate limited"));
            }
            other => panic!("unexpected variant: {:?}", other),
        }
        assert!(chat_err.description().contains("rate limited"));
    }

    #[test]
    fn test_index_error_maps_to_retrieval() {
        let err: ChatError = IndexError::Status {
            status: 403,
            body: "forbidden".into(),
        }
        .into();
        assert!(matches!(err, ChatError::Retrieval(ref m) if m.contains("403")));
    }
}
