pub mod chat;
pub mod clock;
pub mod config;
pub mod context;
pub mod embeddings;
pub mod error;
pub mod llm;
pub mod memory;
pub mod rag;
pub mod search;
pub mod templates;
pub mod types;

// Re-export primary types for convenience
pub use chat::{ChatEngine, ChatRequest, ChatResponse, ChatService, KeyValue};
pub use config::ChatConfig;
pub use context::ConversationContext;
pub use error::{ChatError, IndexError};
pub use types::{MemoryQueryResult, SortType};

// Re-export LLM types
pub use llm::{ApiProvider, GenerationConfig, LLMProvider, ProviderInfo, SimpleExternalProvider};

// Re-export search types
pub use search::{AzureSearchIndex, LocalTextIndex, SearchClient, SearchIndex, TranscriptDocument};

pub use tokio_util::sync::CancellationToken;
pub use uuid::Uuid;
