//! Request-level entry point: turns a [`ChatRequest`] into a [`ChatResponse`]
//! and keeps per-conversation transcripts for callers that do not carry
//! history themselves.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::{ChatEngine, ChatRequest, ChatResponse, KeyValue};
use crate::clock::SystemClock;
use crate::config::ChatConfig;
use crate::context::{keys, ConversationContext};
use crate::embeddings::OpenAIEmbeddings;
use crate::error::Result;
use crate::llm::{LLMProvider, SimpleExternalProvider};
use crate::search::{AzureSearchIndex, SearchClient};

/// Returned to the caller in place of a reply when a turn fails. The cause is
/// only logged.
pub const GENERIC_ERROR_MESSAGE: &str = "An error occurred while processing the request.";

/// Output variables echoed back on every response.
const RESPONSE_VARIABLES: [&str; 3] = [keys::LINK, keys::PROMPT, keys::HISTORY];

/// Transcript lines per conversation id.
#[derive(Default)]
pub struct ConversationStore {
    conversations: DashMap<String, Arc<Mutex<Vec<String>>>>,
}

impl ConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle to a conversation's transcript, created on first use.
    pub fn history(&self, conversation_id: &str) -> Arc<Mutex<Vec<String>>> {
        self.conversations
            .entry(conversation_id.to_string())
            .or_default()
            .clone()
    }

    pub fn clear(&self, conversation_id: &str) -> bool {
        self.conversations.remove(conversation_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }
}

pub struct ChatService {
    engine: Arc<ChatEngine>,
    conversations: ConversationStore,
}

impl ChatService {
    pub fn new(engine: Arc<ChatEngine>) -> Self {
        Self {
            engine,
            conversations: ConversationStore::new(),
        }
    }

    /// Build the full production stack: Azure AI Search for transcripts and
    /// an OpenAI-compatible service for completions and, if enabled, query
    /// embeddings.
    pub fn from_config(config: ChatConfig) -> Result<Self> {
        config.validate()?;
        let clock = Arc::new(SystemClock);

        let index = Arc::new(AzureSearchIndex::from_config(&config.search)?);
        let mut search = SearchClient::new(index, clock.clone());
        if config.memory.with_embeddings {
            search = search.with_embeddings(Arc::new(OpenAIEmbeddings::from_config(
                &config.completion,
            )?));
        }

        let llm: Arc<dyn LLMProvider> =
            Arc::new(SimpleExternalProvider::from_config(&config.completion)?);
        let info = llm.info();
        tracing::info!(
            provider = %info.name,
            model = %info.model,
            collections = ?config.memory.collections,
            with_embeddings = config.memory.with_embeddings,
            "Chat service configured"
        );

        let engine = ChatEngine::with_search(
            config.prompts,
            &config.memory,
            llm,
            Arc::new(search),
            clock,
        );
        Ok(Self::new(Arc::new(engine)))
    }

    pub fn engine(&self) -> &ChatEngine {
        &self.engine
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Answer a stateless request. History travels in the request variables;
    /// failures come back as [`GENERIC_ERROR_MESSAGE`] with empty `link` and
    /// `prompt`.
    pub async fn handle(&self, request: ChatRequest, cancel: &CancellationToken) -> ChatResponse {
        let request_id = uuid::Uuid::new_v4();
        let span = tracing::info_span!("chat_request", request_id = %request_id);

        async {
            let mut ctx = request.to_context();
            match self.engine.chat(&request.input, &mut ctx, cancel).await {
                Ok(value) => ChatResponse {
                    value,
                    variables: response_variables(&ctx),
                },
                Err(err) => {
                    tracing::error!(error = %err.description(), "Chat request failed");
                    ctx.set(keys::LINK, "");
                    ctx.set(keys::PROMPT, "");
                    ChatResponse {
                        value: GENERIC_ERROR_MESSAGE.to_string(),
                        variables: response_variables(&ctx),
                    }
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Answer `message` within a stored conversation. The message and reply
    /// are appended to the transcript only when the turn succeeds. Turns on
    /// the same conversation run one at a time.
    pub async fn converse(
        &self,
        conversation_id: &str,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<ChatResponse> {
        let transcript = self.conversations.history(conversation_id);
        let mut lines = transcript.lock().await;

        let mut ctx = ConversationContext::new();
        ctx.set(keys::HISTORY, lines.join("\n"));

        let span = tracing::info_span!("conversation", conversation_id = %conversation_id);
        let value = self
            .engine
            .chat(message, &mut ctx, cancel)
            .instrument(span)
            .await?;

        lines.push(message.to_string());
        lines.push(value.clone());
        Ok(ChatResponse {
            value,
            variables: response_variables(&ctx),
        })
    }
}

fn response_variables(ctx: &ConversationContext) -> Vec<KeyValue> {
    RESPONSE_VARIABLES
        .iter()
        .map(|key| KeyValue::new(*key, ctx.get_or_empty(key)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::config::PromptsConfig;
    use crate::llm::{GenerationConfig, ProviderInfo};
    use crate::memory::Retriever;
    use crate::rag::SortClassifier;
    use crate::types::SortType;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};

    /// Replies with the prompt length, or fails when the prompt mentions
    /// `explode`.
    struct EchoLlm;

    #[async_trait]
    impl LLMProvider for EchoLlm {
        async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> anyhow::Result<String> {
            if prompt.contains("explode") {
                anyhow::bail!("upstream exploded");
            }
            Ok(format!("reply {}", prompt.len()))
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "echo".into(),
                model: "test".into(),
                context_window: 4096,
            }
        }
    }

    struct NoneClassifier;

    #[async_trait]
    impl SortClassifier for NoneClassifier {
        async fn classify(&self, _user_intent: &str) -> Result<SortType> {
            Ok(SortType::None)
        }
    }

    struct EmptyRetriever;

    #[async_trait]
    impl Retriever for EmptyRetriever {
        async fn query_videos(&self, _q: &str, _limit: usize, _sort: SortType) -> Result<String> {
            Ok(String::new())
        }
    }

    fn service() -> ChatService {
        let engine = ChatEngine::new(
            PromptsConfig::default(),
            Arc::new(EchoLlm),
            Arc::new(NoneClassifier),
            Arc::new(EmptyRetriever),
            Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap())),
        );
        ChatService::new(Arc::new(engine))
    }

    #[tokio::test]
    async fn test_handle_returns_variables() {
        let service = service();
        let request = ChatRequest::new("user: hi").with_variable("History", "user: earlier");
        let response = service.handle(request, &CancellationToken::new()).await;

        assert!(response.value.starts_with("reply "));
        assert_eq!(response.variable("History"), Some("user: earlier\nuser: hi"));
        assert_eq!(response.variable("link"), Some(""));
        assert!(!response.variable("prompt").unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_handle_hides_failure_cause() {
        let service = service();
        let response = service
            .handle(ChatRequest::new("user: explode"), &CancellationToken::new())
            .await;

        assert_eq!(response.value, GENERIC_ERROR_MESSAGE);
        assert_eq!(response.variable("prompt"), Some(""));
        assert_eq!(response.variable("link"), Some(""));
    }

    #[tokio::test]
    async fn test_converse_keeps_transcripts_apart() {
        let service = service();
        let cancel = CancellationToken::new();

        service.converse("a", "user: one", &cancel).await.unwrap();
        service.converse("a", "user: two", &cancel).await.unwrap();
        service.converse("b", "user: other", &cancel).await.unwrap();

        let a = service.conversations().history("a");
        let a = a.lock().await;
        assert_eq!(a.len(), 4);
        assert_eq!(a[0], "user: one");
        assert_eq!(a[2], "user: two");

        let b = service.conversations().history("b");
        assert_eq!(b.lock().await.len(), 2);
        assert_eq!(service.conversations().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_turn_leaves_transcript_unchanged() {
        let service = service();
        let cancel = CancellationToken::new();
        service.converse("c", "user: fine", &cancel).await.unwrap();

        assert!(service.converse("c", "user: explode", &cancel).await.is_err());
        let c = service.conversations().history("c");
        assert_eq!(c.lock().await.len(), 2);

        assert!(service.conversations().clear("c"));
        assert!(!service.conversations().clear("c"));
    }
}
