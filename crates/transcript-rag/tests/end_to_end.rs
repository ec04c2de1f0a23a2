//! Full chat turns against a local Tantivy index and a scripted model.

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;

use transcript_rag::clock::FixedClock;
use transcript_rag::config::{MemoryConfig, PromptsConfig};
use transcript_rag::context::keys;
use transcript_rag::{
    CancellationToken, ChatEngine, ChatRequest, ChatService, ConversationContext,
    GenerationConfig, LLMProvider, LocalTextIndex, ProviderInfo, SearchClient,
    TranscriptDocument,
};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

/// Answers by prompt kind: intent rewrite, recency classification or the
/// final response.
struct ScriptedModel {
    sort_answer: &'static str,
    response: &'static str,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedModel {
    fn new(sort_answer: &'static str, response: &'static str) -> Arc<Self> {
        Arc::new(Self {
            sort_answer,
            response,
            prompts: Mutex::new(Vec::new()),
        })
    }

    fn response_prompt(&self) -> String {
        self.prompts
            .lock()
            .iter()
            .find(|p| p.contains("SINGLE RESPONSE FROM BOT TO USER"))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl LLMProvider for ScriptedModel {
    async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> anyhow::Result<String> {
        self.prompts.lock().push(prompt.to_string());
        if prompt.contains("REWRITTEN INTENT WITH EMBEDDED CONTEXT") {
            Ok(" the user wants recent videos about the tokio runtime ".to_string())
        } else if prompt.contains("Answer with exactly one word") {
            Ok(self.sort_answer.to_string())
        } else if prompt.contains("SINGLE RESPONSE FROM BOT TO USER") {
            Ok(self.response.to_string())
        } else {
            anyhow::bail!("unexpected prompt")
        }
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            name: "scripted".into(),
            model: "e2e".into(),
            context_window: 4096,
        }
    }
}

fn snippet(id: &str, text: &str, age_days: i64) -> TranscriptDocument {
    TranscriptDocument {
        id: id.to_string(),
        text: text.to_string(),
        description: "Rust async talks".to_string(),
        external_source_name: "youtube".to_string(),
        additional_metadata: String::new(),
        created_at: Some(now() - Duration::days(age_days)),
    }
}

fn seeded_index() -> Arc<LocalTextIndex> {
    let index = LocalTextIndex::in_memory();
    index
        .add_documents(
            "transcripts",
            &[
                snippet("newvid-00_01_30", "how the tokio runtime schedules tasks", 5),
                snippet("midvid-00_10_00", "tokio runtime worker threads explained", 10),
                snippet("oldvid-00_00_05", "the first tokio runtime design", 730),
            ],
        )
        .unwrap();
    Arc::new(index)
}

fn engine(model: Arc<ScriptedModel>, collections: Vec<String>) -> ChatEngine {
    let clock = Arc::new(FixedClock(now()));
    let search = Arc::new(SearchClient::new(seeded_index(), clock.clone()));
    let memory = MemoryConfig {
        collections,
        with_embeddings: false,
    };
    ChatEngine::with_search(PromptsConfig::default(), &memory, model, search, clock)
}

#[tokio::test]
async fn test_month_window_excludes_old_videos() {
    let model = ScriptedModel::new("MONTH", "The newvid talk covers scheduling.");
    let engine = engine(model.clone(), vec!["transcripts".to_string()]);
    let mut ctx = ConversationContext::from_variables([(keys::HISTORY, "user: hi\nbot: hello")]);

    let text = engine
        .chat("user: anything recent on the tokio runtime?", &mut ctx, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(
        text,
        r#"The <a target="_blank" href="https://www.youtube.com/v/newvid?start=90">newvid</a> talk covers scheduling."#
    );
    assert_eq!(ctx.get(keys::LINK), Some("https://www.youtube.com/embed/newvid?start=90"));

    let chat_context = ctx.get(keys::CHAT_CONTEXT).unwrap();
    assert!(chat_context.starts_with("Here are relevant YouTube snippets and IDs:"));
    assert!(chat_context.contains("Transcript from YouTube ID: newvid-00_01_30"));
    assert!(chat_context.contains("Transcript from YouTube ID: midvid-00_10_00"));
    assert!(!chat_context.contains("oldvid"));
    assert!(!model.response_prompt().contains("oldvid"));
    assert_eq!(
        ctx.get(keys::USER_INTENT),
        Some("User intent: the user wants recent videos about the tokio runtime")
    );
}

#[tokio::test]
async fn test_unmentioned_ids_fall_back_to_leading_links() {
    let model = ScriptedModel::new("NONE", "Here is what I found.");
    let engine = engine(model, vec!["transcripts".to_string()]);
    let mut ctx = ConversationContext::new();

    let text = engine
        .chat("user: tokio runtime?", &mut ctx, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(text, "Here is what I found.");
    let links: Vec<&str> = ctx.get(keys::LINK).unwrap().lines().collect();
    assert_eq!(links.len(), 3);
    assert!(links.iter().all(|l| l.starts_with("https://www.youtube.com/embed/")));
    assert!(links.contains(&"https://www.youtube.com/embed/oldvid?start=5"));
}

#[tokio::test]
async fn test_missing_collection_is_tolerated() {
    let model = ScriptedModel::new("NONE", "See midvid.");
    let engine = engine(
        model,
        vec!["not-indexed-yet".to_string(), "transcripts".to_string()],
    );
    let service = ChatService::new(Arc::new(engine));

    let response = service
        .handle(
            ChatRequest::new("user: worker threads?").with_variable("History", "user: hi"),
            &CancellationToken::new(),
        )
        .await;

    assert_eq!(
        response.value,
        r#"See <a target="_blank" href="https://www.youtube.com/v/midvid?start=600">midvid</a>."#
    );
    assert_eq!(
        response.variable("link"),
        Some("https://www.youtube.com/embed/midvid?start=600")
    );
    assert_eq!(response.variable("History"), Some("user: hi\nuser: worker threads?"));
}
