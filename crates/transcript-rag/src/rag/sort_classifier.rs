//! Recency classifier
//!
//! One short completion decides whether the user cares about recent videos
//! and, if so, how recent. Anything the model says that is not a known
//! window name falls back to [`SortType::None`].

use async_trait::async_trait;
use std::sync::Arc;

use crate::clock::Clock;
use crate::context::ConversationContext;
use crate::error::{ChatError, Result};
use crate::llm::{GenerationConfig, LLMProvider};
use crate::templates::{render_template, RenderOptions};
use crate::types::SortType;

// ---------------------------------------------------------------------------
// Prompt
// ---------------------------------------------------------------------------

const SORT_PROMPT: &str = r#"Today is {{$date}}. Decide how recent the YouTube videos used to answer the request below should be.

Answer with exactly one word:
- RECENT if the user asks for the latest, newest or recent videos or news
- MONTH if the user asks about this month, the past few weeks or the last month
- YEAR if the user asks about this year or the past year
- NONE if the request does not depend on when a video was published

Request: {{$query}}
Answer:"#;

fn build_sort_prompt(user_intent: &str, options: &RenderOptions) -> String {
    let ctx = ConversationContext::from_variables([
        ("query", user_intent.to_string()),
        ("date", options.now.format("%Y-%m-%d").to_string()),
    ]);
    render_template(SORT_PROMPT, &ctx, options)
}

// ---------------------------------------------------------------------------
// Response Parsing
// ---------------------------------------------------------------------------

/// Lenient parse: trims whitespace and punctuation, ignores case.
pub fn parse_sort_type(raw: &str) -> SortType {
    let cleaned = raw
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .trim();
    match cleaned.parse::<SortType>() {
        Ok(sort_type) => sort_type,
        Err(_) => {
            tracing::debug!(raw = %raw, "Unrecognized sort type, using NONE");
            SortType::None
        }
    }
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

#[async_trait]
pub trait SortClassifier: Send + Sync {
    /// Recency window for `user_intent`. An unreadable answer is
    /// [`SortType::None`]; a failed completion is an error.
    async fn classify(&self, user_intent: &str) -> Result<SortType>;
}

pub struct CompletionSortClassifier {
    llm: Arc<dyn LLMProvider>,
    clock: Arc<dyn Clock>,
}

impl CompletionSortClassifier {
    pub fn new(llm: Arc<dyn LLMProvider>, clock: Arc<dyn Clock>) -> Self {
        Self { llm, clock }
    }
}

#[async_trait]
impl SortClassifier for CompletionSortClassifier {
    async fn classify(&self, user_intent: &str) -> Result<SortType> {
        let options = RenderOptions {
            now: self.clock.now(),
            history_truncation: Default::default(),
        };
        let prompt = build_sort_prompt(user_intent, &options);

        let raw = self
            .llm
            .generate(&prompt, &GenerationConfig::for_classification())
            .await
            .map_err(ChatError::completion)?;

        let sort_type = parse_sort_type(&raw);
        tracing::info!(sort_type = %sort_type, "Sort type classified");
        Ok(sort_type)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::llm::ProviderInfo;
    use chrono::{TimeZone, Utc};
    use parking_lot::Mutex;

    struct ScriptedLlm {
        reply: anyhow::Result<String>,
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LLMProvider for ScriptedLlm {
        async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> anyhow::Result<String> {
            self.prompts.lock().push(prompt.to_string());
            match &self.reply {
                Ok(text) => Ok(text.clone()),
                Err(e) => Err(anyhow::anyhow!("{}", e)),
            }
        }

        fn info(&self) -> ProviderInfo {
            ProviderInfo {
                name: "scripted".into(),
                model: "test".into(),
                context_window: 4096,
            }
        }
    }

    fn classifier(reply: anyhow::Result<String>) -> (CompletionSortClassifier, Arc<ScriptedLlm>) {
        let llm = Arc::new(ScriptedLlm {
            reply,
            prompts: Mutex::new(Vec::new()),
        });
        let clock = Arc::new(FixedClock(Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap()));
        (CompletionSortClassifier::new(llm.clone(), clock), llm)
    }

    #[test]
    fn test_parse_known_values() {
        assert_eq!(parse_sort_type("MONTH"), SortType::Month);
        assert_eq!(parse_sort_type(" recent.\n"), SortType::Recent);
        assert_eq!(parse_sort_type("\"Year\""), SortType::Year);
        assert_eq!(parse_sort_type("NONE"), SortType::None);
    }

    #[test]
    fn test_parse_garbage_defaults_to_none() {
        assert_eq!(parse_sort_type(""), SortType::None);
        assert_eq!(parse_sort_type("last week"), SortType::None);
        assert_eq!(parse_sort_type("MONTHLY"), SortType::None);
    }

    #[tokio::test]
    async fn test_prompt_carries_query_and_date() {
        let (classifier, llm) = classifier(Ok("MONTH".into()));
        let sort = classifier
            .classify("User intent: latest rust videos")
            .await
            .unwrap();
        assert_eq!(sort, SortType::Month);

        let prompts = llm.prompts.lock();
        assert!(prompts[0].starts_with("Today is 2024-06-01."));
        assert!(prompts[0].contains("Request: User intent: latest rust videos"));
    }

    #[tokio::test]
    async fn test_completion_error_propagates() {
        let (classifier, _) = classifier(Err(anyhow::anyhow!("Request to https://x timed out")));
        let err = classifier.classify("anything").await.unwrap_err();
        match err {
            ChatError::Completion { message, .. } => assert!(message.contains("timed out")),
            other => panic!("expected completion error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_unreadable_answer_is_none() {
        let (classifier, _) = classifier(Ok("I think the user wants old videos".into()));
        assert_eq!(classifier.classify("anything").await.unwrap(), SortType::None);
    }
}
