//! Splits the prompt budget between retrieved transcripts and chat history.

use std::sync::Arc;

use crate::config::PromptsConfig;
use crate::context::{keys, ConversationContext};
use crate::error::Result;
use crate::llm::token_count;
use crate::memory::Retriever;
use crate::rag::SortClassifier;
use crate::templates::fit_history;

pub struct ContextBuilder {
    prompts: Arc<PromptsConfig>,
    classifier: Arc<dyn SortClassifier>,
    retriever: Arc<dyn Retriever>,
}

impl ContextBuilder {
    pub fn new(
        prompts: Arc<PromptsConfig>,
        classifier: Arc<dyn SortClassifier>,
        retriever: Arc<dyn Retriever>,
    ) -> Self {
        Self {
            prompts,
            classifier,
            retriever,
        }
    }

    /// Tokens available for documents plus history, after the response
    /// reserve, the fixed chat segments and the intent itself. May be negative.
    pub fn remaining_budget(&self, user_intent: &str) -> i64 {
        self.prompts.completion_token_limit as i64
            - token_count(user_intent) as i64
            - self.prompts.response_token_limit as i64
            - token_count(&self.prompts.chat_fixed_segments()) as i64
    }

    pub async fn build_context(
        &self,
        ctx: &ConversationContext,
        user_intent: &str,
    ) -> Result<String> {
        let remaining = self.remaining_budget(user_intent);
        if remaining <= 0 {
            tracing::warn!(remaining, "No token budget left for chat context");
            return Ok(String::new());
        }

        let document_budget =
            (remaining as f64 * self.prompts.document_context_weight).floor() as usize;
        tracing::debug!(remaining, document_budget, "Chat context budget");

        let documents = if document_budget > 0 {
            let sort_type = self.classifier.classify(user_intent).await?;
            self.retriever
                .query_videos(user_intent, document_budget, sort_type)
                .await?
        } else {
            String::new()
        };

        let mut segments = Vec::with_capacity(2);
        if !documents.is_empty() {
            segments.push(documents);
        }

        let leftover = remaining - token_count(&segments.join("\n\n")) as i64;
        if leftover > 0 {
            let history = fit_history(
                ctx.get_or_empty(keys::HISTORY),
                leftover as usize,
                self.prompts.history_truncation,
            );
            if !history.is_empty() {
                segments.push(history);
            }
        }

        Ok(segments.join("\n\n"))
    }
}
