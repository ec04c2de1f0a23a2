use std::sync::Arc;

use crate::clock::Clock;
use crate::config::PromptsConfig;
use crate::context::{keys, ConversationContext};
use crate::error::{ChatError, Result};
use crate::llm::{token_count, GenerationConfig, LLMProvider};
use crate::templates::{PromptTemplate, RenderOptions};

pub const USER_INTENT_PREFIX: &str = "User intent: ";

/// Rewrites the latest message into a standalone statement of what the user
/// wants, using as much history as the intent budget allows.
pub struct IntentExtractor {
    prompts: Arc<PromptsConfig>,
    template: PromptTemplate,
    llm: Arc<dyn LLMProvider>,
    clock: Arc<dyn Clock>,
}

impl IntentExtractor {
    pub fn new(
        prompts: Arc<PromptsConfig>,
        llm: Arc<dyn LLMProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let template = PromptTemplate::parse(&prompts.intent_extraction_template());
        Self {
            prompts,
            template,
            llm,
            clock,
        }
    }

    /// Tokens left for history once the fixed intent segments and the
    /// response reserve are taken out. Never negative.
    pub fn history_budget(&self) -> usize {
        let fixed = token_count(&self.prompts.intent_fixed_segments());
        self.prompts
            .completion_token_limit
            .saturating_sub(self.prompts.response_token_limit)
            .saturating_sub(fixed)
    }

    pub fn render_prompt(&self, ctx: &ConversationContext) -> String {
        let mut child = ctx.derive();
        child.set(keys::TOKEN_LIMIT, self.history_budget().to_string());
        child.set(keys::KNOWLEDGE_CUTOFF, self.prompts.knowledge_cutoff_date.as_str());
        let options = RenderOptions {
            now: self.clock.now(),
            history_truncation: self.prompts.history_truncation,
        };
        self.template.render(&child, &options)
    }

    pub async fn extract_intent(&self, ctx: &ConversationContext) -> Result<String> {
        let prompt = self.render_prompt(ctx);
        tracing::debug!(
            budget = self.history_budget(),
            prompt_tokens = token_count(&prompt),
            "Extracting user intent"
        );

        let result = self
            .llm
            .generate(&prompt, &GenerationConfig::for_intent(&self.prompts))
            .await
            .map_err(ChatError::completion)?;

        Ok(format!("{}{}", USER_INTENT_PREFIX, result.trim()))
    }
}
