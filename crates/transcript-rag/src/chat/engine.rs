use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::context_builder::ContextBuilder;
use super::intent::IntentExtractor;
use super::links::{extract_links, replace_links};
use crate::clock::Clock;
use crate::config::{MemoryConfig, PromptsConfig};
use crate::context::{keys, ConversationContext};
use crate::error::{ChatError, Result};
use crate::llm::{token_count, GenerationConfig, LLMProvider};
use crate::memory::{Retriever, TranscriptMemory};
use crate::rag::{CompletionSortClassifier, SortClassifier};
use crate::search::SearchClient;
use crate::templates::{PromptTemplate, RenderOptions};

/// Steps of one chat turn, in order. `Errored` can follow any of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatState {
    Start,
    HistoryUpdated,
    IntentExtracted,
    ContextBuilt,
    PromptRendered,
    Completed,
    LinksExtracted,
    Done,
    Errored,
}

/// Variables a finished turn writes back to the caller's context.
const TURN_OUTPUTS: [&str; 5] = [
    keys::USER_INTENT,
    keys::CHAT_CONTEXT,
    keys::PROMPT,
    keys::LINK,
    keys::INPUT,
];

pub struct ChatEngine {
    prompts: Arc<PromptsConfig>,
    llm: Arc<dyn LLMProvider>,
    intent: IntentExtractor,
    context: ContextBuilder,
    chat_template: PromptTemplate,
    clock: Arc<dyn Clock>,
}

impl ChatEngine {
    pub fn new(
        prompts: PromptsConfig,
        llm: Arc<dyn LLMProvider>,
        classifier: Arc<dyn SortClassifier>,
        retriever: Arc<dyn Retriever>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let prompts = Arc::new(prompts);
        let chat_template = PromptTemplate::parse(&prompts.chat_template());
        Self {
            intent: IntentExtractor::new(prompts.clone(), llm.clone(), clock.clone()),
            context: ContextBuilder::new(prompts.clone(), classifier, retriever),
            prompts,
            llm,
            chat_template,
            clock,
        }
    }

    /// Wire the engine to a search client: the same model classifies
    /// recency, and transcripts come from the configured collections.
    pub fn with_search(
        prompts: PromptsConfig,
        memory: &MemoryConfig,
        llm: Arc<dyn LLMProvider>,
        search: Arc<SearchClient>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let classifier = Arc::new(CompletionSortClassifier::new(llm.clone(), clock.clone()));
        let retriever = Arc::new(TranscriptMemory::new(
            search,
            memory.collections.clone(),
            memory.with_embeddings,
        ));
        Self::new(prompts, llm, classifier, retriever, clock)
    }

    pub fn prompts(&self) -> &PromptsConfig {
        &self.prompts
    }

    /// Run one chat turn for `message`.
    ///
    /// `History` always gets the message appended. Everything else the turn
    /// produces (`userIntent`, `chatContext`, `prompt`, `link`, `input`) is
    /// written to `ctx` only once the turn succeeds. On failure the cause is
    /// recorded with [`ConversationContext::fail`] and returned.
    pub async fn chat(
        &self,
        message: &str,
        ctx: &mut ConversationContext,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let mut state = ChatState::Start;

        let history = ctx.get_or_empty(keys::HISTORY).to_string();
        ctx.set(keys::HISTORY, format!("{}\n{}", history, message));
        advance(&mut state, ChatState::HistoryUpdated);

        match self.run_turn(ctx, cancel, &mut state).await {
            Ok(text) => Ok(text),
            Err(err) => {
                tracing::warn!(step = ?state, error = %err.description(), "Chat turn failed");
                advance(&mut state, ChatState::Errored);
                ctx.fail(&err);
                Err(err)
            }
        }
    }

    async fn run_turn(
        &self,
        ctx: &mut ConversationContext,
        cancel: &CancellationToken,
        state: &mut ChatState,
    ) -> Result<String> {
        let user_intent = guard(cancel, self.intent.extract_intent(ctx)).await?;
        advance(state, ChatState::IntentExtracted);

        let chat_context = guard(cancel, self.context.build_context(ctx, &user_intent)).await?;
        advance(state, ChatState::ContextBuilt);

        let mut turn = ctx.derive();
        turn.set(keys::USER_INTENT, user_intent.as_str());
        turn.set(keys::CHAT_CONTEXT, chat_context.as_str());
        turn.set(keys::KNOWLEDGE_CUTOFF, self.prompts.knowledge_cutoff_date.as_str());
        let options = RenderOptions {
            now: self.clock.now(),
            history_truncation: self.prompts.history_truncation,
        };
        let prompt = self.chat_template.render(&turn, &options);
        turn.set(keys::PROMPT, prompt.as_str());
        advance(state, ChatState::PromptRendered);
        tracing::debug!(prompt_tokens = token_count(&prompt), "Chat prompt rendered");

        let config = GenerationConfig::for_chat_response(&self.prompts);
        let response = guard(cancel, async {
            self.llm
                .generate(&prompt, &config)
                .await
                .map_err(ChatError::completion)
        })
        .await?;
        advance(state, ChatState::Completed);

        let links = extract_links(&response, &chat_context);
        let text = replace_links(&response, &links);
        advance(state, ChatState::LinksExtracted);

        turn.set(keys::LINK, links.join("\n"));
        turn.set(keys::INPUT, text.as_str());
        ctx.adopt(&turn, &TURN_OUTPUTS);
        advance(state, ChatState::Done);

        tracing::info!(
            intent = %user_intent,
            context_tokens = token_count(&chat_context),
            links = links.len(),
            "Chat turn complete"
        );
        Ok(text)
    }
}

fn advance(state: &mut ChatState, next: ChatState) {
    tracing::trace!(from = ?*state, to = ?next, "Chat state");
    *state = next;
}

/// Race `fut` against cancellation.
async fn guard<T>(cancel: &CancellationToken, fut: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ChatError::Cancelled),
        result = fut => result,
    }
}
