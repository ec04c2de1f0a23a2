//! Prompt templates
//!
//! Templates are parsed once into segments. `{{$name}}` and `{{name}}` pull a
//! variable from the [`ConversationContext`]; dotted names call one of the
//! built-in functions. Unknown names render as the empty string and an
//! unterminated `{{` stays literal.

use chrono::{DateTime, Utc};

use crate::config::HistoryTruncation;
use crate::context::{keys, ConversationContext};
use crate::llm::tokenizer::{char_tail, TokenCounter};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateFunction {
    /// `ChatPlugin.ExtractChatHistory`: history tail fitted to `tokenLimit`.
    ExtractChatHistory,
    /// `TimePlugin.Now`
    Now,
    /// `TimePlugin.Second`
    Second,
    /// `TimePlugin.Date`
    Date,
    Unknown(String),
}

impl TemplateFunction {
    fn parse(name: &str) -> Self {
        match name.to_ascii_lowercase().as_str() {
            "chatplugin.extractchathistory" => TemplateFunction::ExtractChatHistory,
            "timeplugin.now" => TemplateFunction::Now,
            "timeplugin.second" => TemplateFunction::Second,
            "timeplugin.date" => TemplateFunction::Date,
            _ => TemplateFunction::Unknown(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Text(String),
    Variable(String),
    Function(TemplateFunction),
}

/// Values available while rendering besides the context variables.
#[derive(Debug, Clone, Copy)]
pub struct RenderOptions {
    pub now: DateTime<Utc>,
    pub history_truncation: HistoryTruncation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptTemplate {
    segments: Vec<Segment>,
}

impl PromptTemplate {
    pub fn parse(template: &str) -> Self {
        let mut segments = Vec::new();
        let mut text = String::new();
        let mut rest = template;

        while let Some(open) = rest.find("{{") {
            let after_open = &rest[open + 2..];
            let Some(close) = after_open.find("}}") else {
                break;
            };
            text.push_str(&rest[..open]);
            if !text.is_empty() {
                segments.push(Segment::Text(std::mem::take(&mut text)));
            }
            segments.push(Self::parse_block(&after_open[..close]));
            rest = &after_open[close + 2..];
        }

        text.push_str(rest);
        if !text.is_empty() {
            segments.push(Segment::Text(text));
        }
        Self { segments }
    }

    fn parse_block(inner: &str) -> Segment {
        // Arguments after the first token are not supported and ignored.
        let name = inner.split_whitespace().next().unwrap_or("");
        if let Some(var) = name.strip_prefix('$') {
            Segment::Variable(var.to_string())
        } else if name.contains('.') {
            Segment::Function(TemplateFunction::parse(name))
        } else {
            Segment::Variable(name.to_string())
        }
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn render(&self, ctx: &ConversationContext, options: &RenderOptions) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Variable(name) => out.push_str(ctx.get_or_empty(name)),
                Segment::Function(function) => {
                    out.push_str(&call_function(function, ctx, options))
                }
            }
        }
        out
    }
}

fn call_function(
    function: &TemplateFunction,
    ctx: &ConversationContext,
    options: &RenderOptions,
) -> String {
    match function {
        TemplateFunction::ExtractChatHistory => {
            let history = ctx.get_or_empty(keys::HISTORY);
            let tail = match ctx.token_limit() {
                Some(limit) => fit_history(history, limit, options.history_truncation),
                None => history.to_string(),
            };
            format!("Chat history:\n{}", tail)
        }
        TemplateFunction::Now => options.now.format("%A, %B %e, %Y %l:%M %p").to_string(),
        TemplateFunction::Second => options.now.format("%S").to_string(),
        TemplateFunction::Date => options.now.format("%Y-%m-%d").to_string(),
        TemplateFunction::Unknown(name) => {
            tracing::debug!(function = %name, "Unknown template function rendered empty");
            String::new()
        }
    }
}

/// Tail of `history` that fits `limit` units in the given mode.
pub fn fit_history(history: &str, limit: usize, mode: HistoryTruncation) -> String {
    match mode {
        HistoryTruncation::Characters => char_tail(history, limit),
        HistoryTruncation::Tokens => TokenCounter::new().tail(history, limit),
    }
}

/// Parse and render in one go.
pub fn render_template(template: &str, ctx: &ConversationContext, options: &RenderOptions) -> String {
    PromptTemplate::parse(template).render(ctx, options)
}
