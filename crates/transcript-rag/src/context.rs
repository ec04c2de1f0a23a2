//! Per-turn variable store threaded through the chat pipeline.
//!
//! Sub-steps work on a [`ConversationContext::derive`]d child so scratch
//! variables such as `tokenLimit` never leak into the caller; results come
//! back only through [`ConversationContext::adopt`].

use crate::error::ChatError;

/// Well-known variable names.
pub mod keys {
    pub const HISTORY: &str = "History";
    pub const TOKEN_LIMIT: &str = "tokenLimit";
    pub const USER_INTENT: &str = "userIntent";
    pub const CHAT_CONTEXT: &str = "chatContext";
    pub const PROMPT: &str = "prompt";
    pub const LINK: &str = "link";
    pub const INPUT: &str = "input";
    pub const KNOWLEDGE_CUTOFF: &str = "knowledgeCutoff";
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversationContext {
    // Insertion-ordered; lookups ignore ASCII case.
    variables: Vec<(String, String)>,
    error: Option<String>,
}

impl ConversationContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_variables<I, K, V>(variables: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut ctx = Self::new();
        for (key, value) in variables {
            ctx.set(key, value);
        }
        ctx
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.variables
            .iter()
            .position(|(k, _)| k.eq_ignore_ascii_case(key))
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.position(key).map(|i| self.variables[i].1.as_str())
    }

    /// Value or `""` when unset.
    pub fn get_or_empty(&self, key: &str) -> &str {
        self.get(key).unwrap_or("")
    }

    /// Insert or overwrite. An existing key keeps its first spelling.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.position(&key) {
            Some(i) => self.variables[i].1 = value,
            None => self.variables.push((key, value)),
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.position(key).map(|i| self.variables.remove(i).1)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.variables.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Child snapshot with every variable copied and no recorded failure.
    pub fn derive(&self) -> Self {
        Self {
            variables: self.variables.clone(),
            error: None,
        }
    }

    /// Copy the named keys from `child` back into this context. Keys the
    /// child never set are left alone.
    pub fn adopt(&mut self, child: &ConversationContext, keys: &[&str]) {
        for key in keys {
            if let Some(value) = child.get(key) {
                self.set(*key, value.to_string());
            }
        }
    }

    /// Record a failure. The first recorded description wins.
    pub fn fail(&mut self, err: &ChatError) {
        if self.error.is_none() {
            self.error = Some(err.description());
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn has_failed(&self) -> bool {
        self.error.is_some()
    }

    /// `tokenLimit` parsed as a count; missing or malformed values are `None`.
    pub fn token_limit(&self) -> Option<usize> {
        self.get(keys::TOKEN_LIMIT)
            .and_then(|v| v.trim().parse::<i64>().ok())
            .map(|v| v.max(0) as usize)
    }
}
