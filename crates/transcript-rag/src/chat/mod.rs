pub mod context_builder;
pub mod engine;
pub mod intent;
pub mod links;
pub mod service;

pub use context_builder::ContextBuilder;
pub use engine::{ChatEngine, ChatState};
pub use intent::{IntentExtractor, USER_INTENT_PREFIX};
pub use links::{convert_links_to_markdown, extract_links, replace_links, youtube_link};
pub use service::{ChatService, ConversationStore, GENERIC_ERROR_MESSAGE};

use serde::{Deserialize, Serialize};

use crate::context::ConversationContext;

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChatRequest {
    pub input: String,
    #[serde(default)]
    pub variables: Vec<KeyValue>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChatResponse {
    pub value: String,
    #[serde(default)]
    pub variables: Vec<KeyValue>,
}

impl ChatRequest {
    pub fn new(input: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            variables: Vec::new(),
        }
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.push(KeyValue::new(key, value));
        self
    }

    pub fn to_context(&self) -> ConversationContext {
        ConversationContext::from_variables(
            self.variables
                .iter()
                .map(|kv| (kv.key.clone(), kv.value.clone())),
        )
    }
}

impl ChatResponse {
    pub fn variable(&self, key: &str) -> Option<&str> {
        self.variables
            .iter()
            .find(|kv| kv.key.eq_ignore_ascii_case(key))
            .map(|kv| kv.value.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_format_is_pascal_case() {
        let request: ChatRequest = serde_json::from_str(
            r#"{"Input": "hi", "Variables": [{"Key": "History", "Value": "user: hello"}]}"#,
        )
        .unwrap();
        assert_eq!(request.input, "hi");
        assert_eq!(request.to_context().get("history"), Some("user: hello"));

        let response = ChatResponse {
            value: "ok".into(),
            variables: vec![KeyValue::new("link", "")],
        };
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["Value"], "ok");
        assert_eq!(json["Variables"][0]["Key"], "link");
    }

    #[test]
    fn test_variables_default_to_empty() {
        let request: ChatRequest = serde_json::from_str(r#"{"Input": "hi"}"#).unwrap();
        assert!(request.variables.is_empty());
    }
}
