//! GPT-3 family BPE token counting used for every prompt budget.
//!
//! The `r50k_base` table is loaded once per process and shared; counting is
//! pure and never fails.

use std::sync::LazyLock;
use tiktoken_rs::CoreBPE;

static R50K: LazyLock<CoreBPE> =
    LazyLock::new(|| tiktoken_rs::r50k_base().expect("r50k_base BPE table is valid"));

/// Shared handle to the process-wide BPE table.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokenCounter;

impl TokenCounter {
    pub fn new() -> Self {
        Self
    }

    /// Number of BPE tokens in `text`. `""` is 0 tokens.
    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        R50K.encode_ordinary(text).len()
    }

    /// Longest suffix of `text` that fits into `max_tokens`.
    ///
    /// Works on char boundaries only, so the result is always valid UTF-8 and
    /// its re-encoded count never exceeds `max_tokens`.
    pub fn tail(&self, text: &str, max_tokens: usize) -> String {
        if max_tokens == 0 || text.is_empty() {
            return String::new();
        }
        if self.count(text) <= max_tokens {
            return text.to_string();
        }

        let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        // Lowest start index whose suffix fits. Suffix counts shrink as the
        // start moves right, so a binary search over boundaries is enough.
        let (mut lo, mut hi) = (0usize, boundaries.len());
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.count(&text[boundaries[mid]..]) <= max_tokens {
                hi = mid;
            } else {
                lo = mid + 1;
            }
        }

        if lo >= boundaries.len() {
            String::new()
        } else {
            text[boundaries[lo]..].to_string()
        }
    }
}

/// Token count with the shared GPT-3 BPE table.
pub fn token_count(text: &str) -> usize {
    TokenCounter.count(text)
}

/// Last `max_chars` characters of `text`, a one-character-per-token proxy.
pub fn char_tail(text: &str, max_chars: usize) -> String {
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}
