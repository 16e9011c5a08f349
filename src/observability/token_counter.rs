use std::time::Duration;

use tiktoken_rs::tokenizer::{get_tokenizer, Tokenizer};
use tiktoken_rs::CoreBPE;
use tracing::info;

use crate::config::TokenCounterKind;
use crate::protocol::openai_chat::{ChatMessage, Usage};

/// Estimate the number of tokens in `text` with the `bytes / 4` heuristic.
#[must_use]
pub fn estimate_tokens(text: &str) -> u64 {
    (text.len() as u64).div_ceil(4)
}

/// Count whitespace-separated words.
#[must_use]
pub fn count_words(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

/// Look up an exact BPE table for `model`. Unknown model families return `None`.
fn bpe_for_model(model: &str) -> Option<&'static CoreBPE> {
    match get_tokenizer(model)? {
        Tokenizer::O200kBase => Some(tiktoken_rs::o200k_base_singleton()),
        Tokenizer::Cl100kBase => Some(tiktoken_rs::cl100k_base_singleton()),
        _ => None,
    }
}

/// Token accounting strategy selected per deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenCounter {
    kind: TokenCounterKind,
}

impl TokenCounter {
    #[must_use]
    pub fn new(kind: TokenCounterKind) -> Self {
        Self { kind }
    }

    #[must_use]
    pub fn kind(&self) -> TokenCounterKind {
        self.kind
    }

    /// Count tokens in `text`. `model_hint` selects the BPE table for the
    /// tiktoken strategy; models without one fall back to the byte heuristic.
    #[must_use]
    pub fn count_tokens(&self, text: &str, model_hint: &str) -> u64 {
        if text.is_empty() {
            return 0;
        }
        match self.kind {
            TokenCounterKind::Tiktoken => match bpe_for_model(model_hint) {
                Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
                None => estimate_tokens(text),
            },
            TokenCounterKind::Chars => estimate_tokens(text),
            TokenCounterKind::Words => count_words(text),
        }
    }

    /// Sum of per-message content counts, in order.
    #[must_use]
    pub fn count_message_tokens(&self, messages: &[ChatMessage], model_hint: &str) -> u64 {
        messages
            .iter()
            .map(|message| self.count_tokens(&message.content.text(), model_hint))
            .sum()
    }

    /// Load the BPE tables outside the request path.
    pub fn preload(&self) {
        if self.kind == TokenCounterKind::Tiktoken {
            let _ = tiktoken_rs::cl100k_base_singleton();
            let _ = tiktoken_rs::o200k_base_singleton();
        }
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new(TokenCounterKind::default())
    }
}

/// Log token usage for a completed request at INFO level.
pub fn log_request_usage(model: &str, usage: &Usage, stream: bool, duration: Duration) {
    info!(
        model = model,
        prompt_tokens = usage.prompt_tokens,
        completion_tokens = usage.completion_tokens,
        total_tokens = usage.total_tokens,
        stream = stream,
        duration_seconds = duration.as_secs_f64(),
        "request completed"
    );
}
