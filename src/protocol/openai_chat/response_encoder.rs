use crate::error::ProxyError;
use crate::stream::sse::openai_sse_frame;

use super::{
    AssistantMessage, ChatCompletion, ChatCompletionChunk, ChunkChoice, ChunkDelta,
    CompletionChoice, Usage,
};

pub const FINISH_REASON_STOP: &str = "stop";
const FINGERPRINT_PREFIX: &str = "fp_";
const FINGERPRINT_HEX_LEN: usize = 10;

/// Generate a per-response fingerprint: `fp_` followed by 10 lowercase hex digits.
#[must_use]
pub fn generate_fingerprint() -> String {
    let bits = fastrand::u64(..) & ((1u64 << (FINGERPRINT_HEX_LEN * 4)) - 1);
    format!("{FINGERPRINT_PREFIX}{bits:0width$x}", width = FINGERPRINT_HEX_LEN)
}

/// Builds every downstream object for one response.
///
/// The id, creation timestamp, model name and fingerprint are fixed at
/// construction and shared by every chunk of that response.
#[derive(Debug, Clone)]
pub struct ChunkEmitter {
    id: String,
    created: u64,
    model: String,
    fingerprint: String,
}

impl ChunkEmitter {
    /// `model` is the caller-visible name, not the upstream identifier.
    #[must_use]
    pub fn new(id: String, created: u64, model: String, fingerprint: String) -> Self {
        Self {
            id,
            created,
            model,
            fingerprint,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[must_use]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    fn chunk(
        &self,
        delta: ChunkDelta,
        finish_reason: Option<&str>,
        usage: Option<Usage>,
    ) -> ChatCompletionChunk {
        ChatCompletionChunk {
            id: self.id.clone(),
            object: "chat.completion.chunk".to_string(),
            created: self.created,
            model: self.model.clone(),
            system_fingerprint: self.fingerprint.clone(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                logprobs: None,
                finish_reason: finish_reason.map(str::to_string),
            }],
            usage,
        }
    }

    /// One content increment. Never carries the accumulated text.
    #[must_use]
    pub fn delta_chunk(&self, increment: &str) -> ChatCompletionChunk {
        self.chunk(
            ChunkDelta {
                content: Some(increment.to_string()),
            },
            None,
            None,
        )
    }

    /// Final chunk: empty delta, `stop`, usage.
    #[must_use]
    pub fn terminal_chunk(&self, usage: Usage) -> ChatCompletionChunk {
        self.chunk(ChunkDelta::default(), Some(FINISH_REASON_STOP), Some(usage))
    }

    /// Single non-streaming completion holding the full text.
    #[must_use]
    pub fn aggregate(&self, content: String, usage: Usage) -> ChatCompletion {
        ChatCompletion {
            id: self.id.clone(),
            object: "chat.completion".to_string(),
            created: self.created,
            model: self.model.clone(),
            system_fingerprint: self.fingerprint.clone(),
            choices: vec![CompletionChoice {
                index: 0,
                message: AssistantMessage {
                    role: "assistant".to_string(),
                    content,
                },
                logprobs: None,
                finish_reason: FINISH_REASON_STOP.to_string(),
            }],
            usage,
        }
    }

    /// SSE frame for one content increment.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] if the chunk fails to serialize.
    pub fn delta_frame(&self, increment: &str) -> Result<String, ProxyError> {
        encode_chunk_frame(&self.delta_chunk(increment))
    }

    /// SSE frame for the terminal chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] if the chunk fails to serialize.
    pub fn terminal_frame(&self, usage: Usage) -> Result<String, ProxyError> {
        encode_chunk_frame(&self.terminal_chunk(usage))
    }
}

fn encode_chunk_frame(chunk: &ChatCompletionChunk) -> Result<String, ProxyError> {
    let json = serde_json::to_string(chunk)
        .map_err(|e| ProxyError::Internal(format!("failed to encode chunk: {e}")))?;
    Ok(openai_sse_frame(&json))
}
