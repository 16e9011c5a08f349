//! Upstream chat service wire format.
//!
//! Requests are a one-element JSON array holding the chat payload. Responses
//! are newline-delimited `<tag>:<json>` records, see [`fragment`].

pub mod fragment;

use bytes::Bytes;
use serde::Serialize;

use crate::error::ProxyError;
use crate::protocol::openai_chat::{ChatCompletionRequest, ChatMessage};

/// Sampling values used when the caller leaves them unset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplingDefaults {
    pub temperature: f64,
    pub top_p: f64,
}

impl Default for SamplingDefaults {
    fn default() -> Self {
        Self {
            temperature: 0.8,
            top_p: 1.0,
        }
    }
}

/// Chat payload sent upstream.
#[derive(Debug, Serialize)]
pub struct UpstreamChatPayload<'a> {
    pub messages: &'a [ChatMessage],
    pub model: &'a str,
    pub stream: bool,
    pub frequency_penalty: f64,
    pub presence_penalty: f64,
    pub temperature: f64,
    pub top_p: f64,
}

impl<'a> UpstreamChatPayload<'a> {
    #[must_use]
    pub fn new(
        request: &ChatCompletionRequest,
        messages: &'a [ChatMessage],
        upstream_model: &'a str,
        defaults: SamplingDefaults,
    ) -> Self {
        Self {
            messages,
            model: upstream_model,
            stream: request.stream.unwrap_or(false),
            frequency_penalty: request.frequency_penalty.unwrap_or(0.0),
            presence_penalty: request.presence_penalty.unwrap_or(0.0),
            temperature: request.temperature.unwrap_or(defaults.temperature),
            top_p: request.top_p.unwrap_or(defaults.top_p),
        }
    }

    /// Encode as the `[payload]` request body.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Internal`] if serialization fails.
    pub fn to_body(&self) -> Result<Bytes, ProxyError> {
        serde_json::to_vec(&[self])
            .map(Bytes::from)
            .map_err(|e| ProxyError::Internal(format!("failed to encode upstream payload: {e}")))
    }
}

/// Prepend a system message unless the conversation already opens with one.
#[must_use]
pub fn inject_system_prompt(
    mut messages: Vec<ChatMessage>,
    system_prompt: Option<&str>,
) -> Vec<ChatMessage> {
    let Some(prompt) = system_prompt.filter(|prompt| !prompt.is_empty()) else {
        return messages;
    };
    if messages.first().is_some_and(|first| first.role == "system") {
        return messages;
    }
    messages.insert(0, ChatMessage::system(prompt));
    messages
}
