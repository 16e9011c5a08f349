//! Reconstruction of upstream content from `curr`/`diff` fragments.
//!
//! Each upstream response is translated by exactly one [`TranslationSession`],
//! which owns the last reconstructed content. Every changed, non-empty content
//! value yields one increment: the text added since the previous value.

use std::borrow::Cow;

use futures_util::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::ProxyError;
use crate::protocol::upstream::fragment::{decode_record, decode_tail, DecodedLine, Fragment};
use crate::stream::lines::{upstream_line_stream, LineItem};

const LOG_LINE_PREVIEW: usize = 200;

/// Collapse every `$$` into `$`.
#[must_use]
pub fn canonicalize(text: &str) -> Cow<'_, str> {
    if memchr::memmem::find(text.as_bytes(), b"$$").is_some() {
        Cow::Owned(text.replace("$$", "$"))
    } else {
        Cow::Borrowed(text)
    }
}

/// Outcome of applying one fragment to the previous content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extraction<'a> {
    /// Content after the fragment, `None` for unrecognized fragments.
    pub content: Option<Cow<'a, str>>,
    /// Whether `content` is non-empty and differs from the previous content.
    pub is_update: bool,
}

/// Apply `fragment` to `last_content`.
#[must_use]
pub fn extract<'a>(fragment: Fragment<'a>, last_content: &'a str) -> Extraction<'a> {
    let content = match fragment {
        Fragment::Full(curr) => canonicalize(curr),
        Fragment::Append { text, .. } => {
            let text = canonicalize(text);
            if text.is_empty() {
                Cow::Borrowed(last_content)
            } else {
                let mut appended = String::with_capacity(last_content.len() + text.len());
                appended.push_str(last_content);
                appended.push_str(&text);
                Cow::Owned(appended)
            }
        }
        Fragment::Heartbeat => Cow::Borrowed(last_content),
        Fragment::Unrecognized => {
            return Extraction {
                content: None,
                is_update: false,
            }
        }
    };
    let is_update = !content.is_empty() && content != last_content;
    Extraction {
        content: Some(content),
        is_update,
    }
}

fn preview(line: &str) -> &str {
    if line.len() <= LOG_LINE_PREVIEW {
        return line;
    }
    let mut end = LOG_LINE_PREVIEW;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// Reconstruction state for one upstream response.
#[derive(Debug, Default)]
pub struct TranslationSession {
    last_content: String,
    increments: usize,
}

impl TranslationSession {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    fn last_content(&self) -> &str {
        &self.last_content
    }

    #[cfg(test)]
    fn increments(&self) -> usize {
        self.increments
    }

    /// Apply a decoded payload and return the forwarded increment, if any.
    ///
    /// When the new content extends the previous content, the increment is
    /// the appended suffix. A replacement that does not extend it is forwarded
    /// whole, since downstream deltas cannot retract text.
    pub fn apply_payload(&mut self, payload: &Value) -> Option<String> {
        let extraction = extract(Fragment::from_payload(payload), &self.last_content);
        if !extraction.is_update {
            return None;
        }
        let content = extraction.content?.into_owned();
        let increment = match content.strip_prefix(self.last_content.as_str()) {
            Some(suffix) => suffix.to_owned(),
            None => {
                warn!(
                    previous_len = self.last_content.len(),
                    new_len = content.len(),
                    "upstream replaced content without extending it; forwarding it whole"
                );
                content.clone()
            }
        };
        self.last_content = content;
        self.increments += 1;
        Some(increment)
    }

    /// Process one complete upstream line.
    pub fn process_line(&mut self, line: &str) -> Option<String> {
        match decode_record(line) {
            DecodedLine::Record(record) => self.apply_payload(&record.payload),
            DecodedLine::Malformed { tag, error } => {
                warn!(
                    tag = tag,
                    line = preview(line),
                    error = %error,
                    "skipping upstream record with invalid JSON payload"
                );
                None
            }
            DecodedLine::NoMatch => {
                debug!(line = preview(line), "skipping non-record upstream line");
                None
            }
        }
    }

    /// Process the unterminated remainder left at end-of-stream.
    pub fn process_tail(&mut self, tail: &str) -> Option<String> {
        match decode_tail(tail) {
            Ok(payload) => self.apply_payload(&payload),
            Err(error) => {
                warn!(
                    line = preview(tail),
                    error = %error,
                    "skipping undecodable final upstream buffer"
                );
                None
            }
        }
    }

    pub fn process_item(&mut self, item: &LineItem) -> Option<String> {
        match item {
            LineItem::Line(line) => self.process_line(line),
            LineItem::Tail(tail) => self.process_tail(tail),
        }
    }
}

/// Translate an upstream byte stream into content increments.
///
/// Yields `Err` once on a transport or UTF-8 failure and then ends.
pub fn increment_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<String, ProxyError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let mut session = TranslationSession::new();
    upstream_line_stream(byte_stream).filter_map(move |item| {
        let out = match item {
            Ok(item) => session.process_item(&item).map(Ok),
            Err(err) => Some(Err(err)),
        };
        futures_util::future::ready(out)
    })
}

/// Drive [`increment_stream`] to completion and concatenate the increments.
///
/// # Errors
///
/// Returns the first transport or decode error.
pub async fn collect_content<S>(increments: S) -> Result<String, ProxyError>
where
    S: Stream<Item = Result<String, ProxyError>>,
{
    let mut increments = std::pin::pin!(increments);
    let mut content = String::new();
    while let Some(increment) = increments.next().await {
        content.push_str(&increment?);
    }
    Ok(content)
}
