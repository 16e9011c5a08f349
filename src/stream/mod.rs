pub mod lines;
pub mod sse;
pub mod translator;

use std::pin::Pin;
use std::time::Instant;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tracing::{debug, error};

use crate::error::ProxyError;
use crate::observability::log_request_complete;
use crate::observability::token_counter::TokenCounter;
use crate::protocol::openai_chat::response_encoder::ChunkEmitter;
use crate::protocol::openai_chat::Usage;

pub use lines::{upstream_line_stream, LineItem, LineReassembler};
pub use translator::{collect_content, increment_stream, TranslationSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Streaming,
    Sentinel,
    Finished,
}

struct SseState<S> {
    increments: Pin<Box<S>>,
    emitter: ChunkEmitter,
    counter: TokenCounter,
    prompt_tokens: u64,
    completion_tokens: u64,
    started: Instant,
    phase: Phase,
}

impl<S> Drop for SseState<S> {
    fn drop(&mut self) {
        if self.phase == Phase::Streaming {
            debug!(
                response_id = self.emitter.id(),
                "client went away mid-stream; releasing upstream connection"
            );
        }
    }
}

/// Turn content increments into the caller-facing SSE byte stream.
///
/// Each increment becomes one delta frame. When the increments end cleanly a
/// terminal frame with usage and the `[DONE]` sentinel follow. An upstream
/// failure is yielded as `Err`, which aborts the response body without a
/// terminal frame.
pub fn chat_sse_stream<S>(
    increments: S,
    emitter: ChunkEmitter,
    counter: TokenCounter,
    prompt_tokens: u64,
    started: Instant,
) -> impl Stream<Item = Result<Bytes, ProxyError>> + Send
where
    S: Stream<Item = Result<String, ProxyError>> + Send + 'static,
{
    let state = SseState {
        increments: Box::pin(increments),
        emitter,
        counter,
        prompt_tokens,
        completion_tokens: 0,
        started,
        phase: Phase::Streaming,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        match state.phase {
            Phase::Streaming => match state.increments.as_mut().next().await {
                Some(Ok(increment)) => {
                    state.completion_tokens += state
                        .counter
                        .count_tokens(&increment, state.emitter.model());
                    let frame = state.emitter.delta_frame(&increment).map(Bytes::from);
                    if frame.is_err() {
                        state.phase = Phase::Finished;
                    }
                    Some((frame, state))
                }
                Some(Err(err)) => {
                    error!(
                        response_id = state.emitter.id(),
                        model = state.emitter.model(),
                        error = %err,
                        "upstream stream failed; truncating response"
                    );
                    state.phase = Phase::Finished;
                    Some((Err(err), state))
                }
                None => {
                    let usage = Usage::new(state.prompt_tokens, state.completion_tokens);
                    log_request_complete(state.emitter.model(), &usage, true, state.started);
                    state.phase = Phase::Sentinel;
                    let frame = state.emitter.terminal_frame(usage).map(Bytes::from);
                    Some((frame, state))
                }
            },
            Phase::Sentinel => {
                state.phase = Phase::Finished;
                Some((Ok(Bytes::from_static(sse::DONE_FRAME.as_bytes())), state))
            }
            Phase::Finished => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TokenCounterKind;

    fn emitter() -> ChunkEmitter {
        ChunkEmitter::new(
            "chatcmpl-test".into(),
            1,
            "gpt-4o".into(),
            "fp_aaaaaaaaaa".into(),
        )
    }

    fn data_frames(frames: &[Bytes]) -> Vec<String> {
        frames
            .iter()
            .map(|frame| {
                let text = std::str::from_utf8(frame).unwrap();
                assert!(text.starts_with("data: ") && text.ends_with("\n\n"));
                text["data: ".len()..text.len() - 2].to_string()
            })
            .collect()
    }

    #[tokio::test]
    async fn test_deltas_then_terminal_then_sentinel() {
        let increments = futures_util::stream::iter(vec![
            Ok::<_, ProxyError>("Hi".to_string()),
            Ok(" there".to_string()),
        ]);
        let frames: Vec<Bytes> = chat_sse_stream(
            increments,
            emitter(),
            TokenCounter::new(TokenCounterKind::Words),
            7,
            Instant::now(),
        )
        .map(Result::unwrap)
        .collect()
        .await;

        let data = data_frames(&frames);
        assert_eq!(data.len(), 4);
        let first: serde_json::Value = serde_json::from_str(&data[0]).unwrap();
        let second: serde_json::Value = serde_json::from_str(&data[1]).unwrap();
        assert_eq!(first["choices"][0]["delta"]["content"], "Hi");
        assert_eq!(second["choices"][0]["delta"]["content"], " there");
        assert_eq!(first["id"], second["id"]);

        let terminal: serde_json::Value = serde_json::from_str(&data[2]).unwrap();
        assert_eq!(terminal["choices"][0]["finish_reason"], "stop");
        assert_eq!(terminal["usage"]["prompt_tokens"], 7);
        assert_eq!(terminal["usage"]["completion_tokens"], 2);
        assert_eq!(terminal["usage"]["total_tokens"], 9);
        assert_eq!(data[3], "[DONE]");
    }

    #[tokio::test]
    async fn test_empty_upstream_still_terminates() {
        let increments = futures_util::stream::iter(Vec::<Result<String, ProxyError>>::new());
        let frames: Vec<Bytes> = chat_sse_stream(
            increments,
            emitter(),
            TokenCounter::default(),
            0,
            Instant::now(),
        )
        .map(Result::unwrap)
        .collect()
        .await;
        let data = data_frames(&frames);
        assert_eq!(data.len(), 2);
        assert!(data[0].contains("\"finish_reason\":\"stop\""));
        assert_eq!(data[1], "[DONE]");
    }

    #[tokio::test]
    async fn test_error_truncates_without_terminal_chunk() {
        let increments = futures_util::stream::iter(vec![
            Ok("partial".to_string()),
            Err(ProxyError::Transport("reset".into())),
            Ok("never".to_string()),
        ]);
        let items: Vec<Result<Bytes, ProxyError>> = chat_sse_stream(
            increments,
            emitter(),
            TokenCounter::default(),
            0,
            Instant::now(),
        )
        .collect()
        .await;
        assert_eq!(items.len(), 2);
        assert!(items[0].is_ok());
        assert!(matches!(items[1], Err(ProxyError::Transport(_))));
    }

    #[tokio::test]
    async fn test_client_disconnect_drops_upstream() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        struct ReleaseFlag(Arc<AtomicBool>);

        impl Drop for ReleaseFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        let released = Arc::new(AtomicBool::new(false));
        let guard = ReleaseFlag(Arc::clone(&released));
        let increments = futures_util::stream::iter(vec![Ok::<_, ProxyError>("Hi".to_string())])
            .chain(futures_util::stream::pending())
            .map(move |item| {
                let _held = &guard;
                item
            });

        let mut sse = Box::pin(chat_sse_stream(
            increments,
            emitter(),
            TokenCounter::default(),
            0,
            Instant::now(),
        ));
        let first = sse.next().await.unwrap().unwrap();
        assert!(std::str::from_utf8(&first).unwrap().contains("\"content\":\"Hi\""));
        assert!(!released.load(Ordering::SeqCst));

        drop(sse);
        assert!(released.load(Ordering::SeqCst));
    }
}
