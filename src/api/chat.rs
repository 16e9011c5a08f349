use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::Response;
use tracing::{debug, warn};

use crate::error::{into_axum_response, ProxyError};
use crate::observability::log_request_complete;
use crate::protocol::error_shapes::sanitize_upstream_error;
use crate::protocol::openai_chat::response_encoder::{generate_fingerprint, ChunkEmitter};
use crate::protocol::openai_chat::{ChatCompletionRequest, Usage};
use crate::protocol::upstream::{inject_system_prompt, UpstreamChatPayload};
use crate::state::AppState;
use crate::stream::{chat_sse_stream, collect_content, increment_stream};
use crate::util::unix_now_secs;

use super::common::{ok_json_response, sse_ok_response};

/// `POST /v1/chat/completions`.
pub async fn handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Response {
    match handler_inner(state, headers, body).await {
        Ok(response) => response,
        Err(err) => into_axum_response(&err),
    }
}

async fn handler_inner(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: bytes::Bytes,
) -> Result<Response, ProxyError> {
    let started = Instant::now();
    state.authenticate(&headers)?;

    let mut request: ChatCompletionRequest = serde_json::from_slice(&body)
        .map_err(|e| ProxyError::InvalidRequest(format!("Invalid JSON body: {e}")))?;
    let messages = request
        .messages
        .take()
        .ok_or_else(|| ProxyError::InvalidRequest("'messages' is required".to_string()))?;
    let messages = inject_system_prompt(messages, state.config.features.system_prompt.as_deref());
    let stream = request.stream.unwrap_or(false);

    let upstream_model = state.model_router.resolve(&request.model);
    let prompt_tokens = state
        .token_counter
        .count_message_tokens(&messages, &request.model);
    let payload = UpstreamChatPayload::new(
        &request,
        &messages,
        upstream_model,
        state.sampling_defaults(),
    );
    let upstream_body = payload.to_body()?;

    let endpoint = state.upstream.next_endpoint();
    debug!(
        model = %request.model,
        upstream_model,
        endpoint = %endpoint,
        stream,
        prompt_tokens,
        "forwarding chat completion"
    );
    let response = state
        .transport
        .send_stream(endpoint, state.upstream.static_headers(), upstream_body)
        .await?;

    let status = response.status();
    if !status.is_success() {
        let error_body = response.bytes().await.unwrap_or_default();
        let message = sanitize_upstream_error(&error_body);
        warn!(status = status.as_u16(), message = %message, "upstream rejected request");
        return Err(ProxyError::Upstream {
            status: status.as_u16(),
            message,
        });
    }
    if !state
        .upstream
        .content_type_matches(response.headers().get(http::header::CONTENT_TYPE))
    {
        let actual = response
            .headers()
            .get(http::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("<none>")
            .to_string();
        warn!(
            expected = state.upstream.expected_content_type().unwrap_or_default(),
            actual = %actual,
            "upstream answered with an unexpected content type; session is likely expired"
        );
        return Err(ProxyError::Upstream {
            status: 401,
            message: format!("upstream session rejected (content-type {actual})"),
        });
    }

    let emitter = ChunkEmitter::new(
        state.next_completion_id(),
        unix_now_secs(),
        request.model,
        generate_fingerprint(),
    );
    let increments = increment_stream(response.bytes_stream());

    if stream {
        let counter = state.token_counter;
        let body = Body::from_stream(chat_sse_stream(
            increments,
            emitter,
            counter,
            prompt_tokens,
            started,
        ));
        return Ok(sse_ok_response(body));
    }

    let content = collect_content(increments).await?;
    let completion_tokens = state.token_counter.count_tokens(&content, emitter.model());
    let usage = Usage::new(prompt_tokens, completion_tokens);
    log_request_complete(emitter.model(), &usage, false, started);

    let completion = emitter.aggregate(content, usage);
    let body = serde_json::to_vec(&completion)
        .map_err(|e| ProxyError::Internal(format!("failed to encode completion: {e}")))?;
    Ok(ok_json_response(bytes::Bytes::from(body)))
}
