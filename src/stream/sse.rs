//! Server-sent event framing for the caller-facing stream.

/// Sentinel written after the terminal chunk.
pub const DONE_FRAME: &str = "data: [DONE]\n\n";

/// Format an OpenAI-style SSE frame (no event type, just data).
#[must_use]
pub fn openai_sse_frame(json: &str) -> String {
    let mut out = String::with_capacity(10 + json.len());
    out.push_str("data: ");
    out.push_str(json);
    out.push_str("\n\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openai_sse_frame_helper() {
        assert_eq!(openai_sse_frame("{\"a\":1}"), "data: {\"a\":1}\n\n");
    }

    #[test]
    fn test_done_frame_is_a_data_frame() {
        assert_eq!(DONE_FRAME, openai_sse_frame("[DONE]"));
    }
}
