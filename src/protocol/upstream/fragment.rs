//! Decoding of upstream `<tag>:<json>` records into content fragments.

use serde_json::Value;

/// One matched upstream record.
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamRecord<'a> {
    /// Opaque alphanumeric tag, carried for logging only.
    pub tag: &'a str,
    pub payload: Value,
}

/// Result of decoding one line.
#[derive(Debug)]
pub enum DecodedLine<'a> {
    Record(UpstreamRecord<'a>),
    /// Matched `<tag>:` but the payload is not valid JSON.
    Malformed {
        tag: &'a str,
        error: serde_json::Error,
    },
    /// Not a `<tag>:<json>` record.
    NoMatch,
}

#[inline]
fn is_tag(candidate: &str) -> bool {
    !candidate.is_empty() && candidate.bytes().all(|b| b.is_ascii_alphanumeric())
}

/// Match `line` against `<tag>:<json>` and parse the payload.
#[must_use]
pub fn decode_record(line: &str) -> DecodedLine<'_> {
    let Some((tag, json)) = line.split_once(':') else {
        return DecodedLine::NoMatch;
    };
    if !is_tag(tag) {
        return DecodedLine::NoMatch;
    }
    match serde_json::from_str(json) {
        Ok(payload) => DecodedLine::Record(UpstreamRecord { tag, payload }),
        Err(error) => DecodedLine::Malformed { tag, error },
    }
}

/// Decode the unterminated remainder at end-of-stream.
///
/// Tries the `<tag>:<json>` form first and falls back to a bare JSON payload.
///
/// # Errors
///
/// Returns the JSON error when neither form parses.
pub fn decode_tail(line: &str) -> Result<Value, serde_json::Error> {
    match decode_record(line) {
        DecodedLine::Record(record) => Ok(record.payload),
        DecodedLine::Malformed { .. } | DecodedLine::NoMatch => serde_json::from_str(line.trim()),
    }
}

/// Shape of a decoded payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fragment<'a> {
    /// Authoritative current content (`output.curr` or `curr`), not yet canonicalized.
    Full(&'a str),
    /// `diff: [opcode, text]`: append `text` to the previous content.
    Append { opcode: &'a Value, text: &'a str },
    /// `diff: [opcode]`: content unchanged.
    Heartbeat,
    Unrecognized,
}

impl<'a> Fragment<'a> {
    /// Classify a payload. First match wins: `output.curr`, `curr`, then `diff`.
    #[must_use]
    pub fn from_payload(payload: &'a Value) -> Self {
        let Some(object) = payload.as_object() else {
            return Fragment::Unrecognized;
        };

        if let Some(curr) = object
            .get("output")
            .and_then(|output| output.get("curr"))
        {
            return curr.as_str().map_or(Fragment::Unrecognized, Fragment::Full);
        }
        if let Some(curr) = object.get("curr") {
            return curr.as_str().map_or(Fragment::Unrecognized, Fragment::Full);
        }

        match object.get("diff").and_then(Value::as_array).map(Vec::as_slice) {
            Some([opcode, text, ..]) => text
                .as_str()
                .map_or(Fragment::Unrecognized, |text| Fragment::Append { opcode, text }),
            Some([_]) => Fragment::Heartbeat,
            _ => Fragment::Unrecognized,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_record_matches_tag_and_json() {
        match decode_record(r#"a1:{"curr":"Hi"}"#) {
            DecodedLine::Record(record) => {
                assert_eq!(record.tag, "a1");
                assert_eq!(record.payload, json!({"curr": "Hi"}));
            }
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_record_keeps_colons_in_payload() {
        match decode_record(r#"0:{"curr":"a:b"}"#) {
            DecodedLine::Record(record) => assert_eq!(record.payload["curr"], "a:b"),
            other => panic!("expected record, got {other:?}"),
        }
    }

    #[test]
    fn test_decode_record_pattern_mismatch() {
        assert!(matches!(decode_record("no colon here"), DecodedLine::NoMatch));
        assert!(matches!(decode_record(":{}"), DecodedLine::NoMatch));
        assert!(matches!(decode_record("a-b:{}"), DecodedLine::NoMatch));
        assert!(matches!(decode_record(r#"{"curr":"x"}"#), DecodedLine::NoMatch));
    }

    #[test]
    fn test_decode_record_malformed_json() {
        match decode_record(r#"7:{"curr": "#) {
            DecodedLine::Malformed { tag, .. } => assert_eq!(tag, "7"),
            other => panic!("expected malformed, got {other:?}"),
        }
        assert!(matches!(decode_record("7:"), DecodedLine::Malformed { .. }));
    }

    #[test]
    fn test_decode_tail_accepts_both_forms() {
        assert_eq!(decode_tail(r#"f:{"curr":"x"}"#).unwrap(), json!({"curr": "x"}));
        assert_eq!(decode_tail(r#"{"curr":"y"}"#).unwrap(), json!({"curr": "y"}));
        assert!(decode_tail("garbage").is_err());
    }

    #[test]
    fn test_fragment_priority_output_curr_first() {
        let payload = json!({"output": {"curr": "nested"}, "curr": "top", "diff": [0, "d"]});
        assert_eq!(Fragment::from_payload(&payload), Fragment::Full("nested"));

        let payload = json!({"curr": "top", "diff": [0, "d"]});
        assert_eq!(Fragment::from_payload(&payload), Fragment::Full("top"));
    }

    #[test]
    fn test_fragment_diff_shapes() {
        let append = json!({"diff": [0, " there"]});
        match Fragment::from_payload(&append) {
            Fragment::Append { opcode, text } => {
                assert_eq!(opcode, &json!(0));
                assert_eq!(text, " there");
            }
            other => panic!("expected append, got {other:?}"),
        }
        assert_eq!(
            Fragment::from_payload(&json!({"diff": [1]})),
            Fragment::Heartbeat
        );
        assert_eq!(
            Fragment::from_payload(&json!({"diff": []})),
            Fragment::Unrecognized
        );
    }

    #[test]
    fn test_fragment_unrecognized_shapes() {
        for payload in [
            json!(["$@1"]),
            json!("text"),
            json!({"other": 1}),
            json!({"curr": 5}),
            json!({"diff": [0, 7]}),
            json!({"diff": "x"}),
            json!({"output": {"prev": "x"}}),
        ] {
            assert_eq!(
                Fragment::from_payload(&payload),
                Fragment::Unrecognized,
                "payload {payload}"
            );
        }
    }
}
