//! Newline-delimited record reassembly over an upstream byte stream.
//!
//! Network reads split records at arbitrary byte offsets. The reassembler
//! keeps only the trailing unterminated partial line between reads and emits
//! each complete line exactly once, in arrival order.

use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

use crate::error::ProxyError;

/// One unit produced by [`upstream_line_stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineItem {
    /// A newline-terminated record.
    Line(String),
    /// Bytes left over at end-of-stream with no terminating newline.
    Tail(String),
}

/// Incremental splitter of raw bytes into complete text lines.
///
/// Lines are decoded as strict UTF-8 only once complete, so multi-byte
/// sequences split across reads are handled transparently. A trailing `\r`
/// is stripped and blank lines are skipped.
#[derive(Debug, Default)]
pub struct LineReassembler {
    buffer: Vec<u8>,
    read_offset: usize,
}

impl LineReassembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return the complete lines it finished.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Decode`] when a completed line is not valid UTF-8.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<String>, ProxyError> {
        let mut out = Vec::new();
        self.push_into(chunk, &mut out)?;
        Ok(out)
    }

    /// Feed one chunk and append completed lines into a caller-provided buffer.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Decode`] when a completed line is not valid UTF-8.
    pub fn push_into(&mut self, chunk: &[u8], out: &mut Vec<String>) -> Result<(), ProxyError> {
        let scan_start = self.buffer.len();
        self.buffer.extend_from_slice(chunk);

        let mut processed_up_to = self.read_offset;
        for rel_pos in memchr_iter(b'\n', &self.buffer[scan_start..]) {
            let line_end = scan_start + rel_pos;
            let line = trim_cr(&self.buffer[processed_up_to..line_end]);
            processed_up_to = line_end + 1;
            if line.is_empty() {
                continue;
            }
            out.push(decode_line(line)?);
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return Ok(());
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2 || self.read_offset >= 8 * 1024);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
        Ok(())
    }

    /// Take the unterminated remainder at end-of-stream.
    ///
    /// Returns `None` when nothing but whitespace is buffered.
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Decode`] when the remainder is not valid UTF-8.
    pub fn finish(&mut self) -> Result<Option<String>, ProxyError> {
        let rest = trim_cr(&self.buffer[self.read_offset..]);
        let tail = if rest.iter().all(u8::is_ascii_whitespace) {
            None
        } else {
            Some(decode_line(rest)?)
        };
        self.buffer.clear();
        self.read_offset = 0;
        Ok(tail)
    }

    /// Bytes currently held for the unterminated partial line.
    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset
    }
}

#[inline]
fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn decode_line(line: &[u8]) -> Result<String, ProxyError> {
    std::str::from_utf8(line)
        .map(str::to_owned)
        .map_err(|e| {
            ProxyError::Decode(format!(
                "upstream line is not valid UTF-8 (valid up to byte {})",
                e.valid_up_to()
            ))
        })
}

struct PendingLines {
    lines: SmallVec<[String; 8]>,
    head: usize,
}

impl PendingLines {
    #[inline]
    fn new() -> Self {
        Self {
            lines: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<String> {
        if self.head >= self.lines.len() {
            return None;
        }
        let line = std::mem::take(&mut self.lines[self.head]);
        self.head += 1;
        if self.head == self.lines.len() {
            self.lines.clear();
            self.head = 0;
        }
        Some(line)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<String>) {
        self.lines.extend(parsed.drain(..));
    }
}

struct LineStreamState<S> {
    stream: std::pin::Pin<Box<S>>,
    reassembler: LineReassembler,
    parsed: Vec<String>,
    pending: PendingLines,
    deferred_err: Option<ProxyError>,
    finished: bool,
}

/// Split an upstream byte stream into [`LineItem`]s.
///
/// A transport error or invalid UTF-8 is yielded once as `Err` and ends the
/// stream. Lines completed before an invalid one are yielded first. Dropping the returned stream drops `byte_stream`.
pub fn upstream_line_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<LineItem, ProxyError>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    use futures_util::StreamExt;

    let state = LineStreamState {
        stream: Box::pin(byte_stream),
        reassembler: LineReassembler::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingLines::new(),
        deferred_err: None,
        finished: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(line) = state.pending.pop_front() {
                return Some((Ok(LineItem::Line(line)), state));
            }
            if let Some(err) = state.deferred_err.take() {
                return Some((Err(err), state));
            }
            if state.finished {
                return None;
            }

            match state.stream.as_mut().next().await {
                Some(Ok(bytes)) => {
                    let pushed = state.reassembler.push_into(&bytes, &mut state.parsed);
                    // Lines completed before a bad one in the same read still go out first.
                    state.pending.extend_from_vec(&mut state.parsed);
                    if let Err(err) = pushed {
                        state.finished = true;
                        state.deferred_err = Some(err);
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    return Some((
                        Err(ProxyError::Transport(format!(
                            "upstream stream interrupted: {err}"
                        ))),
                        state,
                    ));
                }
                None => {
                    state.finished = true;
                    return match state.reassembler.finish() {
                        Ok(Some(tail)) => Some((Ok(LineItem::Tail(tail)), state)),
                        Ok(None) => None,
                        Err(err) => Some((Err(err), state)),
                    };
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    const SAMPLE: &[u8] = "0:[\"$@1\"]\n1:{\"curr\":\"héllo\"}\r\n\n2:{\"diff\":[0,\" wörld €\"]}\n3:{\"diff\":[1]}\nt:{\"curr\":\"x\"}"
        .as_bytes();

    fn collect_lines(chunks: &[&[u8]]) -> (Vec<String>, Option<String>) {
        let mut reassembler = LineReassembler::new();
        let mut lines = Vec::new();
        for chunk in chunks {
            reassembler.push_into(chunk, &mut lines).unwrap();
        }
        let tail = reassembler.finish().unwrap();
        (lines, tail)
    }

    #[test]
    fn test_single_chunk() {
        let (lines, tail) = collect_lines(&[SAMPLE]);
        assert_eq!(
            lines,
            vec![
                "0:[\"$@1\"]",
                "1:{\"curr\":\"héllo\"}",
                "2:{\"diff\":[0,\" wörld €\"]}",
                "3:{\"diff\":[1]}",
            ]
        );
        assert_eq!(tail.as_deref(), Some("t:{\"curr\":\"x\"}"));
    }

    #[test]
    fn test_split_invariance_over_every_two_way_split() {
        let expected = collect_lines(&[SAMPLE]);
        for split in 0..=SAMPLE.len() {
            let (a, b) = SAMPLE.split_at(split);
            assert_eq!(collect_lines(&[a, b]), expected, "split at {split}");
        }
    }

    #[test]
    fn test_split_invariance_byte_by_byte() {
        let expected = collect_lines(&[SAMPLE]);
        let chunks: Vec<&[u8]> = SAMPLE.chunks(1).collect();
        assert_eq!(collect_lines(&chunks), expected);
    }

    #[test]
    fn test_split_invariance_three_way() {
        let expected = collect_lines(&[SAMPLE]);
        for first in 0..SAMPLE.len() {
            for second in first..SAMPLE.len() {
                let chunks = [
                    &SAMPLE[..first],
                    &SAMPLE[first..second],
                    &SAMPLE[second..],
                ];
                assert_eq!(collect_lines(&chunks), expected, "splits {first}/{second}");
            }
        }
    }

    #[test]
    fn test_partial_line_is_held_until_newline() {
        let mut reassembler = LineReassembler::new();
        assert!(reassembler.push(b"a1:{\"cu").unwrap().is_empty());
        assert_eq!(reassembler.pending_len(), 7);
        let lines = reassembler.push(b"rr\":\"Hi\"}\nb").unwrap();
        assert_eq!(lines, vec!["a1:{\"curr\":\"Hi\"}"]);
        assert_eq!(reassembler.pending_len(), 1);
    }

    #[test]
    fn test_whitespace_tail_is_dropped() {
        let mut reassembler = LineReassembler::new();
        reassembler.push(b"a:{}\n  \r").unwrap();
        assert_eq!(reassembler.finish().unwrap(), None);
    }

    #[test]
    fn test_invalid_utf8_is_fatal() {
        let mut reassembler = LineReassembler::new();
        let err = reassembler.push(b"a:{\"curr\":\"\xff\"}\n").unwrap_err();
        assert!(matches!(err, ProxyError::Decode(_)));
    }

    #[test]
    fn test_compaction_keeps_partial_line() {
        let mut reassembler = LineReassembler::new();
        let mut big = "x".repeat(10_000);
        big.push('\n');
        big.push_str("partial");
        let lines = reassembler.push(big.as_bytes()).unwrap();
        assert_eq!(lines.len(), 1);
        let lines = reassembler.push(b"-done\n").unwrap();
        assert_eq!(lines, vec!["partial-done"]);
    }

    #[tokio::test]
    async fn test_stream_yields_lines_then_tail() {
        let chunks: Vec<Result<bytes::Bytes, std::io::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"a1:{\"curr\":\"Hi\"}\na2:{\"di")),
            Ok(bytes::Bytes::from_static(b"ff\":[0,\" there\"]}\n{\"curr\":\"end\"}")),
        ];
        let items: Vec<_> = upstream_line_stream(futures_util::stream::iter(chunks))
            .collect()
            .await;
        let items: Vec<LineItem> = items.into_iter().map(Result::unwrap).collect();
        assert_eq!(
            items,
            vec![
                LineItem::Line("a1:{\"curr\":\"Hi\"}".into()),
                LineItem::Line("a2:{\"diff\":[0,\" there\"]}".into()),
                LineItem::Tail("{\"curr\":\"end\"}".into()),
            ]
        );
    }

    #[tokio::test]
    async fn test_stream_transport_error_ends_stream() {
        let chunks: Vec<Result<bytes::Bytes, std::io::Error>> = vec![
            Ok(bytes::Bytes::from_static(b"a1:{\"curr\":\"Hi\"}\n")),
            Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset")),
            Ok(bytes::Bytes::from_static(b"a2:{\"curr\":\"never\"}\n")),
        ];
        let items: Vec<_> = upstream_line_stream(futures_util::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Ok(LineItem::Line(_))));
        assert!(matches!(items[1], Err(ProxyError::Transport(_))));
    }

    #[tokio::test]
    async fn test_invalid_utf8_keeps_earlier_lines_of_same_read() {
        async fn run(chunks: Vec<&'static [u8]>) -> Vec<Result<LineItem, ProxyError>> {
            let chunks: Vec<Result<bytes::Bytes, std::io::Error>> = chunks
                .into_iter()
                .map(|chunk| Ok(bytes::Bytes::from_static(chunk)))
                .collect();
            upstream_line_stream(futures_util::stream::iter(chunks))
                .collect()
                .await
        }

        let whole = run(vec![b"a:{\"curr\":\"Hi\"}\nb:\xff\n"]).await;
        let split = run(vec![b"a:{\"curr\":\"Hi\"}\n", b"b:\xff\n"]).await;
        for items in [&whole, &split] {
            assert_eq!(items.len(), 2);
            assert_eq!(
                items[0].as_ref().ok(),
                Some(&LineItem::Line("a:{\"curr\":\"Hi\"}".into()))
            );
            assert!(matches!(items[1], Err(ProxyError::Decode(_))));
        }
    }
}
