//! Incremental Server-Sent-Events decoding
//!
//! Only `data:` payloads matter to the generative endpoint. Comments,
//! `event:`, `id:` and `retry:` fields are skipped, as are `[DONE]`
//! sentinels.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::collections::VecDeque;
use std::fmt::Display;
use std::pin::Pin;

use super::{ApiError, ApiResult};

/// Splits a byte stream into SSE event payloads
///
/// Events are separated by a blank line. Carriage returns are dropped on
/// input so CRLF and LF framing decode the same way.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one network chunk, returning the payloads it completed
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));

        let mut events = Vec::new();
        while let Some(pos) = find_blank_line(&self.buffer) {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            if let Some(data) = event_data(&block[..pos]) {
                events.push(data);
            }
        }
        events
    }

    /// Flush whatever is left once the stream has ended
    pub fn finish(&mut self) -> Option<String> {
        let block = std::mem::take(&mut self.buffer);
        event_data(&block)
    }
}

fn find_blank_line(buffer: &[u8]) -> Option<usize> {
    buffer.windows(2).position(|w| w == b"\n\n")
}

fn event_data(block: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(block);
    let data_lines: Vec<&str> = text
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|value| value.strip_prefix(' ').unwrap_or(value))
        .collect();

    let data = data_lines.join("\n");
    if data.trim().is_empty() || data.trim() == "[DONE]" {
        return None;
    }
    Some(data)
}

struct DecodeState<S> {
    inner: Pin<Box<S>>,
    decoder: SseDecoder,
    pending: VecDeque<String>,
    done: bool,
}

/// Turn a response body into a stream of SSE `data:` payloads
///
/// A body error ends the stream with `ApiError::Transport`.
pub fn data_stream<S, E>(body: S) -> impl Stream<Item = ApiResult<String>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Display,
{
    let state = DecodeState {
        inner: Box::pin(body),
        decoder: SseDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };

    futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(data) = state.pending.pop_front() {
                return Some((Ok(data), state));
            }
            if state.done {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(chunk)) => {
                    let events = state.decoder.push(&chunk);
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.done = true;
                    tracing::error!("Stream body failed: {}", e);
                    return Some((Err(ApiError::Transport(e.to_string())), state));
                }
                None => {
                    state.done = true;
                    state.pending.extend(state.decoder.finish());
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    #[test]
    fn test_single_event() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: {\"a\":1}\n\n");
        assert_eq!(events, vec!["{\"a\":1}".to_string()]);
    }

    #[test]
    fn test_event_split_across_chunks() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: hel").is_empty());
        assert!(decoder.push(b"lo\n").is_empty());
        assert_eq!(decoder.push(b"\ndata: x\n\n"), vec!["hello", "x"]);
    }

    #[test]
    fn test_crlf_framing_and_multiline_data() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b"data: one\r\ndata: two\r\n\r\n");
        assert_eq!(events, vec!["one\ntwo".to_string()]);
    }

    #[test]
    fn test_comments_fields_and_done_are_skipped() {
        let mut decoder = SseDecoder::new();
        let events = decoder.push(b": keepalive\n\nevent: ping\nid: 3\n\ndata: [DONE]\n\n");
        assert!(events.is_empty());
    }

    #[test]
    fn test_utf8_split_inside_payload() {
        let text = "data: caf\u{e9}\n\n".as_bytes();
        let (head, tail) = text.split_at(10);
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(head).is_empty());
        assert_eq!(decoder.push(tail), vec!["caf\u{e9}".to_string()]);
    }

    #[test]
    fn test_finish_flushes_unterminated_event() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: tail").is_empty());
        assert_eq!(decoder.finish().as_deref(), Some("tail"));
        assert!(decoder.finish().is_none());
    }

    #[tokio::test]
    async fn test_data_stream_yields_then_reports_body_error() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"data: a\n\ndata: b\n\n")),
            Err("connection reset"),
        ]);
        let items: Vec<_> = data_stream(body).collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0], Ok("a".to_string()));
        assert_eq!(items[1], Ok("b".to_string()));
        assert!(matches!(items[2], Err(ApiError::Transport(_))));
    }

    #[tokio::test]
    async fn test_data_stream_flushes_at_end() {
        let body = stream::iter(vec![Ok::<_, String>(Bytes::from_static(b"data: last"))]);
        let items: Vec<_> = data_stream(body).collect().await;
        assert_eq!(items, vec![Ok("last".to_string())]);
    }
}
