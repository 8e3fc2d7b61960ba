// Decoding of the newline-delimited JSON body of a streaming `generate` call.

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use std::collections::VecDeque;

use super::TextStream;
use crate::errors::CodeboxError;

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
}

fn decode_line(line: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(line);
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    match serde_json::from_str::<GenerateChunk>(text) {
        Ok(chunk) => Some(chunk.response),
        Err(e) => {
            tracing::warn!("Skipping malformed stream line: {}", e);
            None
        }
    }
}

/// Splits arbitrary byte chunks into complete lines.
#[derive(Debug, Default)]
pub(crate) struct NdjsonDecoder {
    buffer: Vec<u8>,
}

impl NdjsonDecoder {
    pub(crate) fn new() -> NdjsonDecoder {
        NdjsonDecoder::default()
    }

    /// Returns the `response` of every line completed by `bytes`.
    pub(crate) fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(bytes);
        let mut out = Vec::new();
        while let Some(newline) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            out.extend(decode_line(&line));
        }
        out
    }

    /// Decodes a trailing line that had no newline.
    pub(crate) fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        decode_line(&rest)
    }
}

struct DecodeState<S> {
    body: std::pin::Pin<Box<S>>,
    decoder: NdjsonDecoder,
    pending: VecDeque<String>,
    done: bool,
}

pub(crate) fn decode_stream<S, E>(body: S) -> TextStream
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send + 'static,
    E: Into<CodeboxError> + Send + 'static,
{
    let state = DecodeState {
        body: Box::pin(body),
        decoder: NdjsonDecoder::new(),
        pending: VecDeque::new(),
        done: false,
    };
    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(text) = state.pending.pop_front() {
                return Some((Ok(text), state));
            }
            if state.done {
                return None;
            }
            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let decoded = state.decoder.push(&bytes);
                    state.pending.extend(decoded);
                }
                Some(Err(e)) => {
                    state.done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.done = true;
                    let rest = state.decoder.finish();
                    state.pending.extend(rest);
                }
            }
        }
    })
    .boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::CodeboxErrorType;

    #[test]
    fn lines_split_across_chunks() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(br#"{"response":"Hel"#).is_empty());
        assert_eq!(
            decoder.push(b"lo\"}\n{\"response\":\" world\"}\n"),
            vec!["Hello", " world"]
        );
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn malformed_and_blank_lines_are_skipped() {
        let mut decoder = NdjsonDecoder::new();
        let out = decoder.push(b"not json\n\n{\"response\":\"ok\",\"done\":false}\n");
        assert_eq!(out, vec!["ok"]);
    }

    #[test]
    fn trailing_line_is_flushed() {
        let mut decoder = NdjsonDecoder::new();
        assert!(decoder.push(br#"{"response":"tail","done":true}"#).is_empty());
        assert_eq!(decoder.finish(), Some("tail".to_string()));
    }

    #[tokio::test]
    async fn stream_yields_chunks_then_error() {
        let body = futures_util::stream::iter(vec![
            Ok(Bytes::from_static(b"{\"response\":\"a\"}\n{\"resp")),
            Ok(Bytes::from_static(b"onse\":\"b\"}\n")),
            Err(CodeboxError::new(CodeboxErrorType::ProviderError, "reset".to_string())),
        ]);
        let items: Vec<_> = decode_stream(body).collect().await;
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_ref().unwrap(), "a");
        assert_eq!(items[1].as_ref().unwrap(), "b");
        assert_eq!(items[2].as_ref().unwrap_err().message, "reset");
    }
}
