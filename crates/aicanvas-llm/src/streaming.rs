//! Incremental decoding of line-oriented response bodies.
//!
//! Two layers: [`LineBuffer`] turns arbitrary byte chunks into complete
//! lines, and the line interpreters ([`decode_ollama_line`], [`MarkerDecoder`])
//! turn lines into reply fragments. Output never depends on where the
//! transport happened to split the body.

use std::collections::VecDeque;

use futures::stream::{self, Stream, StreamExt};
use serde::Deserialize;
use tracing::trace;

use aicanvas_core::error::{CanvasError, Result};
use aicanvas_core::traits::FragmentStream;
use aicanvas_core::types::BackendKind;

use crate::providers::error_message;

/// Prefix of a data line in the relay protocol.
pub const MARKER: &str = "data:";

/// Splits a byte stream into lines, buffering partial lines across chunks.
///
/// Splitting happens on raw bytes, so a multi-byte UTF-8 sequence cut by a
/// chunk boundary is reassembled before it is decoded.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one chunk and return every line it completed.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut lines = Vec::new();
        let mut start = 0;
        while let Some(offset) = self.pending[start..].iter().position(|b| *b == b'\n') {
            let end = start + offset;
            lines.push(decode_line(&self.pending[start..end]));
            start = end + 1;
        }
        self.pending.drain(..start);
        lines
    }

    /// Flush a trailing line that had no terminating newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = decode_line(&self.pending);
        self.pending.clear();
        Some(line)
    }
}

fn decode_line(bytes: &[u8]) -> String {
    let bytes = bytes.strip_suffix(b"\r").unwrap_or(bytes);
    String::from_utf8_lossy(bytes).into_owned()
}

/// One decoded Ollama chat line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OllamaChunk {
    pub content: Option<String>,
    pub done: bool,
}

#[derive(Deserialize)]
struct OllamaLine {
    #[serde(default)]
    message: Option<OllamaLineMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct OllamaLineMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Interpret one newline-delimited JSON line from Ollama's chat stream.
///
/// Blank lines yield `None`. A line carrying an `error` object, or one that
/// is not JSON at all, aborts the stream.
pub fn decode_ollama_line(line: &str) -> Result<Option<OllamaChunk>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| CanvasError::StreamProtocol {
            backend: BackendKind::Ollama,
            message: format!("malformed stream line: {}", e),
        })?;

    if let Some(message) = error_message(&value) {
        return Err(CanvasError::StreamProtocol {
            backend: BackendKind::Ollama,
            message,
        });
    }

    let parsed: OllamaLine =
        serde_json::from_value(value).map_err(|e| CanvasError::StreamProtocol {
            backend: BackendKind::Ollama,
            message: format!("unexpected stream line: {}", e),
        })?;

    Ok(Some(OllamaChunk {
        content: parsed.message.and_then(|m| m.content),
        done: parsed.done,
    }))
}

/// Decoder for the `data: <payload>` relay protocol.
///
/// Consecutive data lines are joined with `\n`; a blank line ends the event.
/// A payload that is a JSON object with an `error` field aborts the stream.
#[derive(Debug, Default)]
pub struct MarkerDecoder {
    data: Vec<String>,
}

impl MarkerDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Push one line; returns a fragment when the line completed an event.
    pub fn push_line(&mut self, line: &str) -> Result<Option<String>> {
        if line.is_empty() {
            if self.data.is_empty() {
                return Ok(None);
            }
            let payload = std::mem::take(&mut self.data).join("\n");
            return interpret_payload(payload).map(Some);
        }

        if let Some(rest) = line.strip_prefix(MARKER) {
            let value = rest.strip_prefix(' ').unwrap_or(rest);
            self.data.push(value.to_string());
        } else {
            // Comments, event names, ids.
            trace!(line, "Ignoring non-data relay line");
        }
        Ok(None)
    }

    /// Flush a trailing event the body never terminated with a blank line.
    pub fn finish(&mut self) -> Result<Option<String>> {
        self.push_line("")
    }
}

fn interpret_payload(payload: String) -> Result<String> {
    if payload.trim_start().starts_with('{') {
        if let Ok(value) = serde_json::from_str::<serde_json::Value>(&payload) {
            if let Some(message) = error_message(&value) {
                return Err(CanvasError::StreamProtocol {
                    backend: BackendKind::Ollama,
                    message,
                });
            }
        }
    }
    Ok(payload)
}

struct LineState<S> {
    inner: S,
    buffer: LineBuffer,
    ready: VecDeque<String>,
    eof: bool,
    backend: BackendKind,
}

/// Turn a raw byte stream into a stream of complete lines.
pub fn lines<S, B, E>(bytes: S, backend: BackendKind) -> impl Stream<Item = Result<String>> + Send
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin,
    B: AsRef<[u8]> + Send,
    E: std::fmt::Display + Send,
{
    let state = LineState {
        inner: bytes,
        buffer: LineBuffer::new(),
        ready: VecDeque::new(),
        eof: false,
        backend,
    };

    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(line) = st.ready.pop_front() {
                return Some((Ok(line), st));
            }
            if st.eof {
                return None;
            }
            match st.inner.next().await {
                Some(Ok(chunk)) => {
                    let completed = st.buffer.feed(chunk.as_ref());
                    st.ready.extend(completed);
                }
                Some(Err(e)) => {
                    st.eof = true;
                    let err = CanvasError::StreamProtocol {
                        backend: st.backend,
                        message: format!("body read failed: {}", e),
                    };
                    return Some((Err(err), st));
                }
                None => {
                    st.eof = true;
                    if let Some(rest) = st.buffer.finish() {
                        st.ready.push_back(rest);
                    }
                }
            }
        }
    })
}

/// Fragments of an Ollama streaming chat body.
///
/// Ends at the first `done` line, at the end of the body, or after the
/// first error.
pub fn ollama_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    lines(bytes, BackendKind::Ollama)
        .scan(false, |finished, item| {
            if *finished {
                return futures::future::ready(None);
            }
            let out = match item.and_then(|line| decode_ollama_line(&line)) {
                Ok(Some(chunk)) => {
                    *finished = chunk.done;
                    Some(chunk.content.filter(|c| !c.is_empty()).map(Ok))
                }
                Ok(None) => Some(None),
                Err(e) => {
                    *finished = true;
                    Some(Some(Err(e)))
                }
            };
            futures::future::ready(out)
        })
        .filter_map(futures::future::ready)
        .boxed()
}

/// Fragments of a relay body written with the `data: ` marker protocol.
pub fn marker_fragments<S, B, E>(bytes: S) -> FragmentStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    // `None` marks the end of the body.
    lines(bytes, BackendKind::Ollama)
        .map(Some)
        .chain(stream::once(futures::future::ready(None)))
        .scan((MarkerDecoder::new(), false), |(decoder, failed), item| {
            if *failed {
                return futures::future::ready(None);
            }
            let decoded = match item {
                Some(line) => line.and_then(|line| decoder.push_line(&line)),
                None => decoder.finish(),
            };
            let out = match decoded {
                Ok(fragment) => Some(fragment.map(Ok)),
                Err(e) => {
                    *failed = true;
                    Some(Some(Err(e)))
                }
            };
            futures::future::ready(out)
        })
        .filter_map(futures::future::ready)
        .boxed()
}

/// Concatenate a fragment stream into the full reply.
pub async fn collect_fragments(mut fragments: FragmentStream) -> Result<String> {
    let mut full = String::new();
    while let Some(fragment) = fragments.next().await {
        full.push_str(&fragment?);
    }
    Ok(full)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunks(parts: Vec<&[u8]>) -> impl Stream<Item = std::result::Result<Vec<u8>, String>> + Send + Unpin {
        stream::iter(parts.into_iter().map(|p| Ok::<_, String>(p.to_vec())).collect::<Vec<_>>())
    }

    #[test]
    fn test_line_buffer_holds_partial_line() {
        let mut buf = LineBuffer::new();
        assert!(buf.feed(b"{\"a\":").is_empty());
        assert_eq!(buf.feed(b"1}\n{\"b\""), vec!["{\"a\":1}"]);
        assert_eq!(buf.finish().as_deref(), Some("{\"b\""));
        assert!(buf.finish().is_none());
    }

    #[test]
    fn test_line_buffer_rejoins_split_utf8() {
        let text = "héllo ✓\n";
        let bytes = text.as_bytes();
        let mut buf = LineBuffer::new();
        let mut out = Vec::new();
        for b in bytes {
            out.extend(buf.feed(std::slice::from_ref(b)));
        }
        assert_eq!(out, vec!["héllo ✓"]);
    }

    #[test]
    fn test_line_buffer_strips_carriage_return() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.feed(b"data: x\r\n\r\n"), vec!["data: x", ""]);
    }

    #[test]
    fn test_decode_ollama_line() {
        let chunk = decode_ollama_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#)
            .unwrap()
            .unwrap();
        assert_eq!(chunk.content.as_deref(), Some("Hi"));
        assert!(!chunk.done);

        assert!(decode_ollama_line("   ").unwrap().is_none());
    }

    #[test]
    fn test_decode_ollama_error_line() {
        let err = decode_ollama_line(r#"{"error":"model 'nope' not found"}"#).unwrap_err();
        match err {
            CanvasError::StreamProtocol { message, .. } => assert!(message.contains("not found")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_decode_ollama_malformed_line() {
        assert!(matches!(
            decode_ollama_line("{not json"),
            Err(CanvasError::StreamProtocol { .. })
        ));
    }

    #[test]
    fn test_marker_decoder_joins_data_lines() {
        let mut dec = MarkerDecoder::new();
        assert!(dec.push_line("data: line one").unwrap().is_none());
        assert!(dec.push_line("data: line two").unwrap().is_none());
        assert_eq!(dec.push_line("").unwrap().as_deref(), Some("line one\nline two"));
        assert!(dec.push_line("").unwrap().is_none());
    }

    #[test]
    fn test_marker_decoder_error_payload() {
        let mut dec = MarkerDecoder::new();
        dec.push_line(r#"data: {"error": "upstream closed"}"#).unwrap();
        assert!(matches!(dec.push_line(""), Err(CanvasError::StreamProtocol { .. })));
    }

    #[test]
    fn test_marker_decoder_keeps_plain_json_payload() {
        let mut dec = MarkerDecoder::new();
        dec.push_line(r#"data: {"answer": 42}"#).unwrap();
        assert_eq!(dec.push_line("").unwrap().as_deref(), Some(r#"{"answer": 42}"#));
    }

    #[tokio::test]
    async fn test_ollama_fragments_stop_at_done() {
        let body: Vec<&[u8]> = vec![
            b"{\"message\":{\"content\":\"Hel\"},\"done\":false}\n{\"message\":{\"con",
            b"tent\":\"lo\"},\"done\":false}\n",
            b"{\"message\":{\"content\":\"\"},\"done\":true}\n{\"message\":{\"content\":\"late\"}}\n",
        ];
        let full = collect_fragments(ollama_fragments(chunks(body))).await.unwrap();
        assert_eq!(full, "Hello");
    }

    #[tokio::test]
    async fn test_ollama_fragments_error_aborts() {
        let body: Vec<&[u8]> = vec![
            b"{\"message\":{\"content\":\"par\"},\"done\":false}\n",
            b"{\"error\":\"out of memory\"}\n",
        ];
        let mut frags = ollama_fragments(chunks(body));
        assert_eq!(frags.next().await.unwrap().unwrap(), "par");
        assert!(frags.next().await.unwrap().is_err());
        assert!(frags.next().await.is_none());
    }

    #[tokio::test]
    async fn test_body_read_failure_is_protocol_error() {
        let body = stream::iter(vec![
            Ok(b"{\"message\":{\"content\":\"a\"}}\n".to_vec()),
            Err("connection reset".to_string()),
        ]);
        let err = collect_fragments(ollama_fragments(body)).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
