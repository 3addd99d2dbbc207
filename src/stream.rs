//! Streaming response parsing.
//!
//! `:streamQuery` answers with newline-delimited JSON, or with SSE `data:`
//! lines when `alt=sse` is requested. Each line is parsed on its own; a line
//! that is not JSON is yielded as a string and logged, never dropped.

use std::sync::Arc;

use futures::stream::{BoxStream, StreamExt};
use serde_json::Value;
use tracing::warn;

use crate::error::AgentEngineResult;
use crate::transport::{ByteStream, Transport};
use crate::types::QueryRequest;

/// Stream of parsed response lines.
pub type ValueStream = BoxStream<'static, AgentEngineResult<Value>>;

/// How lines are framed in the response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    /// One JSON document per line.
    JsonLines,
    /// Server-sent events; payloads arrive in `data:` fields.
    Sse,
}

/// Parse a body chunk stream into JSON values, in order.
///
/// Chunks are buffered as bytes, so a UTF-8 sequence split across chunks is
/// reassembled before decoding. A trailing line without a newline is parsed
/// when the body ends.
pub fn parse_lines(mut chunks: ByteStream, framing: Framing) -> ValueStream {
    async_stream::stream! {
        let mut buffer: Vec<u8> = Vec::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(e);
                    return;
                }
            };
            buffer.extend_from_slice(&chunk);

            while let Some(pos) = buffer.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = buffer.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&line[..line.len() - 1]).into_owned();
                if let Some(value) = parse_line(&line, framing) {
                    yield Ok(value);
                }
            }
        }

        if !buffer.is_empty() {
            let line = String::from_utf8_lossy(&buffer).into_owned();
            if let Some(value) = parse_line(&line, framing) {
                yield Ok(value);
            }
        }
    }
    .boxed()
}

/// Issue `:streamQuery` on first poll and parse the response lazily.
///
/// Nothing is sent until the returned stream is polled, and exactly one
/// transport call is made however much of the stream is consumed.
pub fn lazy_stream_query(
    transport: Arc<dyn Transport>,
    resource_name: String,
    request: QueryRequest,
    framing: Framing,
) -> ValueStream {
    async_stream::stream! {
        let sse = framing == Framing::Sse;
        let chunks = match transport.stream_query(&resource_name, &request, sse).await {
            Ok(chunks) => chunks,
            Err(e) => {
                yield Err(e);
                return;
            }
        };
        let mut values = parse_lines(chunks, framing);
        while let Some(value) = values.next().await {
            yield value;
        }
    }
    .boxed()
}

/// SSE field names that carry no payload.
const SSE_CONTROL_FIELDS: [&str; 3] = ["event:", "id:", "retry:"];

/// Parse one line. `None` for blank lines and SSE control lines.
pub(crate) fn parse_line(line: &str, framing: Framing) -> Option<Value> {
    let line = line.trim_end_matches('\r');
    if line.trim().is_empty() {
        return None;
    }

    let payload = match framing {
        Framing::JsonLines => line,
        Framing::Sse => {
            if line.starts_with(':') || SSE_CONTROL_FIELDS.iter().any(|f| line.starts_with(f)) {
                return None;
            }
            match line.strip_prefix("data:") {
                Some(data) => {
                    let data = data.trim();
                    if data.is_empty() || data == "[DONE]" {
                        return None;
                    }
                    data
                }
                None => {
                    warn!("stream line is not SSE-framed, passing it through: {line}");
                    line
                }
            }
        }
    };

    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("failed to parse response line as JSON ({e}): {payload}");
            Some(Value::String(payload.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;

    fn chunks(parts: &[&[u8]]) -> ByteStream {
        let owned: Vec<AgentEngineResult<Vec<u8>>> =
            parts.iter().map(|p| Ok(p.to_vec())).collect();
        stream::iter(owned).boxed()
    }

    #[tokio::test]
    async fn json_lines_across_chunks() {
        let body = chunks(&[b"{\"a\":", b"1}\n\n{\"b\":2}", b"\nnot json\n{\"c\":3}"]);
        let values: Vec<Value> = parse_lines(body, Framing::JsonLines)
            .map(|v| v.unwrap())
            .collect()
            .await;
        assert_eq!(
            values,
            vec![json!({"a": 1}), json!({"b": 2}), json!("not json"), json!({"c": 3})]
        );
    }

    #[tokio::test]
    async fn split_utf8_sequence() {
        let text = "{\"t\":\"é\"}\n".as_bytes();
        let body = chunks(&[&text[..7], &text[7..]]);
        let values: Vec<Value> = parse_lines(body, Framing::JsonLines)
            .map(|v| v.unwrap())
            .collect()
            .await;
        assert_eq!(values, vec![json!({"t": "é"})]);
    }

    #[test]
    fn sse_lines() {
        assert_eq!(parse_line("data: {\"x\":1}", Framing::Sse), Some(json!({"x": 1})));
        assert_eq!(parse_line(": keepalive", Framing::Sse), None);
        assert_eq!(parse_line("event: update", Framing::Sse), None);
        assert_eq!(parse_line("data: [DONE]", Framing::Sse), None);
        assert_eq!(parse_line("data: raw", Framing::Sse), Some(json!("raw")));
        assert_eq!(parse_line("id: 7", Framing::Sse), None);
        assert_eq!(parse_line("retry: 1000", Framing::Sse), None);
    }

    #[tokio::test]
    async fn unframed_lines_in_sse_mode_pass_through() {
        let body = chunks(&[b"{\"chunk\": 1}\n", b"data: {\"chunk\": 2}\nplain\n"]);
        let values: Vec<Value> = parse_lines(body, Framing::Sse)
            .map(|v| v.unwrap())
            .collect()
            .await;
        assert_eq!(
            values,
            vec![json!({"chunk": 1}), json!({"chunk": 2}), json!("plain")]
        );
    }

    #[tokio::test]
    async fn transport_errors_end_the_stream() {
        let body: ByteStream = stream::iter(vec![
            Ok(b"{\"a\":1}\n".to_vec()),
            Err(crate::error::AgentEngineError::Transport("reset".into())),
            Ok(b"{\"b\":2}\n".to_vec()),
        ])
        .boxed();
        let items: Vec<AgentEngineResult<Value>> =
            parse_lines(body, Framing::JsonLines).collect().await;
        assert_eq!(items.len(), 2);
        assert!(items[1].is_err());
    }
}
