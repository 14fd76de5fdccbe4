//! Tool server transport abstractions.
//!
//! The wire protocol is a long-lived `GET /sse` event stream for inbound
//! frames plus a `POST /messages` channel for requests. This module owns
//! the line framing and event decoding shared by the transport
//! implementation and its tests.

use crate::mcp::events::InboundEvent;
use async_trait::async_trait;
use serde_json::Value;
use std::fmt;

pub mod sse;

pub use sse::SseTransport;

/// Failure modes of a correlated tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvokeError {
    /// The stream closed while the request was in flight. Records stuck on
    /// this error must be failed, never retried automatically.
    ConnectionLost,
    /// No correlated result arrived within the per-request timeout.
    Timeout,
    /// The request was not accepted, or the server answered with an error
    /// payload. Raw server text preserved verbatim.
    Rejected(String),
}

impl fmt::Display for InvokeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvokeError::ConnectionLost => write!(f, "connection lost"),
            InvokeError::Timeout => write!(f, "timed out waiting for tool result"),
            InvokeError::Rejected(message) => write!(f, "{message}"),
        }
    }
}

/// Request channel contract the command dispatcher works against.
///
/// Kept narrow so the lifecycle can be exercised with a fake transport.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Send one tool invocation and await its correlated result.
    async fn invoke(&self, tool: &str, parameters: Value) -> Result<Value, InvokeError>;
}

/// Accumulates SSE bytes and yields complete, trimmed lines.
#[derive(Default)]
pub struct SseLineBuffer {
    buffer: Vec<u8>,
}

impl SseLineBuffer {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        self.drain_lines(false)
    }

    pub fn finish(&mut self) -> Vec<String> {
        self.drain_lines(true)
    }

    fn drain_lines(&mut self, flush: bool) -> Vec<String> {
        let mut lines = Vec::new();
        let mut search_index = 0;

        while let Some(relative_pos) = self.buffer[search_index..].iter().position(|b| *b == b'\n')
        {
            let newline_index = search_index + relative_pos;
            let mut line_end = newline_index;
            if line_end > search_index && self.buffer[line_end - 1] == b'\r' {
                line_end -= 1;
            }

            let line_bytes = &self.buffer[search_index..line_end];
            if let Ok(text) = std::str::from_utf8(line_bytes) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }

            search_index = newline_index + 1;
        }

        if flush {
            if let Ok(text) = std::str::from_utf8(&self.buffer[search_index..]) {
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    lines.push(trimmed.to_string());
                }
            }
            self.buffer.clear();
        } else if search_index > 0 {
            self.buffer.drain(..search_index);
        }

        lines
    }
}

pub fn is_event_stream_content_type(content_type: &str) -> bool {
    content_type
        .split(';')
        .next()
        .map(str::trim)
        .is_some_and(|value| value.eq_ignore_ascii_case("text/event-stream"))
}

pub fn sse_data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}

/// Decode one SSE `data:` payload into an inbound event.
///
/// Unknown or malformed frames yield `None` and are skipped; the stream
/// carries heartbeats and log frames the bridge does not consume.
pub fn decode_inbound_event(payload: &str) -> Option<InboundEvent> {
    let value: Value = serde_json::from_str(payload).ok()?;
    match value.get("type").and_then(Value::as_str) {
        Some("connected") => value
            .get("clientId")
            .and_then(Value::as_str)
            .map(|id| InboundEvent::SessionAssigned(id.to_string())),
        Some("tool_result") | Some("error") => {
            let id = value.get("id").and_then(Value::as_str)?.to_string();
            Some(InboundEvent::ToolResult { id, payload: value })
        }
        _ => None,
    }
}

/// Normalize a correlated result event into the tool's payload.
///
/// Servers nest the useful text under `content.content[0].text`, which may
/// itself be JSON. `error`-typed events become `Err` with the server text
/// preserved.
pub fn unwrap_tool_result(payload: Value) -> Result<Value, String> {
    if payload.get("type").and_then(Value::as_str) == Some("error") {
        let message = payload
            .pointer("/content/content/0/text")
            .and_then(Value::as_str)
            .or_else(|| payload.get("content").and_then(Value::as_str))
            .or_else(|| payload.get("error").and_then(Value::as_str))
            .unwrap_or("Tool invocation failed.");
        return Err(message.to_string());
    }

    if let Some(text) = payload
        .pointer("/content/content/0/text")
        .and_then(Value::as_str)
    {
        return Ok(serde_json::from_str(text)
            .unwrap_or_else(|_| serde_json::json!({ "text": text })));
    }

    match payload.get("content") {
        Some(content) => Ok(content.clone()),
        None => Ok(payload),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_buffer_handles_partial_lines() {
        let mut buffer = SseLineBuffer::default();
        assert!(buffer.push(b"data: one").is_empty());
        assert_eq!(buffer.push(b"\n\n"), vec!["data: one"]);
        assert!(buffer.finish().is_empty());
    }

    #[test]
    fn detects_event_stream_content_type() {
        assert!(is_event_stream_content_type(
            "text/event-stream; charset=utf-8"
        ));
        assert!(!is_event_stream_content_type("application/json"));
    }

    #[test]
    fn extracts_sse_payload() {
        assert_eq!(sse_data_payload("data: {\"id\":1}"), Some("{\"id\":1}"));
        assert_eq!(sse_data_payload("event: ping"), None);
    }

    #[test]
    fn decodes_connected_event() {
        let event = decode_inbound_event(r#"{"type":"connected","clientId":"client-9"}"#);
        assert!(matches!(
            event,
            Some(InboundEvent::SessionAssigned(id)) if id == "client-9"
        ));
    }

    #[test]
    fn connected_event_without_client_id_is_skipped() {
        assert!(decode_inbound_event(r#"{"type":"connected"}"#).is_none());
    }

    #[test]
    fn decodes_tool_result_and_error_frames() {
        let result = decode_inbound_event(r#"{"type":"tool_result","id":"msg-1","content":{}}"#);
        assert!(matches!(
            result,
            Some(InboundEvent::ToolResult { id, .. }) if id == "msg-1"
        ));

        let error = decode_inbound_event(r#"{"type":"error","id":"msg-2","content":"nope"}"#);
        assert!(matches!(
            error,
            Some(InboundEvent::ToolResult { id, .. }) if id == "msg-2"
        ));
    }

    #[test]
    fn unknown_frames_are_skipped() {
        assert!(decode_inbound_event(r#"{"type":"heartbeat"}"#).is_none());
        assert!(decode_inbound_event("not json").is_none());
    }

    #[test]
    fn unwraps_nested_json_result_text() {
        let payload = serde_json::json!({
            "type": "tool_result",
            "id": "msg-1",
            "content": { "content": [ { "text": "{\"files\":[\"a.txt\"]}" } ] }
        });
        let value = unwrap_tool_result(payload).expect("result should unwrap");
        assert_eq!(value["files"][0], "a.txt");
    }

    #[test]
    fn unwraps_plain_text_result() {
        let payload = serde_json::json!({
            "type": "tool_result",
            "id": "msg-1",
            "content": { "content": [ { "text": "plain output" } ] }
        });
        let value = unwrap_tool_result(payload).expect("result should unwrap");
        assert_eq!(value["text"], "plain output");
    }

    #[test]
    fn error_frames_preserve_server_text() {
        let payload = serde_json::json!({
            "type": "error",
            "id": "msg-1",
            "content": "tool not allowed"
        });
        let err = unwrap_tool_result(payload).expect_err("expected error");
        assert_eq!(err, "tool not allowed");
    }
}
