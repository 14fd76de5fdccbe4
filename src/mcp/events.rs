use serde_json::Value;

/// Framed events arriving on a tool server's SSE stream.
///
/// The stream is a single ordered sequence; a `ToolResult` for a given
/// invocation is never delivered before that invocation's request was
/// acknowledged.
#[derive(Debug, Clone)]
pub enum InboundEvent {
    /// First handshake event; carries the server-assigned client id that
    /// scopes all subsequent requests on this connection.
    SessionAssigned(String),
    /// Correlated response to an `invoke_tool` request. `payload` is the
    /// full event object, including the `type` field (`tool_result` or
    /// `error`).
    ToolResult { id: String, payload: Value },
    /// I/O failure on the stream. The transport self-closes after this.
    StreamError(String),
    /// The server ended the stream without error.
    StreamClosed,
}
