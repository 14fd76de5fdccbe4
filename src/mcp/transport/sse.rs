//! Streaming SSE transport for a single tool server connection.
//!
//! One transport instance maps to one `GET /sse` stream. Inbound frames are
//! decoded on a background task: the handshake and stream-health events are
//! forwarded to the owner (the connection manager), while correlated
//! `tool_result` frames are routed to the oneshot waiter registered by
//! [`SseTransport::invoke`]. Any I/O failure self-closes the transport and
//! fails every pending waiter; resumption is the connection manager's job.

use crate::mcp::events::InboundEvent;
use crate::mcp::transport::{
    decode_inbound_event, is_event_stream_content_type, sse_data_payload, unwrap_tool_result,
    InvokeError, SseLineBuffer, ToolTransport,
};
use crate::utils::id::next_message_id;
use crate::utils::url::construct_endpoint_url;
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

struct TransportShared {
    /// Server-assigned client id, set by the first `connected` frame.
    client_id: Mutex<Option<String>>,
    /// Waiters keyed by message id. `None` means the transport is closed
    /// and no further requests may be registered.
    pending: Mutex<Option<HashMap<String, oneshot::Sender<Value>>>>,
}

impl TransportShared {
    /// Drops every registered waiter, failing their receivers, and refuses
    /// future registrations.
    fn close_pending(&self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.take();
        }
    }
}

pub struct SseTransport {
    base_url: String,
    http: reqwest::Client,
    request_timeout: Duration,
    shared: Arc<TransportShared>,
    listener: JoinHandle<()>,
}

impl SseTransport {
    /// Open the event stream and start the listener task.
    ///
    /// Returns once the server has accepted the stream (HTTP success with an
    /// event-stream content type); the session id arrives later as an
    /// [`InboundEvent::SessionAssigned`] on the returned receiver.
    pub async fn open(
        base_url: &str,
        http: reqwest::Client,
        request_timeout: Duration,
    ) -> Result<(Self, mpsc::UnboundedReceiver<InboundEvent>), String> {
        let stream_url = construct_endpoint_url(base_url, "sse");
        debug!(url = %stream_url, "Opening tool server event stream");

        let response = http
            .get(&stream_url)
            .header("Accept", "text/event-stream")
            .send()
            .await
            .map_err(|err| err.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("");
        if !is_event_stream_content_type(content_type) {
            return Err(format!(
                "Expected an event stream, got content type: {content_type}"
            ));
        }

        let shared = Arc::new(TransportShared {
            client_id: Mutex::new(None),
            pending: Mutex::new(Some(HashMap::new())),
        });
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let listener = tokio::spawn(run_listener(response, Arc::clone(&shared), events_tx));

        Ok((
            Self {
                base_url: base_url.to_string(),
                http,
                request_timeout,
                shared,
                listener,
            },
            events_rx,
        ))
    }

    /// The client id assigned on handshake, if one has arrived yet.
    pub fn client_id(&self) -> Option<String> {
        self.shared.client_id.lock().ok().and_then(|id| id.clone())
    }

    /// True once the stream has errored, ended, or been closed locally.
    pub fn is_closed(&self) -> bool {
        self.shared
            .pending
            .lock()
            .map(|pending| pending.is_none())
            .unwrap_or(true)
    }

    /// Tear down the stream and fail every in-flight waiter. Idempotent.
    pub fn close(&self) {
        self.listener.abort();
        self.shared.close_pending();
    }

    /// Post one tool invocation request. The HTTP response is only an
    /// acknowledgement; the result arrives on the event stream.
    pub async fn send(
        &self,
        message_id: &str,
        tool: &str,
        parameters: &Value,
    ) -> Result<(), String> {
        let Some(client_id) = self.client_id() else {
            return Err("No client id assigned; re-handshake required.".to_string());
        };

        let body = serde_json::json!({
            "id": message_id,
            "type": "invoke_tool",
            "content": {
                "name": tool,
                "parameters": parameters,
            },
            "clientId": client_id,
        });

        debug!(message_id = %message_id, tool = %tool, "Sending tool invocation");
        let response = self
            .http
            .post(construct_endpoint_url(&self.base_url, "messages"))
            .json(&body)
            .send()
            .await
            .map_err(|err| err.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }
        Ok(())
    }

    fn register_waiter(&self, message_id: &str) -> Result<oneshot::Receiver<Value>, InvokeError> {
        let mut pending = self
            .shared
            .pending
            .lock()
            .map_err(|_| InvokeError::ConnectionLost)?;
        let Some(pending) = pending.as_mut() else {
            return Err(InvokeError::ConnectionLost);
        };
        let (tx, rx) = oneshot::channel();
        pending.insert(message_id.to_string(), tx);
        Ok(rx)
    }

    fn remove_waiter(&self, message_id: &str) {
        if let Ok(mut pending) = self.shared.pending.lock() {
            if let Some(pending) = pending.as_mut() {
                pending.remove(message_id);
            }
        }
    }
}

#[async_trait]
impl ToolTransport for SseTransport {
    async fn invoke(&self, tool: &str, parameters: Value) -> Result<Value, InvokeError> {
        let message_id = next_message_id();
        let receiver = self.register_waiter(&message_id)?;

        if let Err(err) = self.send(&message_id, tool, &parameters).await {
            self.remove_waiter(&message_id);
            return Err(InvokeError::Rejected(err));
        }

        match tokio::time::timeout(self.request_timeout, receiver).await {
            Ok(Ok(payload)) => unwrap_tool_result(payload).map_err(InvokeError::Rejected),
            Ok(Err(_)) => Err(InvokeError::ConnectionLost),
            Err(_) => {
                self.remove_waiter(&message_id);
                Err(InvokeError::Timeout)
            }
        }
    }
}

impl Drop for SseTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_listener(
    response: reqwest::Response,
    shared: Arc<TransportShared>,
    events_tx: mpsc::UnboundedSender<InboundEvent>,
) {
    let mut stream = response.bytes_stream();
    let mut buffer = SseLineBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(err) => {
                shared.close_pending();
                let _ = events_tx.send(InboundEvent::StreamError(err.to_string()));
                return;
            }
        };

        for line in buffer.push(&chunk) {
            handle_line(&line, &shared, &events_tx);
        }
    }

    for line in buffer.finish() {
        handle_line(&line, &shared, &events_tx);
    }

    shared.close_pending();
    let _ = events_tx.send(InboundEvent::StreamClosed);
}

fn handle_line(
    line: &str,
    shared: &Arc<TransportShared>,
    events_tx: &mpsc::UnboundedSender<InboundEvent>,
) {
    let Some(payload) = sse_data_payload(line) else {
        return;
    };
    if payload.is_empty() {
        return;
    }

    match decode_inbound_event(payload) {
        Some(InboundEvent::SessionAssigned(client_id)) => {
            if let Ok(mut slot) = shared.client_id.lock() {
                *slot = Some(client_id.clone());
            }
            let _ = events_tx.send(InboundEvent::SessionAssigned(client_id));
        }
        Some(InboundEvent::ToolResult { id, payload }) => {
            let waiter = shared
                .pending
                .lock()
                .ok()
                .and_then(|mut pending| pending.as_mut().and_then(|map| map.remove(&id)));
            match waiter {
                Some(tx) => {
                    let _ = tx.send(payload);
                }
                None => {
                    warn!(message_id = %id, "Dropping tool result with no awaiting caller");
                }
            }
        }
        Some(other) => {
            let _ = events_tx.send(other);
        }
        None => {
            debug!(payload = %payload, "Skipping unrecognized stream frame");
        }
    }
}
