//! Connection management for one chat context.
//!
//! A `ConnectionManager` owns at most one active [`SseTransport`] and the
//! tool snapshot discovered over it. Instances are caller-owned, one per
//! conversation; nothing here is global. State transitions are applied
//! atomically before or after suspending calls, never interleaved with
//! them, so concurrent readers (UI polling) never observe a half-updated
//! connection.

use crate::core::config::data::{ReconnectConfig, ServerDescriptor, TimeoutConfig};
use crate::mcp::events::InboundEvent;
use crate::mcp::registry::ToolRegistry;
use crate::mcp::transport::SseTransport;
use crate::utils::url::server_base_url;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const HTTP_CONNECT_TIMEOUT_SECONDS: u64 = 10;
const HTTP_REQUEST_TIMEOUT_SECONDS: u64 = 60;
const HTTP_POOL_IDLE_TIMEOUT_SECONDS: u64 = 90;
const HTTP_POOL_MAX_IDLE_PER_HOST: usize = 8;

fn build_http_client() -> Result<reqwest::Client, String> {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECONDS))
        .pool_idle_timeout(Duration::from_secs(HTTP_POOL_IDLE_TIMEOUT_SECONDS))
        .pool_max_idle_per_host(HTTP_POOL_MAX_IDLE_PER_HOST)
        .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECONDS))
        .build()
        .map_err(|err| err.to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Error,
}

/// Observable connection state for one chat context.
#[derive(Debug, Clone)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    /// Assigned only by the remote server on handshake.
    pub session_id: Option<String>,
    pub last_error: Option<String>,
    pub server: Option<ServerDescriptor>,
    /// Set when the stream opened but no client id arrived within the
    /// handshake grace window. Deliberately distinct from `Error`: callers
    /// can offer a lighter re-handshake before a full reconnect.
    pub client_id_missing: bool,
}

impl ConnectionState {
    fn disconnected() -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            session_id: None,
            last_error: None,
            server: None,
            client_id_missing: false,
        }
    }
}

/// State-change notifications for the embedding UI.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    StateChanged(ConnectionState),
}

pub struct ConnectionManager {
    http: reqwest::Client,
    timeouts: TimeoutConfig,
    reconnect: ReconnectConfig,
    state: ConnectionState,
    transport: Option<Arc<SseTransport>>,
    transport_events: Option<mpsc::UnboundedReceiver<InboundEvent>>,
    registry: ToolRegistry,
    state_tx: Option<mpsc::UnboundedSender<ConnectionEvent>>,
}

impl ConnectionManager {
    pub fn new(timeouts: TimeoutConfig, reconnect: ReconnectConfig) -> Result<Self, String> {
        Ok(Self {
            http: build_http_client().map_err(|err| format!("Failed to build HTTP client: {err}"))?,
            timeouts,
            reconnect,
            state: ConnectionState::disconnected(),
            transport: None,
            transport_events: None,
            registry: ToolRegistry::default(),
            state_tx: None,
        })
    }

    /// Register a sender for state-change events.
    pub fn set_event_sender(&mut self, sender: mpsc::UnboundedSender<ConnectionEvent>) {
        self.state_tx = Some(sender);
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn transport(&self) -> Option<Arc<SseTransport>> {
        self.transport.clone()
    }

    pub fn client_id_missing(&self) -> bool {
        self.state.client_id_missing
    }

    fn emit_state(&self) {
        if let Some(tx) = &self.state_tx {
            let _ = tx.send(ConnectionEvent::StateChanged(self.state.clone()));
        }
    }

    fn set_error(&mut self, message: String) {
        self.state.status = ConnectionStatus::Error;
        self.state.last_error = Some(message);
        self.emit_state();
    }

    /// Establish a connection to `server`.
    ///
    /// Fails fast when another attempt is already in flight for a different
    /// server; one active connection per chat context. On success the
    /// session id is set from the handshake and tool discovery has run
    /// exactly once. Discovery failure fails the whole attempt: it is a
    /// protocol error and is not retried silently.
    pub async fn connect(&mut self, server: ServerDescriptor) -> Result<(), String> {
        if self.state.status == ConnectionStatus::Connecting {
            if self.state.server.as_ref() != Some(&server) {
                return Err(format!(
                    "A connection attempt to {} is already in flight.",
                    self.state
                        .server
                        .as_ref()
                        .map(|s| s.display_name.as_str())
                        .unwrap_or("another server")
                ));
            }
        }
        if self.state.status == ConnectionStatus::Connected
            && self.state.server.as_ref() == Some(&server)
        {
            return Ok(());
        }

        self.teardown_transport();
        self.state = ConnectionState {
            status: ConnectionStatus::Connecting,
            session_id: None,
            last_error: None,
            server: Some(server.clone()),
            client_id_missing: false,
        };
        self.emit_state();

        let base_url = server_base_url(&server);
        let request_timeout = Duration::from_secs(self.timeouts.request_secs);

        let (transport, mut events) =
            match SseTransport::open(&base_url, self.http.clone(), request_timeout).await {
                Ok(opened) => opened,
                Err(err) => {
                    let message = format!("Failed to open event stream: {err}");
                    self.set_error(message.clone());
                    return Err(message);
                }
            };

        // Race the handshake against its grace window. A stream that opened
        // but never assigns a client id is the clientIdMissing anomaly, not
        // a connection error.
        let handshake = tokio::time::timeout(
            Duration::from_secs(self.timeouts.handshake_secs),
            await_session_assignment(&mut events),
        )
        .await;

        let session_id = match handshake {
            Ok(Ok(client_id)) => Some(client_id),
            Ok(Err(err)) => {
                transport.close();
                let message = format!("Handshake failed: {err}");
                self.set_error(message.clone());
                return Err(message);
            }
            Err(_) => {
                warn!(server = %server.id, "Stream open but no client id within grace window");
                None
            }
        };

        let registry = match ToolRegistry::discover(&self.http, &base_url).await {
            Ok(registry) => registry,
            Err(err) => {
                transport.close();
                let message = format!("Tool discovery failed: {err}");
                self.set_error(message.clone());
                return Err(message);
            }
        };

        debug!(server = %server.id, session = ?session_id, "Connected to tool server");
        self.registry = registry;
        self.transport = Some(Arc::new(transport));
        self.transport_events = Some(events);
        self.state = ConnectionState {
            status: ConnectionStatus::Connected,
            client_id_missing: session_id.is_none(),
            session_id,
            last_error: None,
            server: Some(server),
        };
        self.emit_state();
        Ok(())
    }

    /// Tear down the transport and reset to `Disconnected`. Safe to call
    /// when already disconnected.
    pub fn disconnect(&mut self) {
        self.teardown_transport();
        self.registry = ToolRegistry::default();
        self.state = ConnectionState::disconnected();
        self.emit_state();
    }

    /// Disconnect, then connect to the same server again.
    pub async fn reconnect(&mut self) -> Result<(), String> {
        let Some(server) = self.state.server.clone() else {
            return Err("No server to reconnect to.".to_string());
        };
        self.disconnect();
        self.state.server = Some(server.clone());
        self.connect(server).await
    }

    /// Lighter-weight recovery for the clientIdMissing anomaly: open a
    /// fresh event stream and wait for a session assignment, keeping the
    /// discovered tool snapshot and connected status.
    pub async fn rehandshake(&mut self) -> Result<(), String> {
        if self.state.status != ConnectionStatus::Connected {
            return Err("Not connected; use connect() instead.".to_string());
        }
        let Some(server) = self.state.server.clone() else {
            return Err("No server selected.".to_string());
        };

        let base_url = server_base_url(&server);
        let request_timeout = Duration::from_secs(self.timeouts.request_secs);
        let (transport, mut events) =
            SseTransport::open(&base_url, self.http.clone(), request_timeout)
                .await
                .map_err(|err| format!("Failed to open event stream: {err}"))?;

        let handshake = tokio::time::timeout(
            Duration::from_secs(self.timeouts.handshake_secs),
            await_session_assignment(&mut events),
        )
        .await;

        match handshake {
            Ok(Ok(client_id)) => {
                self.teardown_transport();
                self.transport = Some(Arc::new(transport));
                self.transport_events = Some(events);
                self.state.session_id = Some(client_id);
                self.state.client_id_missing = false;
                self.emit_state();
                Ok(())
            }
            Ok(Err(err)) => {
                transport.close();
                Err(format!("Re-handshake failed: {err}"))
            }
            Err(_) => {
                transport.close();
                Err("Re-handshake timed out without a client id.".to_string())
            }
        }
    }

    /// Drain pending transport events, updating connection state.
    ///
    /// Returns the drained events so callers can fail in-flight command
    /// records when the stream went away. No ordering survives across a
    /// reconnect; records dispatched on the old transport are not serviced
    /// by the new one.
    pub fn poll_transport_events(&mut self) -> Vec<InboundEvent> {
        // Take the receiver out before touching any other state; it goes
        // back afterwards unless the stream ended.
        let Some(mut events) = self.transport_events.take() else {
            return Vec::new();
        };

        let mut drained = Vec::new();
        let mut stream_ended = false;
        while let Ok(event) = events.try_recv() {
            stream_ended = matches!(
                event,
                InboundEvent::StreamError(_) | InboundEvent::StreamClosed
            );
            drained.push(event);
            if stream_ended {
                break;
            }
        }
        if !stream_ended {
            self.transport_events = Some(events);
        }

        for event in &drained {
            match event {
                InboundEvent::SessionAssigned(client_id) => {
                    // A late assignment clears the anomaly in place.
                    self.state.session_id = Some(client_id.clone());
                    self.state.client_id_missing = false;
                    self.emit_state();
                }
                InboundEvent::StreamError(err) => {
                    warn!(error = %err, "Tool server stream failed");
                    self.teardown_transport();
                    self.state.status = ConnectionStatus::Error;
                    self.state.session_id = None;
                    self.state.client_id_missing = false;
                    self.state.last_error = Some(err.clone());
                    self.emit_state();
                }
                InboundEvent::StreamClosed => {
                    self.teardown_transport();
                    self.state.status = ConnectionStatus::Disconnected;
                    self.state.session_id = None;
                    self.state.client_id_missing = false;
                    self.emit_state();
                }
                InboundEvent::ToolResult { .. } => {}
            }
        }
        drained
    }

    /// Bounded automatic recovery after a transport-reported error.
    ///
    /// Retries `reconnect()` with exponential backoff up to the configured
    /// cap, then surfaces `Error` and leaves remediation to the caller.
    pub async fn recover_from_stream_error(&mut self) -> Result<(), String> {
        let mut last_error = String::from("no attempts made");
        for attempt in 0..self.reconnect.max_attempts {
            let delay = reconnect_delay_ms(self.reconnect.base_delay_ms, attempt);
            tokio::time::sleep(Duration::from_millis(delay)).await;

            debug!(attempt = attempt + 1, "Automatic reconnect attempt");
            match self.reconnect().await {
                Ok(()) => return Ok(()),
                Err(err) => last_error = err,
            }
        }

        let message = format!(
            "Gave up after {} reconnect attempts: {last_error}",
            self.reconnect.max_attempts
        );
        self.set_error(message.clone());
        Err(message)
    }

    fn teardown_transport(&mut self) {
        if let Some(transport) = self.transport.take() {
            transport.close();
        }
        self.transport_events = None;
    }
}

const MAX_RECONNECT_DELAY_MS: u64 = 30_000;

/// Exponential backoff delay for reconnect attempt `attempt`, clamped so
/// arbitrary configured attempt counts can neither overflow the shift nor
/// produce multi-day sleeps.
fn reconnect_delay_ms(base_delay_ms: u64, attempt: u32) -> u64 {
    let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
    base_delay_ms
        .saturating_mul(factor)
        .min(MAX_RECONNECT_DELAY_MS)
}

async fn await_session_assignment(
    events: &mut mpsc::UnboundedReceiver<InboundEvent>,
) -> Result<String, String> {
    loop {
        match events.recv().await {
            Some(InboundEvent::SessionAssigned(client_id)) => return Ok(client_id),
            Some(InboundEvent::StreamError(err)) => return Err(err),
            Some(InboundEvent::StreamClosed) => {
                return Err("Stream closed during handshake.".to_string())
            }
            Some(InboundEvent::ToolResult { .. }) => continue,
            None => return Err("Transport task ended unexpectedly.".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> ConnectionManager {
        ConnectionManager::new(TimeoutConfig::default(), ReconnectConfig::default())
            .expect("manager should build")
    }

    #[test]
    fn starts_disconnected() {
        let manager = manager();
        assert_eq!(manager.state().status, ConnectionStatus::Disconnected);
        assert!(manager.state().session_id.is_none());
        assert!(!manager.client_id_missing());
    }

    #[test]
    fn disconnect_is_idempotent() {
        let mut manager = manager();
        manager.disconnect();
        manager.disconnect();
        assert_eq!(manager.state().status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn reconnect_without_server_fails() {
        let mut manager = manager();
        let err = manager.reconnect().await.expect_err("expected error");
        assert!(err.contains("No server"));
    }

    #[test]
    fn reconnect_delay_doubles_then_clamps() {
        assert_eq!(reconnect_delay_ms(500, 0), 500);
        assert_eq!(reconnect_delay_ms(500, 1), 1000);
        assert_eq!(reconnect_delay_ms(500, 2), 2000);
        assert_eq!(reconnect_delay_ms(500, 20), MAX_RECONNECT_DELAY_MS);
        assert_eq!(reconnect_delay_ms(500, 64), MAX_RECONNECT_DELAY_MS);
        assert_eq!(reconnect_delay_ms(500, u32::MAX), MAX_RECONNECT_DELAY_MS);
        assert_eq!(reconnect_delay_ms(0, 64), 0);
    }

    #[tokio::test]
    async fn rehandshake_requires_connected_state() {
        let mut manager = manager();
        let err = manager.rehandshake().await.expect_err("expected error");
        assert!(err.contains("Not connected"));
    }
}
