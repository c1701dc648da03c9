//! Connection Manager
//!
//! Owns the single link to the scoring service and the lifecycle state
//! machine on top of it:
//!
//! ```text
//! Connecting --opened--> Connected
//! Connecting | Connected --error--> Error
//! Connecting | Connected | Error --closed--> Disconnected
//! ```
//!
//! State only moves in response to transport events. Failures never surface
//! as `Err` to callers; they show up as transitions. Nothing here retries:
//! callers may `open` again once the link is down.

pub mod transport;
pub mod ws;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

pub use transport::{
    event_channel, ConnectionId, MemoryTransport, Transport, TransportError, TransportEvent,
    TransportEventKind, TransportEventReceiver, TransportEventSender,
};
pub use ws::{WsTransport, WsTransportConfig};

const OBSERVER_CAPACITY: usize = 256;

/// Lifecycle stage of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Error,
    Disconnected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connecting => write!(f, "Connecting"),
            Self::Connected => write!(f, "Connected"),
            Self::Error => write!(f, "Error"),
            Self::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Lifecycle notification delivered to observers.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    Opened,
    MessageReceived(String),
    Errored(String),
    Closed,
}

/// Result of [`ConnectionManager::send`].
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Sent,
    NotConnected(ConnectionState),
    Failed(TransportError),
}

impl SendOutcome {
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// Per-manager counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct ConnectionStats {
    pub open_attempts: u64,
    pub opened: u64,
    pub errors: u64,
    pub closed: u64,
    pub frames_sent: u64,
    pub sends_rejected: u64,
    pub messages_received: u64,
    pub stale_events: u64,
}

pub struct ConnectionManager<T: Transport> {
    transport: T,
    state: ConnectionState,
    endpoint: Option<String>,
    current: Option<ConnectionId>,
    next_id: u64,
    events_tx: TransportEventSender,
    observers: broadcast::Sender<ConnectionEvent>,
    stats: ConnectionStats,
}

impl<T: Transport> ConnectionManager<T> {
    /// `events_tx` is handed to the transport on every `open`; the paired
    /// receiver must be drained into [`Self::handle_transport_event`].
    pub fn new(transport: T, events_tx: TransportEventSender) -> Self {
        let (observers, _) = broadcast::channel(OBSERVER_CAPACITY);
        Self {
            transport,
            state: ConnectionState::Disconnected,
            endpoint: None,
            current: None,
            next_id: 1,
            events_tx,
            observers,
            stats: ConnectionStats::default(),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    pub fn endpoint(&self) -> Option<&str> {
        self.endpoint.as_deref()
    }

    pub fn current_connection(&self) -> Option<ConnectionId> {
        self.current
    }

    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.observers.subscribe()
    }

    /// Start one connection attempt. A no-op while an attempt is already
    /// pending or live.
    pub fn open(&mut self, endpoint: &str) {
        if matches!(
            self.state,
            ConnectionState::Connecting | ConnectionState::Connected
        ) {
            warn!(state = %self.state, endpoint, "open ignored: connection already active");
            return;
        }

        // A lingering Error-state link is torn down before the new attempt.
        if self.current.is_some() {
            self.transport.close();
        }

        let id = ConnectionId(self.next_id);
        self.next_id += 1;
        self.current = Some(id);
        self.endpoint = Some(endpoint.to_string());
        self.stats.open_attempts += 1;
        self.transition(ConnectionState::Connecting);

        info!(%id, endpoint, "🔌 Opening connection");
        self.transport.connect(endpoint, id, self.events_tx.clone());
    }

    /// Transmit one text frame if the connection is open.
    pub fn send(&mut self, frame: String) -> SendOutcome {
        if self.state != ConnectionState::Connected {
            self.stats.sends_rejected += 1;
            warn!(state = %self.state, "send skipped: connection is not open");
            return SendOutcome::NotConnected(self.state);
        }

        match self.transport.send(frame) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                SendOutcome::Sent
            }
            Err(e) => {
                self.stats.sends_rejected += 1;
                warn!(error = %e, "send failed");
                SendOutcome::Failed(e)
            }
        }
    }

    /// Tear down the link from any state. Idempotent. Returns the `Closed`
    /// event when this call moved the state to Disconnected.
    pub fn close(&mut self) -> Option<ConnectionEvent> {
        if self.current.take().is_some() {
            self.transport.close();
        }
        if self.state == ConnectionState::Disconnected {
            return None;
        }
        info!("Connection closed locally");
        self.stats.closed += 1;
        self.transition(ConnectionState::Disconnected);
        Some(self.notify(ConnectionEvent::Closed))
    }

    /// Apply one transport report to the state machine. Returns the
    /// lifecycle event it produced, if any.
    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Option<ConnectionEvent> {
        if self.current != Some(event.connection) {
            self.stats.stale_events += 1;
            debug!(connection = %event.connection, kind = ?event.kind, "stale transport event dropped");
            return None;
        }

        let produced = match (self.state, event.kind) {
            (ConnectionState::Connecting, TransportEventKind::Opened) => {
                self.stats.opened += 1;
                info!(connection = %event.connection, "✅ Connection open");
                self.transition(ConnectionState::Connected);
                ConnectionEvent::Opened
            }
            (ConnectionState::Connected, TransportEventKind::Message(text)) => {
                self.stats.messages_received += 1;
                ConnectionEvent::MessageReceived(text)
            }
            (
                ConnectionState::Connecting | ConnectionState::Connected,
                TransportEventKind::Error(reason),
            ) => {
                self.stats.errors += 1;
                warn!(connection = %event.connection, %reason, "connection error");
                self.transition(ConnectionState::Error);
                ConnectionEvent::Errored(reason)
            }
            (
                ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Error,
                TransportEventKind::Closed { code, reason },
            ) => {
                self.stats.closed += 1;
                info!(connection = %event.connection, ?code, %reason, "Connection closed by transport");
                self.current = None;
                self.transport.close();
                self.transition(ConnectionState::Disconnected);
                ConnectionEvent::Closed
            }
            (state, kind) => {
                debug!(%state, ?kind, "transport event ignored in current state");
                return None;
            }
        };

        Some(self.notify(produced))
    }

    fn transition(&mut self, to: ConnectionState) {
        let from = self.state;
        if from != to {
            debug!(%from, %to, "connection_transition");
            self.state = to;
        }
    }

    fn notify(&self, event: ConnectionEvent) -> ConnectionEvent {
        // Nobody listening is fine.
        let _ = self.observers.send(event.clone());
        event
    }
}

impl<T: Transport> Drop for ConnectionManager<T> {
    fn drop(&mut self) {
        self.close();
    }
}
