//! Transport seam between the connection state machine and real I/O.
//!
//! A transport never touches `ConnectionState`. It only reports what the
//! wire did, tagged with the attempt it belongs to, on an unbounded channel
//! drained by the controller loop.

use tokio::sync::mpsc;
use tracing::debug;

/// Identifies one connection attempt. Events from superseded attempts are
/// discarded by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// What the wire reported.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEventKind {
    Opened,
    Message(String),
    Error(String),
    Closed { code: Option<u16>, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransportEvent {
    pub connection: ConnectionId,
    pub kind: TransportEventKind,
}

impl TransportEvent {
    pub fn new(connection: ConnectionId, kind: TransportEventKind) -> Self {
        Self { connection, kind }
    }
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

pub fn event_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::unbounded_channel()
}

/// Failure to hand a frame to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No live link (never connected, or already torn down).
    NotLinked,
    /// The I/O task exited before the frame could be queued.
    ChannelClosed,
    Rejected(String),
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotLinked => write!(f, "transport has no live link"),
            Self::ChannelClosed => write!(f, "transport task has exited"),
            Self::Rejected(reason) => write!(f, "frame rejected: {}", reason),
        }
    }
}

impl std::error::Error for TransportError {}

/// A physical connection owned by a [`super::ConnectionManager`].
pub trait Transport {
    /// Begin one connection attempt. Must not block and must not fail:
    /// problems are reported as `Error` followed by `Closed` on `events`.
    fn connect(&mut self, endpoint: &str, id: ConnectionId, events: TransportEventSender);

    /// Queue one text frame on the live link.
    fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Tear the link down. Safe to call at any time, any number of times.
    fn close(&mut self);
}

/// In-process transport: records outbound frames and lets the caller
/// script what the "wire" reports. Backs `--dry-run` and the test suites.
#[derive(Debug, Default)]
pub struct MemoryTransport {
    auto_open: bool,
    link: Option<(ConnectionId, TransportEventSender)>,
    endpoints: Vec<String>,
    sent: Vec<String>,
    closes: usize,
    reject_sends: bool,
}

impl MemoryTransport {
    /// A transport whose connection attempts stay pending until an event is
    /// injected.
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport that reports `Opened` as soon as `connect` is called.
    pub fn auto_open() -> Self {
        Self {
            auto_open: true,
            ..Self::default()
        }
    }

    /// Make every subsequent `send` fail as if the I/O task had died.
    pub fn reject_sends(&mut self, reject: bool) {
        self.reject_sends = reject;
    }

    /// Report `kind` for the current attempt. Returns false if there is no
    /// attempt to report on.
    pub fn inject(&self, kind: TransportEventKind) -> bool {
        match &self.link {
            Some((id, events)) => events.send(TransportEvent::new(*id, kind)).is_ok(),
            None => false,
        }
    }

    pub fn current(&self) -> Option<ConnectionId> {
        self.link.as_ref().map(|(id, _)| *id)
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    pub fn sent(&self) -> &[String] {
        &self.sent
    }

    pub fn close_count(&self) -> usize {
        self.closes
    }
}

impl Transport for MemoryTransport {
    fn connect(&mut self, endpoint: &str, id: ConnectionId, events: TransportEventSender) {
        self.endpoints.push(endpoint.to_string());
        if self.auto_open {
            let _ = events.send(TransportEvent::new(id, TransportEventKind::Opened));
        }
        self.link = Some((id, events));
    }

    fn send(&mut self, frame: String) -> Result<(), TransportError> {
        if self.link.is_none() {
            return Err(TransportError::NotLinked);
        }
        if self.reject_sends {
            return Err(TransportError::ChannelClosed);
        }
        debug!(bytes = frame.len(), "memory transport frame");
        self.sent.push(frame);
        Ok(())
    }

    fn close(&mut self) {
        if self.link.take().is_some() {
            self.closes += 1;
        }
    }
}
