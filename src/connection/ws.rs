//! WebSocket transport (tokio-tungstenite).
//!
//! Each `connect` spawns one I/O task that owns the socket. Outbound frames
//! reach it over an mpsc channel; everything the socket does is reported
//! back as [`TransportEvent`]s. Like a browser WebSocket, a failure is
//! reported as `Error` followed by `Closed`.

use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::{connect_async_with_config, tungstenite::Message};
use tracing::{debug, info, warn};

use super::transport::{
    ConnectionId, Transport, TransportError, TransportEvent, TransportEventKind,
    TransportEventSender,
};

/// Socket limits for the scoring link.
#[derive(Debug, Clone)]
pub struct WsTransportConfig {
    pub max_message_size: usize,
    pub max_frame_size: usize,
}

impl Default for WsTransportConfig {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024, // 16MB max message
            max_frame_size: 4 * 1024 * 1024,    // 4MB max frame
        }
    }
}

#[derive(Debug)]
enum Outbound {
    Text(String),
    Close,
}

pub struct WsTransport {
    config: WsTransportConfig,
    outbound: Option<mpsc::UnboundedSender<Outbound>>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    pub fn new(config: WsTransportConfig) -> Self {
        Self {
            config,
            outbound: None,
            task: None,
        }
    }
}

impl Default for WsTransport {
    fn default() -> Self {
        Self::new(WsTransportConfig::default())
    }
}

impl Transport for WsTransport {
    fn connect(&mut self, endpoint: &str, id: ConnectionId, events: TransportEventSender) {
        self.close();

        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let endpoint = endpoint.to_string();
        let config = self.config.clone();
        self.outbound = Some(out_tx);
        self.task = Some(tokio::spawn(async move {
            run_link(endpoint, id, events, out_rx, config).await;
        }));
    }

    fn send(&mut self, frame: String) -> Result<(), TransportError> {
        let outbound = self.outbound.as_ref().ok_or(TransportError::NotLinked)?;
        outbound
            .send(Outbound::Text(frame))
            .map_err(|_| TransportError::ChannelClosed)
    }

    fn close(&mut self) {
        if let Some(outbound) = self.outbound.take() {
            // The task sends a close frame and exits on its own.
            if outbound.send(Outbound::Close).is_err() {
                debug!("ws task already gone at close");
            }
        }
        self.task = None;
    }
}

impl Drop for WsTransport {
    fn drop(&mut self) {
        self.close();
    }
}

fn report(events: &TransportEventSender, id: ConnectionId, kind: TransportEventKind) {
    // The controller may already be gone during shutdown.
    let _ = events.send(TransportEvent::new(id, kind));
}

fn report_failure(events: &TransportEventSender, id: ConnectionId, error: String) {
    report(events, id, TransportEventKind::Error(error.clone()));
    report(
        events,
        id,
        TransportEventKind::Closed {
            code: None,
            reason: error,
        },
    );
}

/// Binary frames are logged like text; invalid UTF-8 is replaced, not dropped.
fn binary_to_text(id: ConnectionId, data: Vec<u8>) -> String {
    match String::from_utf8(data) {
        Ok(text) => text,
        Err(e) => {
            debug!(%id, bytes = e.as_bytes().len(), "non-utf8 binary frame decoded lossily");
            String::from_utf8_lossy(e.as_bytes()).into_owned()
        }
    }
}

async fn run_link(
    endpoint: String,
    id: ConnectionId,
    events: TransportEventSender,
    mut out_rx: mpsc::UnboundedReceiver<Outbound>,
    config: WsTransportConfig,
) {
    let request = match endpoint.as_str().into_client_request() {
        Ok(r) => r,
        Err(e) => {
            warn!(%id, endpoint = %endpoint, error = %e, "invalid websocket endpoint");
            report_failure(&events, id, format!("invalid endpoint: {e}"));
            return;
        }
    };

    let ws_config = WebSocketConfig {
        max_message_size: Some(config.max_message_size),
        max_frame_size: Some(config.max_frame_size),
        accept_unmasked_frames: false,
        ..Default::default()
    };

    let (ws_stream, response) = match connect_async_with_config(request, Some(ws_config), false).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(%id, endpoint = %endpoint, error = %e, "websocket connect failed");
            report_failure(&events, id, format!("connect failed: {e}"));
            return;
        }
    };

    info!(%id, status = %response.status(), "websocket handshake complete");
    report(&events, id, TransportEventKind::Opened);

    let (mut write, mut read) = ws_stream.split();

    loop {
        tokio::select! {
            out = out_rx.recv() => {
                match out {
                    Some(Outbound::Text(frame)) => {
                        if let Err(e) = write.send(Message::Text(frame)).await {
                            warn!(%id, error = %e, "websocket write failed");
                            report_failure(&events, id, format!("write failed: {e}"));
                            return;
                        }
                    }
                    Some(Outbound::Close) | None => {
                        let _ = write.send(Message::Close(None)).await;
                        let _ = write.close().await;
                        debug!(%id, "websocket closed by client");
                        report(&events, id, TransportEventKind::Closed {
                            code: None,
                            reason: "closed by client".to_string(),
                        });
                        return;
                    }
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        report(&events, id, TransportEventKind::Message(text));
                    }
                    Some(Ok(Message::Binary(data))) => {
                        report(&events, id, TransportEventKind::Message(binary_to_text(id, data)));
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let (code, reason) = match frame {
                            Some(f) => (Some(u16::from(f.code)), f.reason.into_owned()),
                            None => (None, String::new()),
                        };
                        info!(%id, ?code, %reason, "websocket closed by server");
                        report(&events, id, TransportEventKind::Closed { code, reason });
                        return;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(%id, error = %e, "websocket read error");
                        report_failure(&events, id, format!("read failed: {e}"));
                        return;
                    }
                    None => {
                        info!(%id, "websocket stream ended");
                        report(&events, id, TransportEventKind::Closed {
                            code: None,
                            reason: "stream ended".to_string(),
                        });
                        return;
                    }
                }
            }
        }
    }
}
