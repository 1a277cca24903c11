//! WebSocket Transport
//!
//! Single responsibility: Carry pacemaker envelopes over a WebSocket and report
//! connection lifecycle to the client.
//!
//! Each dial runs in its own task:
//!
//! ```text
//! connect ──► on_connected ──► [handshake] ──► on_ready ──► read loop ──► on_closed
//!    │
//!    └─ failure ──► on_connect_failed
//! ```
//!
//! Writes go through an mpsc queue drained by a writer task, so `send` never
//! holds the socket across an await in the caller.

use async_trait::async_trait;
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{
    connect_async_with_config,
    tungstenite::{http::Request, protocol::Message, protocol::WebSocketConfig},
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, error, info, warn};

use super::protocol::{decode_message, encode_message};
use super::{Connection, Transport, TransportEvents};
use crate::auth::{authenticator_for, Authenticator, ClientIdentity, SaslExchange};
use crate::config::ClientConfig;
use crate::error::PacemakerError;
use crate::message::HeartbeatMessage;

/// Type alias for the WebSocket send half
pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>, Message>;

/// Type alias for the WebSocket receive half
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Outbound messages buffered per connection before `send` waits.
const OUTBOUND_QUEUE: usize = 1000;

/// Transport that dials `ws://` endpoints.
pub struct WebSocketTransport {
    authenticator: Option<Arc<dyn Authenticator>>,
    max_message_bytes: usize,
    next_id: AtomicU64,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    released: AtomicBool,
}

impl WebSocketTransport {
    /// Transport with no authentication handshake.
    pub fn new(max_message_bytes: usize) -> Self {
        Self {
            authenticator: None,
            max_message_bytes,
            next_id: AtomicU64::new(1),
            tasks: Mutex::new(Vec::new()),
            released: AtomicBool::new(false),
        }
    }

    /// Transport with the bundled authenticator for the configured method.
    pub fn from_config(config: &ClientConfig) -> Result<Self, PacemakerError> {
        let method = config.auth();
        let identity = ClientIdentity::new(&config.name, method, config.digest_secret.clone())?;
        let mut transport = Self::new(config.max_message_bytes);
        transport.authenticator = authenticator_for(method, &identity)?;
        Ok(transport)
    }

    /// Replace the handshake, e.g. with an application-provided Kerberos one.
    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn dial(
        &self,
        address: &str,
        events: Arc<dyn TransportEvents>,
    ) -> Result<(), PacemakerError> {
        if self.released.load(Ordering::SeqCst) {
            return Err(PacemakerError::Transport("Transport has been released".into()));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        debug!(connection_id = id, address = %address, "Dialing pacemaker");

        let task = tokio::spawn(run_connection(
            id,
            address.to_string(),
            self.max_message_bytes,
            self.authenticator.clone(),
            events,
        ));

        let mut tasks = self.tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
        Ok(())
    }

    async fn release(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            task.abort();
        }
        debug!("WebSocket transport released");
    }
}

/// Handle given to the client for one WebSocket connection.
struct WsConnection {
    id: u64,
    outbound: mpsc::Sender<Message>,
    closing: watch::Sender<bool>,
}

#[async_trait]
impl Connection for WsConnection {
    fn id(&self) -> u64 {
        self.id
    }

    async fn send(&self, message: HeartbeatMessage) -> Result<(), PacemakerError> {
        if *self.closing.borrow() {
            return Err(PacemakerError::Transport(format!(
                "Connection {} is closed",
                self.id
            )));
        }
        let bytes = encode_message(&message)?;
        self.outbound
            .send(Message::Binary(bytes))
            .await
            .map_err(|_| PacemakerError::Transport(format!("Connection {} writer gone", self.id)))
    }

    async fn close(&self) {
        if !self.closing.send_replace(true) {
            debug!(connection_id = self.id, "Closing connection");
        }
    }
}

/// Handshake channel over a connection that is not yet ready.
struct WsExchange<'a> {
    outbound: mpsc::Sender<Message>,
    stream: &'a mut WsStream,
    max_message_bytes: usize,
}

#[async_trait]
impl SaslExchange for WsExchange<'_> {
    async fn send(&mut self, message: HeartbeatMessage) -> Result<(), PacemakerError> {
        let bytes = encode_message(&message)?;
        self.outbound
            .send(Message::Binary(bytes))
            .await
            .map_err(|_| PacemakerError::Transport("Writer gone during handshake".into()))
    }

    async fn recv(&mut self) -> Result<Option<HeartbeatMessage>, PacemakerError> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Binary(data))) => {
                    return decode_message(&data, self.max_message_bytes).map(Some)
                }
                Some(Ok(Message::Close(_))) | None => return Ok(None),
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(PacemakerError::Transport(format!("WebSocket error: {}", e)))
                }
            }
        }
    }
}

/// Connect, hand the connection to the client, then pump inbound messages.
async fn run_connection(
    id: u64,
    url: String,
    max_message_bytes: usize,
    authenticator: Option<Arc<dyn Authenticator>>,
    events: Arc<dyn TransportEvents>,
) {
    let (sink, mut stream) = match connect(&url, max_message_bytes).await {
        Ok(split) => split,
        Err(e) => {
            warn!(connection_id = id, error = %e, "Dial failed");
            events.on_connect_failed(e).await;
            return;
        }
    };

    let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE);
    let (closing_tx, closing_rx) = watch::channel(false);
    let writer = tokio::spawn(writer_loop(id, sink, outbound_rx, closing_rx.clone()));

    let connection = Arc::new(WsConnection {
        id,
        outbound: outbound_tx.clone(),
        closing: closing_tx,
    });
    info!(connection_id = id, url = %url, "Connected to pacemaker");
    events.on_connected(connection.clone()).await;

    if let Some(authenticator) = authenticator {
        let mut exchange = WsExchange {
            outbound: outbound_tx,
            stream: &mut stream,
            max_message_bytes,
        };
        match authenticator.authenticate(&mut exchange).await {
            Ok(()) => events.on_ready(id).await,
            Err(e) => {
                error!(connection_id = id, method = %authenticator.method(), error = %e, "Authentication failed");
                connection.close().await;
                let _ = writer.await;
                events.on_closed(id).await;
                return;
            }
        }
    }

    read_loop(id, &mut stream, max_message_bytes, closing_rx, events.as_ref()).await;

    connection.close().await;
    let _ = writer.await;
    debug!(connection_id = id, "Connection task ended");
    events.on_closed(id).await;
}

async fn read_loop(
    id: u64,
    stream: &mut WsStream,
    max_message_bytes: usize,
    mut closing: watch::Receiver<bool>,
    events: &dyn TransportEvents,
) {
    loop {
        let next = tokio::select! {
            _ = closed(&mut closing) => break,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(Message::Binary(data))) => match decode_message(&data, max_message_bytes) {
                Ok(message) => events.on_message(id, message).await,
                Err(e) => warn!(connection_id = id, error = %e, "Dropping undecodable message"),
            },
            Some(Ok(Message::Close(frame))) => {
                info!(connection_id = id, frame = ?frame, "Pacemaker closed connection");
                break;
            }
            Some(Ok(_)) => {
                // Ping/pong are handled by tungstenite; text frames are not part of the protocol
            }
            Some(Err(e)) => {
                warn!(connection_id = id, error = %e, "WebSocket error");
                break;
            }
            None => break,
        }
    }
}

async fn writer_loop(
    id: u64,
    mut sink: WsSink,
    mut outbound: mpsc::Receiver<Message>,
    mut closing: watch::Receiver<bool>,
) {
    loop {
        let next = tokio::select! {
            _ = closed(&mut closing) => break,
            next = outbound.recv() => next,
        };
        let Some(message) = next else { break };
        if let Err(e) = sink.send(message).await {
            warn!(connection_id = id, error = %e, "Failed to write to pacemaker");
            break;
        }
    }
    let _ = sink.close().await;
}

/// Resolves once the connection is marked closing, or its handle is gone.
async fn closed(closing: &mut watch::Receiver<bool>) {
    while !*closing.borrow_and_update() {
        if closing.changed().await.is_err() {
            return;
        }
    }
}

/// Connect to the pacemaker with proper headers
async fn connect(url: &str, max_message_bytes: usize) -> Result<(WsSink, WsStream), PacemakerError> {
    let request = Request::builder()
        .uri(url)
        .header("Host", extract_host(url))
        .header("Connection", "Upgrade")
        .header("Upgrade", "websocket")
        .header("Sec-WebSocket-Version", "13")
        .header(
            "Sec-WebSocket-Key",
            tokio_tungstenite::tungstenite::handshake::client::generate_key(),
        )
        .body(())
        .map_err(|e| PacemakerError::Transport(format!("Failed to build request: {}", e)))?;

    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(max_message_bytes);

    let (ws, _) = connect_async_with_config(request, Some(ws_config), true)
        .await
        .map_err(|e| PacemakerError::Transport(format!("WebSocket connect failed: {}", e)))?;

    Ok(ws.split())
}

/// Extract host from URL for Host header
fn extract_host(url: &str) -> &str {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("localhost")
}
