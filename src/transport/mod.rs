//! Transport capability
//!
//! The client never touches sockets or bytes. A [`Transport`] dials the
//! service and reports what happens to each connection through
//! [`TransportEvents`]; the client holds the resulting [`Connection`] handle
//! and uses it only to send messages and to close it.
//!
//! | Module      | Responsibility                              |
//! |-------------|---------------------------------------------|
//! | `protocol`  | Msgpack envelope encode/decode              |
//! | `websocket` | Bundled WebSocket transport                 |

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::PacemakerError;
use crate::message::HeartbeatMessage;

pub mod protocol;
pub mod websocket;

pub use websocket::WebSocketTransport;

/// Dials the pacemaker service.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start connecting to `address`.
    ///
    /// Returning Ok means the attempt was issued, not that it succeeded.
    /// Success surfaces later as [`TransportEvents::on_connected`], failure
    /// as [`TransportEvents::on_connect_failed`].
    async fn dial(
        &self,
        address: &str,
        events: Arc<dyn TransportEvents>,
    ) -> Result<(), PacemakerError>;

    /// Free everything the transport holds. Called once, on client shutdown.
    async fn release(&self);
}

/// One live connection to the service.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Transport-assigned id, unique per connection.
    fn id(&self) -> u64;

    /// Queue a message for transmission.
    async fn send(&self, message: HeartbeatMessage) -> Result<(), PacemakerError>;

    /// Close the connection. Safe to call more than once.
    async fn close(&self);
}

/// Lifecycle and inbound-message callbacks, invoked from transport tasks.
#[async_trait]
pub trait TransportEvents: Send + Sync {
    /// Transport-level connect finished.
    async fn on_connected(&self, connection: Arc<dyn Connection>);

    /// Authentication on this connection finished.
    async fn on_ready(&self, connection_id: u64);

    /// A message was decoded from this connection.
    async fn on_message(&self, connection_id: u64, message: HeartbeatMessage);

    /// This connection ended.
    async fn on_closed(&self, connection_id: u64);

    /// A dial never produced a connection.
    async fn on_connect_failed(&self, error: PacemakerError);
}
