//! Pacemaker Client
//!
//! Single responsibility: keep one logical connection to the pacemaker alive
//! and let many tasks exchange heartbeat messages over it.
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                   PacemakerClient                       │
//! │  - Exposes send() to callers                            │
//! │  - Owns the reconnect timer                             │
//! └────────────────────────────────────────────────────────┘
//!          │                  │                   │
//!          ▼                  ▼                   ▼
//!     Correlator     ConnectionStateMachine   ReconnectScheduler
//!    (slots, ids)     (handle, readiness)      (backoff timer)
//!                             ▲
//!                             │ TransportEvents
//!                        Transport
//! ```
//!
//! # Usage
//!
//! ```ignore
//! let transport = Arc::new(WebSocketTransport::from_config(&config)?);
//! let client = PacemakerClient::connect(config, transport).await?;
//!
//! let response = client.send(HeartbeatMessage::request(payload)).await?;
//!
//! client.shutdown().await;
//! ```
//!
//! # Reconnection Policy
//!
//! Reconnection runs in the background. When the live connection closes
//! without a shutdown, every in-flight request is marked for resubmission
//! and a dial is scheduled after a backoff delay. Senders keep waiting
//! through the outage and retransmit once the new connection is ready.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use crate::auth::ClientIdentity;
use crate::backoff::BackoffPolicy;
use crate::config::ClientConfig;
use crate::connection::{ConnectionStateMachine, LifecycleState};
use crate::correlator::{Correlator, CorrelatorConfig};
use crate::error::PacemakerError;
use crate::message::{HeartbeatMessage, MessageKind};
use crate::reconnect::ReconnectScheduler;
use crate::transport::{Connection, Transport, TransportEvents};

/// A heartbeat client for one pacemaker endpoint.
///
/// Cheap to clone; clones share the same connection and slots.
///
/// # Guarantees
///
/// - At most `max_pending` requests are in flight; further sends wait
/// - A response only ever reaches the sender whose request carried its id
/// - `shutdown()` wakes every waiting sender and releases the transport once
#[derive(Clone)]
pub struct PacemakerClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    identity: ClientIdentity,
    address: String,
    transport: Arc<dyn Transport>,
    link: ConnectionStateMachine,
    correlator: Correlator,
    scheduler: ReconnectScheduler,
}

impl PacemakerClient {
    /// Create the client and issue the first dial.
    ///
    /// Returns once the dial is issued, not once it succeeds. Senders wait
    /// for readiness on their own.
    ///
    /// # Errors
    /// - `Config` for unusable configuration values
    /// - `AuthConfig` if the auth method needs a secret that was not given
    pub async fn connect(
        config: ClientConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, PacemakerError> {
        config.validate()?;
        let method = config.auth();
        let identity = ClientIdentity::new(&config.name, method, config.digest_secret.clone())?;

        info!(
            client = %identity.name(),
            address = %config.url(),
            auth = %method,
            "Creating pacemaker client"
        );

        let inner = Arc::new(ClientInner {
            identity,
            address: config.url(),
            transport,
            link: ConnectionStateMachine::new(method.requires_handshake()),
            correlator: Correlator::new(CorrelatorConfig {
                capacity: config.max_pending,
                response_wait: config.response_wait(),
                ready_wait: config.ready_wait(),
                max_resubmits: config.max_resubmits,
            }),
            scheduler: ReconnectScheduler::new(BackoffPolicy::from_config(&config.backoff)),
        });

        ClientInner::dial(Arc::clone(&inner)).await;
        Ok(Self { inner })
    }

    /// Send a request and wait for its response.
    ///
    /// Waits for a free slot when `max_pending` requests are already in
    /// flight, and for the connection to become ready.
    ///
    /// # Errors
    /// - `Shutdown` if the client is, or becomes, shut down
    /// - `ConnectionLost` if the connection was torn down too many times
    ///   while this request was in flight
    pub async fn send(&self, request: HeartbeatMessage) -> Result<HeartbeatMessage, PacemakerError> {
        if self.inner.link.is_shutdown() {
            return Err(PacemakerError::Shutdown);
        }
        self.inner.correlator.send(request, &self.inner.link).await
    }

    /// Close the current connection only. No reconnect is scheduled;
    /// senders keep waiting for the next connection to become ready.
    pub async fn close(&self) {
        info!(client = %self.inner.identity.name(), "Closing pacemaker connection");
        self.inner.link.close().await;
    }

    /// Close the current connection now and schedule a redial after the
    /// backoff delay. In-flight requests are resubmitted once it is ready.
    pub async fn reconnect(&self) {
        if self.inner.link.is_shutdown() {
            return;
        }
        info!(client = %self.inner.identity.name(), "Reconnect requested");
        self.inner.link.close().await;
        self.inner.correlator.clear_in_flight();
        ClientInner::schedule_reconnect(&self.inner).await;
    }

    /// Shut the client down for good. Idempotent.
    ///
    /// Wakes every sender (they fail with `Shutdown`), cancels any pending
    /// reconnect, closes the connection and releases the transport.
    pub async fn shutdown(&self) {
        if !self.inner.link.shutdown().await {
            debug!("Shutdown already done");
            return;
        }
        self.inner.scheduler.cancel().await;
        self.inner.correlator.shutdown();
        self.inner.transport.release().await;
        info!(client = %self.inner.identity.name(), "Pacemaker client shut down");
    }

    pub fn name(&self) -> &str {
        self.inner.identity.name()
    }

    pub fn secret_key(&self) -> Option<&str> {
        self.inner.identity.secret()
    }

    pub fn state(&self) -> LifecycleState {
        self.inner.link.state()
    }

    /// Reconnect attempts scheduled since the last successful connect.
    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.scheduler.attempts()
    }

    pub fn in_flight(&self) -> usize {
        self.inner.correlator.in_flight()
    }

    pub fn capacity(&self) -> usize {
        self.inner.correlator.capacity()
    }
}

impl ClientInner {
    fn events(inner: &Arc<ClientInner>) -> Arc<dyn TransportEvents> {
        Arc::new(ClientEvents(Arc::downgrade(inner)))
    }

    /// Issue a dial. A dial that fails straight away is handled like a
    /// reported connect failure.
    fn dial(inner: Arc<ClientInner>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if !inner.link.begin_dial().await {
                return;
            }
            let events = ClientInner::events(&inner);
            if let Err(e) = inner.transport.dial(&inner.address, events).await {
                warn!(address = %inner.address, error = %e, "Dial failed");
                inner.link.dial_failed().await;
                ClientInner::schedule_reconnect(&inner).await;
            }
        })
    }

    async fn schedule_reconnect(inner: &Arc<ClientInner>) {
        if inner.link.is_shutdown() {
            return;
        }
        let weak = Arc::downgrade(inner);
        inner
            .scheduler
            .schedule(move || async move {
                if let Some(inner) = weak.upgrade() {
                    ClientInner::reconnect_now(inner).await;
                }
            })
            .await;
    }

    async fn reconnect_now(inner: Arc<ClientInner>) {
        if inner.link.is_shutdown() {
            return;
        }
        info!(address = %inner.address, "Reconnecting to pacemaker");
        inner.link.close().await;
        ClientInner::dial(inner).await;
    }
}

/// Routes transport callbacks into the client.
///
/// Holds a weak reference so connection tasks never keep a dropped client
/// alive.
struct ClientEvents(Weak<ClientInner>);

#[async_trait]
impl TransportEvents for ClientEvents {
    async fn on_connected(&self, connection: Arc<dyn Connection>) {
        let Some(inner) = self.0.upgrade() else {
            connection.close().await;
            return;
        };
        inner.link.on_connected(connection).await;
        inner.scheduler.reset();
    }

    async fn on_ready(&self, connection_id: u64) {
        if let Some(inner) = self.0.upgrade() {
            if !inner.link.on_ready(connection_id).await {
                debug!(connection_id = connection_id, "Ignoring ready for stale connection");
            }
        }
    }

    async fn on_message(&self, connection_id: u64, message: HeartbeatMessage) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };

        if inner.link.current_id().await != Some(connection_id) {
            debug!(
                connection_id = connection_id,
                message_id = message.message_id(),
                "Dropping message from stale connection"
            );
            return;
        }

        if message.kind() != MessageKind::Response {
            warn!(
                connection_id = connection_id,
                kind = message.kind().as_str(),
                "Unexpected message kind"
            );
            return;
        }

        match inner.correlator.deliver(message) {
            Ok(slot) => debug!(slot = slot, "Delivered response"),
            Err(PacemakerError::BadCorrelationId(id)) => {
                error!(message_id = id, "Got Response with bad id")
            }
            Err(e) => debug!(error = %e, "Dropping response"),
        }
    }

    async fn on_closed(&self, connection_id: u64) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        if !inner.link.on_closed(connection_id).await {
            return;
        }
        inner.correlator.clear_in_flight();
        ClientInner::schedule_reconnect(&inner).await;
    }

    async fn on_connect_failed(&self, error: PacemakerError) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        warn!(address = %inner.address, error = %error, "Connect failed");
        inner.link.dial_failed().await;
        ClientInner::schedule_reconnect(&inner).await;
    }
}
