//! Connection lifecycle
//!
//! Tracks the one logical connection to the pacemaker and owns its handle.
//!
//! ```text
//!                 dial               on_connected          on_ready / no auth
//! Disconnected ─────────► Connecting ────────────► Connected ─────────────────► Ready
//!      ▲                                                                          │
//!      └──────────────────────── on_closed / close ◄─────────────────────────────┘
//!
//! any state ── shutdown ──► ShuttingDown ──► Closed (terminal)
//! ```
//!
//! Senders never poll a flag: readiness is published through a `watch`
//! channel and every state change wakes all waiters at once.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::time::timeout;
use tracing::{debug, info};

use crate::error::PacemakerError;
use crate::transport::Connection;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Disconnected,
    Connecting,
    Connected,
    Ready,
    ShuttingDown,
    Closed,
}

impl LifecycleState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::ShuttingDown | LifecycleState::Closed)
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Disconnected => "disconnected",
            LifecycleState::Connecting => "connecting",
            LifecycleState::Connected => "connected",
            LifecycleState::Ready => "ready",
            LifecycleState::ShuttingDown => "shutting-down",
            LifecycleState::Closed => "closed",
        };
        f.write_str(name)
    }
}

pub struct ConnectionStateMachine {
    /// Whether connected implies ready, or a handshake has to finish first
    auth_required: bool,
    state: watch::Sender<LifecycleState>,
    /// The live handle. At most one exists at a time.
    handle: Mutex<Option<Arc<dyn Connection>>>,
    shutdown: AtomicBool,
}

impl ConnectionStateMachine {
    pub fn new(auth_required: bool) -> Self {
        let (state, _) = watch::channel(LifecycleState::Disconnected);
        Self {
            auth_required,
            state,
            handle: Mutex::new(None),
            shutdown: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Id of the live handle, if any.
    pub async fn current_id(&self) -> Option<u64> {
        self.handle.lock().await.as_ref().map(|h| h.id())
    }

    fn transition(&self, next: LifecycleState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            debug!(from = %previous, to = %next, "Connection state changed");
        }
    }

    /// A dial is about to be issued. Returns false if shut down.
    pub async fn begin_dial(&self) -> bool {
        let _guard = self.handle.lock().await;
        if self.is_shutdown() {
            return false;
        }
        self.transition(LifecycleState::Connecting);
        true
    }

    /// A dial failed before producing a handle.
    pub async fn dial_failed(&self) {
        let guard = self.handle.lock().await;
        if self.is_shutdown() || guard.is_some() {
            return;
        }
        self.transition(LifecycleState::Disconnected);
    }

    /// The transport connected. Closes any previous handle first.
    pub async fn on_connected(&self, connection: Arc<dyn Connection>) {
        let mut handle = self.handle.lock().await;

        if self.is_shutdown() {
            debug!(connection_id = connection.id(), "Connected after shutdown, closing");
            connection.close().await;
            return;
        }

        if let Some(old) = handle.take() {
            debug!(connection_id = old.id(), "Closing previous connection");
            old.close().await;
        }

        info!(connection_id = connection.id(), "Connection established");
        *handle = Some(connection);

        if self.auth_required {
            self.transition(LifecycleState::Connected);
        } else {
            self.transition(LifecycleState::Ready);
        }
    }

    /// Authentication finished on `connection_id`. Returns false if that is
    /// not the live handle.
    pub async fn on_ready(&self, connection_id: u64) -> bool {
        let handle = self.handle.lock().await;
        if self.is_shutdown() || handle.as_ref().map(|h| h.id()) != Some(connection_id) {
            return false;
        }
        info!(connection_id = connection_id, "Connection ready");
        self.transition(LifecycleState::Ready);
        true
    }

    /// `connection_id` ended. Returns true if it was the live handle, in
    /// which case the machine is now `Disconnected`.
    pub async fn on_closed(&self, connection_id: u64) -> bool {
        let mut handle = self.handle.lock().await;
        if handle.as_ref().map(|h| h.id()) != Some(connection_id) {
            return false;
        }
        handle.take();
        if !self.is_shutdown() {
            info!(connection_id = connection_id, "Connection lost");
            self.transition(LifecycleState::Disconnected);
        }
        true
    }

    /// Close the live handle, if any.
    pub async fn close(&self) {
        let mut handle = self.handle.lock().await;
        if let Some(old) = handle.take() {
            old.close().await;
            debug!(connection_id = old.id(), "Connection closed");
        }
        if !self.is_shutdown() {
            self.transition(LifecycleState::Disconnected);
        }
    }

    /// Enter the terminal state. Returns true only for the first call.
    pub async fn shutdown(&self) -> bool {
        if self.shutdown.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.transition(LifecycleState::ShuttingDown);

        let mut handle = self.handle.lock().await;
        if let Some(old) = handle.take() {
            old.close().await;
        }
        self.transition(LifecycleState::Closed);
        true
    }

    /// Wait, at most `wait`, for the connection to be ready.
    ///
    /// Returns the live handle, `ConnectionNotReady` if the wait elapsed, or
    /// `Shutdown` if the client was shut down meanwhile.
    pub async fn wait_until_ready(
        &self,
        wait: Duration,
    ) -> Result<Arc<dyn Connection>, PacemakerError> {
        let mut state = self.state.subscribe();

        let reached = timeout(wait, async {
            loop {
                let current = *state.borrow_and_update();
                if current == LifecycleState::Ready || current.is_terminal() {
                    return current;
                }
                if state.changed().await.is_err() {
                    return LifecycleState::Closed;
                }
            }
        })
        .await;

        match reached {
            Ok(current) if current.is_terminal() => Err(PacemakerError::Shutdown),
            Ok(_) => self.handle.lock().await.clone().ok_or_else(|| {
                PacemakerError::ConnectionNotReady("Ready without a live connection".into())
            }),
            Err(_) => {
                debug!("Waiting for connection to be ready");
                Err(PacemakerError::ConnectionNotReady(
                    "Timed out waiting for connection ready".into(),
                ))
            }
        }
    }
}
