//! Pacemaker Client - heartbeat client for a pacemaker service
//!
//! Keeps one logical connection to the pacemaker and lets many tasks exchange
//! heartbeat messages over it concurrently.
//!
//! ## Architecture
//!
//! | Module       | Responsibility                                        |
//! |--------------|-------------------------------------------------------|
//! | `slots`      | Fixed arena of correlation slots plus the free pool   |
//! | `correlator` | Pairs each response with the request that caused it   |
//! | `connection` | Connection lifecycle and readiness                    |
//! | `reconnect`  | Backoff-driven reconnect timer                        |
//! | `client`     | Composes the above behind `send` / `shutdown`         |
//! | `transport`  | Transport capability, msgpack envelope, WebSocket     |
//! | `auth`       | Authentication methods and the digest handshake       |
//!
//! ## Request Flow
//!
//! ```text
//! caller ─► send ─► slot ─► [wait ready] ─► Connection::send ──► pacemaker
//!                    ▲                                             │
//!                    └──── deliver ◄── on_message ◄── Transport ◄──┘
//! ```

pub mod auth;
pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod message;
pub mod reconnect;
pub mod slots;
pub mod transport;

pub use auth::{AuthMethod, Authenticator, ClientIdentity, DigestAuthenticator, SaslExchange};
pub use backoff::BackoffPolicy;
pub use client::PacemakerClient;
pub use config::{BackoffConfig, ClientConfig};
pub use connection::LifecycleState;
pub use error::PacemakerError;
pub use message::{HeartbeatMessage, MessageKind};
pub use transport::{Connection, Transport, TransportEvents, WebSocketTransport};
