//! Pacemaker Authentication
//!
//! Single responsibility: decide which handshake a connection needs and run it.
//!
//! # Methods
//!
//! | Method     | Handshake                                              |
//! |------------|--------------------------------------------------------|
//! | `NONE`     | None. Connected implies ready.                         |
//! | `DIGEST`   | Shared-secret challenge/response (see below)           |
//! | `KERBEROS` | Supplied by the embedding application                  |
//!
//! # Digest Flow
//!
//! 1. Client sends `sasl_token` carrying its name
//! 2. Service answers with a `sasl_token` carrying a challenge
//! 3. Client sends `sasl_token` carrying `hex(sha256(challenge || secret))`
//! 4. Service answers `sasl_complete`, or `not_authorized` and closes

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::PacemakerError;
use crate::message::{HeartbeatMessage, MessageKind};

/// How long a whole handshake may take before the connection is abandoned.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    None,
    Digest,
    Kerberos,
}

impl AuthMethod {
    /// Parse a configured method name. Unknown names fall back to `None`.
    pub fn parse_lenient(s: &str) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "NONE" => AuthMethod::None,
            "DIGEST" => AuthMethod::Digest,
            "KERBEROS" => AuthMethod::Kerberos,
            _ => {
                warn!(scheme = %s, "Invalid auth scheme, falling back to NONE");
                AuthMethod::None
            }
        }
    }

    /// Whether a connection must complete a handshake before it is ready.
    pub fn requires_handshake(&self) -> bool {
        !matches!(self, AuthMethod::None)
    }
}

impl fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::None => write!(f, "NONE"),
            AuthMethod::Digest => write!(f, "DIGEST"),
            AuthMethod::Kerberos => write!(f, "KERBEROS"),
        }
    }
}

/// Name and secret of a client, fixed for the client's lifetime.
#[derive(Clone)]
pub struct ClientIdentity {
    name: String,
    secret: Option<String>,
}

impl ClientIdentity {
    /// Build an identity, checking that the method has the secret it needs.
    pub fn new(
        name: impl Into<String>,
        method: AuthMethod,
        secret: Option<String>,
    ) -> Result<Self, PacemakerError> {
        let secret = secret.filter(|s| !s.is_empty());
        if method == AuthMethod::Digest && secret.is_none() {
            return Err(PacemakerError::AuthConfig(
                "Can't start pacemaker client without digest secret".into(),
            ));
        }
        Ok(Self {
            name: name.into(),
            secret,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn secret(&self) -> Option<&str> {
        self.secret.as_deref()
    }
}

impl fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientIdentity")
            .field("name", &self.name)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// The message channel a handshake runs over.
#[async_trait]
pub trait SaslExchange: Send {
    async fn send(&mut self, message: HeartbeatMessage) -> Result<(), PacemakerError>;

    /// Next inbound message, or None if the connection closed.
    async fn recv(&mut self) -> Result<Option<HeartbeatMessage>, PacemakerError>;
}

/// Runs the authentication handshake on a freshly connected transport.
#[async_trait]
pub trait Authenticator: Send + Sync {
    fn method(&self) -> AuthMethod;

    async fn authenticate(&self, exchange: &mut dyn SaslExchange) -> Result<(), PacemakerError>;
}

/// Shared-secret challenge/response.
pub struct DigestAuthenticator {
    identity: ClientIdentity,
}

impl DigestAuthenticator {
    pub fn new(identity: ClientIdentity) -> Result<Self, PacemakerError> {
        if identity.secret().is_none() {
            return Err(PacemakerError::AuthConfig(
                "Digest authentication requires a secret".into(),
            ));
        }
        Ok(Self { identity })
    }

    async fn run(&self, exchange: &mut dyn SaslExchange) -> Result<(), PacemakerError> {
        let secret = self.identity.secret().unwrap_or_default();

        exchange
            .send(HeartbeatMessage::new(
                MessageKind::SaslToken,
                self.identity.name().as_bytes().to_vec(),
            ))
            .await?;

        let challenge = match expect_message(exchange).await? {
            msg if msg.kind() == MessageKind::SaslToken => msg.into_body(),
            msg if msg.kind() == MessageKind::NotAuthorized => {
                return Err(PacemakerError::Auth("Service refused client name".into()))
            }
            msg => {
                return Err(PacemakerError::Auth(format!(
                    "Expected challenge, got {}",
                    msg.kind().as_str()
                )))
            }
        };
        debug!(len = challenge.len(), "Received digest challenge");

        exchange
            .send(HeartbeatMessage::new(
                MessageKind::SaslToken,
                digest_response(&challenge, secret).into_bytes(),
            ))
            .await?;

        match expect_message(exchange).await?.kind() {
            MessageKind::SaslComplete => Ok(()),
            MessageKind::NotAuthorized => {
                Err(PacemakerError::Auth("Digest response rejected".into()))
            }
            other => Err(PacemakerError::Auth(format!(
                "Expected handshake result, got {}",
                other.as_str()
            ))),
        }
    }
}

#[async_trait]
impl Authenticator for DigestAuthenticator {
    fn method(&self) -> AuthMethod {
        AuthMethod::Digest
    }

    async fn authenticate(&self, exchange: &mut dyn SaslExchange) -> Result<(), PacemakerError> {
        debug!(client = %self.identity.name(), "Starting digest handshake");

        timeout(HANDSHAKE_TIMEOUT, self.run(exchange))
            .await
            .map_err(|_| PacemakerError::Auth("Digest handshake timeout".into()))??;

        info!(client = %self.identity.name(), "Digest handshake complete");
        Ok(())
    }
}

/// Pick the bundled authenticator for a method.
///
/// Returns None for `NONE`. Kerberos has no bundled mechanism and must be
/// supplied by the caller.
pub fn authenticator_for(
    method: AuthMethod,
    identity: &ClientIdentity,
) -> Result<Option<Arc<dyn Authenticator>>, PacemakerError> {
    match method {
        AuthMethod::None => Ok(None),
        AuthMethod::Digest => Ok(Some(Arc::new(DigestAuthenticator::new(identity.clone())?))),
        AuthMethod::Kerberos => Err(PacemakerError::AuthConfig(
            "KERBEROS needs an externally supplied authenticator".into(),
        )),
    }
}

/// `hex(sha256(challenge || secret))`
pub fn digest_response(challenge: &[u8], secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge);
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

async fn expect_message(exchange: &mut dyn SaslExchange) -> Result<HeartbeatMessage, PacemakerError> {
    exchange
        .recv()
        .await?
        .ok_or_else(|| PacemakerError::Auth("Connection closed during handshake".into()))
}
