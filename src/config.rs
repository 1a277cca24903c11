//! Configuration for pacemaker-client

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::auth::AuthMethod;
use crate::error::PacemakerError;

/// Client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Name used to identify this client in logs and the digest handshake
    #[serde(default = "default_name")]
    pub name: String,

    /// Pacemaker service host
    #[serde(default = "default_host")]
    pub host: String,

    /// Pacemaker service port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Authentication method: NONE, DIGEST or KERBEROS.
    /// Unknown values fall back to NONE.
    #[serde(default = "default_auth_method")]
    pub auth_method: String,

    /// Shared secret for DIGEST authentication
    #[serde(default)]
    pub digest_secret: Option<String>,

    /// Number of correlation slots (maximum requests in flight)
    #[serde(default = "default_max_pending")]
    pub max_pending: usize,

    /// Bounded wait for the connection to become ready, per loop iteration
    #[serde(default = "default_wait_ms")]
    pub ready_wait_ms: u64,

    /// Bounded wait for a response on a slot, per loop iteration
    #[serde(default = "default_wait_ms")]
    pub response_wait_ms: u64,

    /// How many times one request may be resubmitted after connection teardowns
    #[serde(default = "default_max_resubmits")]
    pub max_resubmits: u32,

    /// Largest inbound message accepted from the service
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: usize,

    /// Reconnect backoff
    #[serde(default)]
    pub backoff: BackoffConfig,
}

/// Bounded exponential backoff parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,

    #[serde(default = "default_cap_ms")]
    pub cap_ms: u64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_name() -> String {
    "pacemaker-client".to_string()
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    6699
}

fn default_auth_method() -> String {
    "NONE".to_string()
}

fn default_max_pending() -> usize {
    100
}

fn default_wait_ms() -> u64 {
    1000
}

fn default_max_resubmits() -> u32 {
    5
}

fn default_max_message_bytes() -> usize {
    1024 * 1024
}

fn default_base_ms() -> u64 {
    100
}

fn default_cap_ms() -> u64 {
    5000
}

fn default_max_attempts() -> u32 {
    20
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_ms: default_base_ms(),
            cap_ms: default_cap_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            host: default_host(),
            port: default_port(),
            auth_method: default_auth_method(),
            digest_secret: None,
            max_pending: default_max_pending(),
            ready_wait_ms: default_wait_ms(),
            response_wait_ms: default_wait_ms(),
            max_resubmits: default_max_resubmits(),
            max_message_bytes: default_max_message_bytes(),
            backoff: BackoffConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Load config from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PacemakerError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| PacemakerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the client cannot run with
    pub fn validate(&self) -> Result<(), PacemakerError> {
        if self.max_pending == 0 {
            return Err(PacemakerError::Config("max_pending must be at least 1".into()));
        }
        if self.max_pending > i32::MAX as usize {
            return Err(PacemakerError::Config(format!(
                "max_pending {} does not fit a correlation id",
                self.max_pending
            )));
        }
        if self.ready_wait_ms == 0 || self.response_wait_ms == 0 {
            return Err(PacemakerError::Config("wait intervals must be non-zero".into()));
        }
        Ok(())
    }

    /// WebSocket URL of the pacemaker service
    pub fn url(&self) -> String {
        format!("ws://{}:{}", self.host, self.port)
    }

    /// Parsed authentication method (lenient)
    pub fn auth(&self) -> AuthMethod {
        AuthMethod::parse_lenient(&self.auth_method)
    }

    pub fn ready_wait(&self) -> Duration {
        Duration::from_millis(self.ready_wait_ms)
    }

    pub fn response_wait(&self) -> Duration {
        Duration::from_millis(self.response_wait_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.name, "pacemaker-client");
        assert_eq!(config.max_pending, 100);
        assert_eq!(config.response_wait(), Duration::from_millis(1000));
        assert_eq!(config.backoff.base_ms, 100);
        assert_eq!(config.backoff.cap_ms, 5000);
        assert_eq!(config.backoff.max_attempts, 20);
        assert_eq!(config.auth(), AuthMethod::None);
        assert_eq!(config.url(), "ws://localhost:6699");
    }

    #[test]
    fn test_load_partial_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
name = "topology-7"
host = "pacemaker.internal"
auth_method = "digest"
digest_secret = "s3cret"

[backoff]
cap_ms = 2000
"#
        )
        .unwrap();

        let config = ClientConfig::load(file.path()).unwrap();
        assert_eq!(config.name, "topology-7");
        assert_eq!(config.url(), "ws://pacemaker.internal:6699");
        assert_eq!(config.auth(), AuthMethod::Digest);
        assert_eq!(config.digest_secret.as_deref(), Some("s3cret"));
        assert_eq!(config.backoff.cap_ms, 2000);
        assert_eq!(config.backoff.base_ms, 100);
        assert_eq!(config.max_pending, 100);
    }

    #[test]
    fn test_validate_rejects_zero_slots() {
        let config = ClientConfig {
            max_pending: 0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(PacemakerError::Config(_))));
    }
}
