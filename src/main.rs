//! pacemaker-client - send heartbeats to a pacemaker service
//!
//! Connects, sends `--count` requests carrying `--payload`, logs each
//! response, then shuts down.
//!
//! ```bash
//! pacemaker-client --host pacemaker.local --count 3 --payload hello
//! PACEMAKER_DIGEST_SECRET=s3cret pacemaker-client --auth DIGEST
//! ```

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use pacemaker_client::{ClientConfig, HeartbeatMessage, PacemakerClient, WebSocketTransport};

#[derive(Parser, Debug)]
#[command(name = "pacemaker-client")]
#[command(about = "Heartbeat client for a pacemaker service")]
struct Args {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Pacemaker host
    #[arg(long, env = "PACEMAKER_HOST")]
    host: Option<String>,

    /// Pacemaker port
    #[arg(long, env = "PACEMAKER_PORT")]
    port: Option<u16>,

    /// Client name
    #[arg(long)]
    name: Option<String>,

    /// Authentication method (NONE, DIGEST, KERBEROS)
    #[arg(long, env = "PACEMAKER_AUTH")]
    auth: Option<String>,

    /// Shared secret for DIGEST
    #[arg(long, env = "PACEMAKER_DIGEST_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Request body
    #[arg(long, default_value = "heartbeat")]
    payload: String,

    /// Number of requests to send
    #[arg(long, default_value_t = 1)]
    count: u32,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("pacemaker_client=info".parse()?),
        )
        .init();

    let args = Args::parse();

    let mut config = if let Some(path) = &args.config {
        ClientConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
    } else {
        ClientConfig::default()
    };

    // Apply CLI overrides
    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(name) = args.name {
        config.name = name;
    }
    if let Some(auth) = args.auth {
        config.auth_method = auth;
    }
    if args.secret.is_some() {
        config.digest_secret = args.secret;
    }

    info!(
        name = %config.name,
        url = %config.url(),
        auth = %config.auth(),
        "Starting pacemaker-client"
    );

    let transport =
        Arc::new(WebSocketTransport::from_config(&config).context("Failed to build transport")?);
    let client = PacemakerClient::connect(config, transport)
        .await
        .context("Failed to create pacemaker client")?;

    let mut failures = 0u32;
    for i in 0..args.count {
        match client
            .send(HeartbeatMessage::request(args.payload.as_bytes().to_vec()))
            .await
        {
            Ok(response) => info!(
                request = i,
                len = response.body().len(),
                body = %String::from_utf8_lossy(response.body()),
                "Heartbeat acknowledged"
            ),
            Err(e) => {
                error!(request = i, error = %e, "Heartbeat failed");
                failures += 1;
            }
        }
    }

    client.shutdown().await;

    if failures > 0 {
        anyhow::bail!("{} of {} heartbeats failed", failures, args.count);
    }
    Ok(())
}
