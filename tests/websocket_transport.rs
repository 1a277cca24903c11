//! The bundled WebSocket transport against a loopback pacemaker.
//!
//! Each test starts a small server on 127.0.0.1 that speaks the msgpack
//! envelope and drives the client through a real socket: plain round trips,
//! the digest handshake, and connections the server drops.

use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{accept_async, tungstenite::protocol::Message, WebSocketStream};

use pacemaker_client::auth::digest_response;
use pacemaker_client::transport::protocol::{decode_message, encode_message};
use pacemaker_client::{
    ClientConfig, HeartbeatMessage, LifecycleState, MessageKind, PacemakerClient, PacemakerError,
    WebSocketTransport,
};

const SECRET: &str = "s3cret";
const NONCE: &[u8] = b"nonce-1";

type ServerSocket = WebSocketStream<TcpStream>;

struct TestPacemaker {
    port: u16,
    accepted: Arc<AtomicUsize>,
    task: JoinHandle<()>,
}

impl TestPacemaker {
    /// Accept connections forever, handing each one to `handler` along with
    /// its 1-based connection number.
    async fn start<F, Fut>(handler: F) -> Self
    where
        F: Fn(usize, ServerSocket) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let handler = Arc::new(handler);

        let counter = Arc::clone(&accepted);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let number = counter.fetch_add(1, Ordering::SeqCst) + 1;
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Ok(ws) = accept_async(stream).await {
                        handler(number, ws).await;
                    }
                });
            }
        });

        Self {
            port,
            accepted,
            task,
        }
    }

    fn accepted(&self) -> usize {
        self.accepted.load(Ordering::SeqCst)
    }

    fn config(&self) -> ClientConfig {
        ClientConfig {
            name: "supervisor-1".into(),
            host: "127.0.0.1".into(),
            port: self.port,
            ..Default::default()
        }
    }
}

impl Drop for TestPacemaker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn recv(ws: &mut ServerSocket) -> Option<HeartbeatMessage> {
    while let Some(Ok(frame)) = ws.next().await {
        match frame {
            Message::Binary(data) => return decode_message(&data, usize::MAX).ok(),
            Message::Close(_) => return None,
            _ => continue,
        }
    }
    None
}

async fn reply(ws: &mut ServerSocket, message: HeartbeatMessage) {
    let bytes = encode_message(&message).unwrap();
    let _ = ws.send(Message::Binary(bytes)).await;
}

/// Answer every request with `<connection>:<body>` until the client leaves.
async fn answer_requests(number: usize, ws: &mut ServerSocket) {
    while let Some(request) = recv(ws).await {
        if request.kind() != MessageKind::Request {
            continue;
        }
        let body = format!("{}:{}", number, String::from_utf8_lossy(request.body()));
        reply(ws, HeartbeatMessage::response(request.message_id(), body.into_bytes())).await;
    }
}

/// Server half of the digest handshake. Returns false if the client failed it.
async fn challenge(ws: &mut ServerSocket) -> bool {
    let Some(hello) = recv(ws).await else {
        return false;
    };
    if hello.kind() != MessageKind::SaslToken || hello.body() != b"supervisor-1" {
        reply(ws, HeartbeatMessage::new(MessageKind::NotAuthorized, Vec::new())).await;
        return false;
    }
    reply(ws, HeartbeatMessage::new(MessageKind::SaslToken, NONCE.to_vec())).await;

    let Some(answer) = recv(ws).await else {
        return false;
    };
    if answer.body() != digest_response(NONCE, SECRET).as_bytes() {
        reply(ws, HeartbeatMessage::new(MessageKind::NotAuthorized, Vec::new())).await;
        return false;
    }
    reply(ws, HeartbeatMessage::new(MessageKind::SaslComplete, Vec::new())).await;
    true
}

async fn start_client(config: ClientConfig) -> PacemakerClient {
    let transport = Arc::new(WebSocketTransport::from_config(&config).unwrap());
    PacemakerClient::connect(config, transport).await.unwrap()
}

async fn send(client: &PacemakerClient, body: &[u8]) -> Result<HeartbeatMessage, PacemakerError> {
    timeout(
        Duration::from_secs(5),
        client.send(HeartbeatMessage::request(body.to_vec())),
    )
    .await
    .expect("no response within 5s")
}

#[tokio::test]
async fn test_round_trip_without_auth() {
    let server = TestPacemaker::start(|number, mut ws| async move {
        answer_requests(number, &mut ws).await;
    })
    .await;
    let client = start_client(server.config()).await;

    let first = send(&client, b"pulse").await.unwrap();
    assert_eq!(first.kind(), MessageKind::Response);
    assert_eq!(first.body(), b"1:pulse");
    assert_eq!(send(&client, b"again").await.unwrap().body(), b"1:again");

    assert_eq!(client.state(), LifecycleState::Ready);
    assert_eq!(client.in_flight(), 0);
    assert_eq!(server.accepted(), 1);
    client.shutdown().await;
}

#[tokio::test]
async fn test_digest_handshake_then_round_trip() {
    let server = TestPacemaker::start(|number, mut ws| async move {
        if challenge(&mut ws).await {
            answer_requests(number, &mut ws).await;
        }
    })
    .await;
    let client = start_client(ClientConfig {
        auth_method: "digest".into(),
        digest_secret: Some(SECRET.into()),
        ..server.config()
    })
    .await;

    assert_eq!(send(&client, b"pulse").await.unwrap().body(), b"1:pulse");
    assert_eq!(client.state(), LifecycleState::Ready);
    client.shutdown().await;
}

#[tokio::test]
async fn test_rejected_digest_never_becomes_ready() {
    let server = TestPacemaker::start(|number, mut ws| async move {
        if challenge(&mut ws).await {
            answer_requests(number, &mut ws).await;
        }
    })
    .await;
    let client = start_client(ClientConfig {
        auth_method: "digest".into(),
        digest_secret: Some("wrong".into()),
        ..server.config()
    })
    .await;

    let attempt = timeout(
        Duration::from_millis(1500),
        client.send(HeartbeatMessage::request(b"pulse".to_vec())),
    )
    .await;
    assert!(attempt.is_err());
    assert_ne!(client.state(), LifecycleState::Ready);
    // A failed handshake drops the connection and the client dials again
    assert!(server.accepted() >= 2, "accepted {}", server.accepted());
    client.shutdown().await;
}

#[tokio::test]
async fn test_server_close_triggers_redial() {
    let server = TestPacemaker::start(|number, mut ws| async move {
        if number == 1 {
            if let Some(request) = recv(&mut ws).await {
                let body = format!("1:{}", String::from_utf8_lossy(request.body()));
                reply(&mut ws, HeartbeatMessage::response(request.message_id(), body.into_bytes()))
                    .await;
            }
            let _ = ws.close(None).await;
            return;
        }
        answer_requests(number, &mut ws).await;
    })
    .await;
    let client = start_client(server.config()).await;

    assert_eq!(send(&client, b"one").await.unwrap().body(), b"1:one");

    // Whether or not it went out on the closing connection, it is answered
    // on the redialed one
    assert_eq!(send(&client, b"two").await.unwrap().body(), b"2:two");
    assert_eq!(server.accepted(), 2);
    assert_eq!(client.reconnect_attempts(), 0);
    client.shutdown().await;
}

#[tokio::test]
async fn test_oversized_frame_drops_connection() {
    let server = TestPacemaker::start(|number, mut ws| async move {
        if number == 1 {
            if let Some(request) = recv(&mut ws).await {
                reply(&mut ws, HeartbeatMessage::response(request.message_id(), vec![0u8; 4096]))
                    .await;
            }
            while recv(&mut ws).await.is_some() {}
            return;
        }
        answer_requests(number, &mut ws).await;
    })
    .await;
    let client = start_client(ClientConfig {
        max_message_bytes: 1024,
        ..server.config()
    })
    .await;

    // The request is resubmitted on the second connection
    assert_eq!(send(&client, b"hb").await.unwrap().body(), b"2:hb");
    assert_eq!(server.accepted(), 2);
    client.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_fails_waiting_sender() {
    // Accepts the socket but never answers
    let server = TestPacemaker::start(|_, mut ws| async move {
        while recv(&mut ws).await.is_some() {}
    })
    .await;
    let client = start_client(server.config()).await;

    let waiting = {
        let client = client.clone();
        tokio::spawn(async move { client.send(HeartbeatMessage::request(b"hb".to_vec())).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!waiting.is_finished());

    client.shutdown().await;
    let result = timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap();
    assert!(matches!(result, Err(PacemakerError::Shutdown)));
}
