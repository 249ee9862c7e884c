//! In-memory WebSocket transport.
//!
//! [`socket_pair`] yields a [`TestClient`] and the server half a session
//! runs on. The server half has the same shape as a split axum `WebSocket`:
//! a `Sink<Message>` and a `Stream<Item = Result<Message, E>>`.

use axum::extract::ws::Message;
use futures::channel::mpsc;
use futures::StreamExt;
use serde_json::Value;
use std::convert::Infallible;
use std::time::Duration;

/// Default wait for a frame before a test gives up.
pub const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

/// Halves handed to the code under test.
pub struct ServerSocket {
    pub sink: mpsc::UnboundedSender<Message>,
    pub stream: mpsc::UnboundedReceiver<Result<Message, Infallible>>,
}

/// Client end of the transport.
pub struct TestClient {
    to_server: mpsc::UnboundedSender<Result<Message, Infallible>>,
    from_server: mpsc::UnboundedReceiver<Message>,
}

pub fn socket_pair() -> (TestClient, ServerSocket) {
    let (to_server, stream) = mpsc::unbounded();
    let (sink, from_server) = mpsc::unbounded();
    (
        TestClient {
            to_server,
            from_server,
        },
        ServerSocket { sink, stream },
    )
}

impl TestClient {
    pub fn send_text(&self, text: &str) {
        self.to_server
            .unbounded_send(Ok(Message::Text(text.to_string())))
            .expect("server end dropped");
    }

    pub fn send_json(&self, value: &Value) {
        self.send_text(&value.to_string());
    }

    pub fn send_close(&self) {
        self.to_server
            .unbounded_send(Ok(Message::Close(None)))
            .expect("server end dropped");
    }

    /// Simulate the peer vanishing: the server's stream ends.
    pub fn disconnect(&self) {
        self.to_server.close_channel();
    }

    /// Next frame of any kind, or `None` once the server dropped its sink.
    pub async fn next_frame(&mut self) -> Option<Message> {
        tokio::time::timeout(FRAME_TIMEOUT, self.from_server.next())
            .await
            .expect("timed out waiting for a frame")
    }

    /// Next envelope as JSON, skipping keepalive pings.
    pub async fn next_json(&mut self) -> Value {
        loop {
            match self.next_frame().await {
                Some(Message::Text(text)) => {
                    return serde_json::from_str(&text).expect("server sent invalid JSON")
                }
                Some(Message::Ping(_)) => continue,
                other => panic!("expected a text frame, got {other:?}"),
            }
        }
    }

    /// Read envelopes until one of `kind` arrives.
    pub async fn next_of_type(&mut self, kind: &str) -> Value {
        loop {
            let value = self.next_json().await;
            if value["type"] == kind {
                return value;
            }
        }
    }

    /// Assert nothing but keepalives arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            match tokio::time::timeout_at(deadline, self.from_server.next()).await {
                Err(_) => return,
                Ok(Some(Message::Ping(_))) => continue,
                Ok(frame) => panic!("expected silence, got {frame:?}"),
            }
        }
    }
}
