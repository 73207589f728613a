//! Helpers shared by the end-to-end tests.

#![allow(dead_code)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use futures_util::{SinkExt, StreamExt};
use sc_test_utils::{TestScServer, TestTokenBuilder};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub fn token_for(user_id: &str) -> String {
    TestTokenBuilder::new()
        .for_user(user_id)
        .with_name(user_id)
        .sign()
}

/// Join `meeting_id` as `user_id` with peer id `peer-<user_id>`.
pub async fn connect(server: &TestScServer, meeting_id: &str, user_id: &str) -> Client {
    let url = server.ws_url(meeting_id, &format!("peer-{user_id}"), &token_for(user_id));
    let (socket, _) = connect_async(url).await.expect("WebSocket join should succeed");
    socket
}

/// Attempt a join that must be rejected before the upgrade. Returns the HTTP
/// status and the parsed error body.
pub async fn rejected<R>(request: R) -> (u16, Value)
where
    R: IntoClientRequest + Unpin,
{
    match connect_async(request).await {
        Ok(_) => panic!("join should have been rejected"),
        Err(tungstenite::Error::Http(response)) => {
            let status = response.status().as_u16();
            let body = response
                .body()
                .as_ref()
                .and_then(|bytes| serde_json::from_slice(bytes).ok())
                .unwrap_or(Value::Null);
            (status, body)
        }
        Err(e) => panic!("unexpected handshake error: {e}"),
    }
}

pub async fn send_text(client: &mut Client, text: &str) {
    client
        .send(Message::Text(text.to_string()))
        .await
        .expect("send should succeed");
}

/// Next text frame, skipping keepalives.
pub async fn next_text(client: &mut Client) -> String {
    loop {
        let message = tokio::time::timeout(FRAME_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended")
            .expect("read failed");
        match message {
            Message::Text(text) => return text,
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected frame: {other:?}"),
        }
    }
}

pub async fn next_json(client: &mut Client) -> Value {
    let text = next_text(client).await;
    serde_json::from_str(&text).expect("frame should be JSON")
}

/// Skip frames until one of type `kind` arrives.
pub async fn next_of_type(client: &mut Client, kind: &str) -> Value {
    loop {
        let frame = next_json(client).await;
        if frame["type"] == kind {
            return frame;
        }
    }
}

/// True if nothing but keepalives arrives within `wait`.
pub async fn stays_quiet(client: &mut Client, wait: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        match tokio::time::timeout_at(deadline, client.next()).await {
            Err(_) => return true,
            Ok(Some(Ok(Message::Ping(_) | Message::Pong(_)))) => continue,
            Ok(_) => return false,
        }
    }
}
