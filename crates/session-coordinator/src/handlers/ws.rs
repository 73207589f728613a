//! WebSocket endpoint: `GET /api/ws/{meetingId}?peerId=..&userName=..&token=..`
//!
//! The Origin check, auth, the meeting lookup, the privacy check and the hub join all run
//! BEFORE the upgrade, so every rejection is a plain HTTP error with the
//! usual error body.
//!
//! After the upgrade each connection runs two tasks:
//!
//! - the writer drains the connection's outbound queue onto the socket,
//!   sends a ping every `ping_interval` and gives up on a write that takes
//!   longer than `write_timeout`
//! - the reader hands text frames to the hub in arrival order and treats
//!   `pong_timeout` without any inbound frame as a dead transport
//!
//! Whichever side ends first cancels the other, and the connection leaves
//! the hub through the same idempotent path as an eviction.

use crate::actors::{HubHandle, JoinRequest, LeaveReason};
use crate::auth::authenticate;
use crate::config::Config;
use crate::errors::SessionError;
use crate::models::ParticipantRecord;
use crate::observability::metrics as prom;
use crate::routes::AppState;
use crate::signaling::{Envelope, MessageType};

use super::participants::{authorize_meeting, parse_meeting_id, parse_peer_id, resolve_user_name};

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{header, HeaderMap},
    response::Response,
};
use chrono::Utc;
use common::types::ConnectionId;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{timeout, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WsQuery {
    pub peer_id: Option<String>,
    pub user_name: Option<String>,
    pub token: Option<String>,
}

/// Keepalive and timeout settings for one connection.
#[derive(Debug, Clone, Copy)]
pub struct TransportSettings {
    pub ping_interval: Duration,
    pub pong_timeout: Duration,
    pub write_timeout: Duration,
}

impl TransportSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            ping_interval: config.ping_interval,
            pong_timeout: config.pong_timeout,
            write_timeout: config.write_timeout,
        }
    }
}

/// An admitted connection waiting for its upgrade.
struct Admitted {
    connection_id: ConnectionId,
    outbound: mpsc::Receiver<Arc<str>>,
    cancel_token: CancellationToken,
    existing: Vec<ParticipantRecord>,
}

/// Handler for GET /api/ws/{meetingId}
///
/// # Response
///
/// - 101 Switching Protocols: joined
/// - 400 Bad Request: missing or invalid `peerId`
/// - 401 Unauthorized: missing or invalid token
/// - 403 Forbidden: private meeting or meeting full
/// - 404 Not Found: unknown or inactive meeting
/// - 409 Conflict: `peerId` already live in the meeting
/// - 503 Service Unavailable: hub stopped
#[instrument(skip_all, name = "sc.ws.upgrade")]
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Path(raw_meeting_id): Path<String>,
    Query(query): Query<WsQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Result<Response, SessionError> {
    let admitted = match admit(&state, &raw_meeting_id, &query, &headers).await {
        Ok(admitted) => admitted,
        Err(e) => {
            prom::record_join_rejection(e.rejection_reason());
            debug!(
                target: "sc.ws.connection",
                code = e.error_code(),
                "WebSocket join rejected"
            );
            return Err(e);
        }
    };

    let connection_id = admitted.connection_id;
    let failed_hub = state.hub.clone();
    let hub = state.hub.clone();
    let settings = TransportSettings::from_config(&state.config);

    Ok(ws
        .max_message_size(state.config.max_message_bytes)
        .on_failed_upgrade(move |error| {
            warn!(
                target: "sc.ws.connection",
                connection_id = %connection_id,
                error = %error,
                "WebSocket upgrade failed"
            );
            tokio::spawn(async move {
                failed_hub
                    .leave(connection_id, LeaveReason::UpgradeFailed)
                    .await;
            });
        })
        .on_upgrade(move |socket| run_connection(socket, hub, admitted, settings)))
}

/// Reject a handshake whose `Origin` is not in `allowed`.
///
/// An empty list allows every origin. Browsers always send `Origin` on a
/// WebSocket handshake; a request without one is not from a browser page
/// and carries no ambient cookie risk, so it passes.
fn check_origin(allowed: &[String], headers: &HeaderMap) -> Result<(), SessionError> {
    if allowed.is_empty() {
        return Ok(());
    }
    let Some(origin) = headers.get(header::ORIGIN) else {
        return Ok(());
    };
    let origin = origin.to_str().unwrap_or_default();
    if allowed.iter().any(|o| o == origin) {
        return Ok(());
    }

    warn!(target: "sc.ws", origin = %origin, "WebSocket origin not allowed");
    Err(SessionError::AccessDenied(format!(
        "origin '{origin}' is not allowed"
    )))
}

async fn admit(
    state: &AppState,
    raw_meeting_id: &str,
    query: &WsQuery,
    headers: &HeaderMap,
) -> Result<Admitted, SessionError> {
    check_origin(&state.config.allowed_origins, headers)?;
    let identity = authenticate(state.validator.as_ref(), headers, query.token.as_deref()).await?;
    let meeting_id = parse_meeting_id(raw_meeting_id)?;
    let peer_id = parse_peer_id(query.peer_id.as_deref())?;
    let user_name = resolve_user_name(query.user_name.as_deref(), &identity)?;

    let meeting = authorize_meeting(state, &meeting_id, &identity).await?;

    let connection_id = ConnectionId::new();
    let (outbound_tx, outbound_rx) = mpsc::channel(state.config.outbound_queue_capacity);
    let cancel_token = state.hub.child_token();

    let admission = state
        .hub
        .join(JoinRequest {
            connection_id,
            meeting_id,
            role: meeting.role_for(&identity.user_id),
            user_id: identity.user_id,
            user_name,
            peer_id,
            capacity: meeting.effective_capacity(),
            outbound: outbound_tx,
            cancel_token: cancel_token.clone(),
        })
        .await?;

    Ok(Admitted {
        connection_id,
        outbound: outbound_rx,
        cancel_token,
        existing: admission.participants,
    })
}

#[instrument(
    skip_all,
    name = "sc.ws.connection",
    fields(connection_id = %admitted.connection_id)
)]
async fn run_connection(
    socket: WebSocket,
    hub: HubHandle,
    admitted: Admitted,
    settings: TransportSettings,
) {
    let Admitted {
        connection_id,
        outbound,
        cancel_token,
        existing,
    } = admitted;
    info!(target: "sc.ws.connection", "WebSocket connection established");

    let (sink, stream) = socket.split();
    let writer = tokio::spawn(write_loop(
        sink,
        outbound,
        snapshot_frames(&existing),
        settings,
        cancel_token.clone(),
    ));

    let reason = read_loop(stream, &hub, connection_id, settings, &cancel_token).await;
    cancel_token.cancel();

    match reason {
        Some(reason) => {
            debug!(
                target: "sc.ws.connection",
                reason = reason.as_str(),
                "Connection ending"
            );
            hub.leave(connection_id, reason).await;
        }
        None => debug!(target: "sc.ws.connection", "Connection closed by hub"),
    }

    let _ = writer.await;
    info!(target: "sc.ws.connection", "WebSocket connection closed");
}

/// Current room members, sent to a new connection ahead of any live event
/// so its view starts from the join-time snapshot.
fn snapshot_frames(existing: &[ParticipantRecord]) -> Vec<Arc<str>> {
    let now = Utc::now();
    existing
        .iter()
        .filter_map(|record| {
            let data = serde_json::to_value(record).ok()?;
            Envelope::from_participant(MessageType::ParticipantUpdate, record, data, now)
                .to_frame()
                .ok()
        })
        .collect()
}

/// Returns `None` when the hub ended the connection (eviction or shutdown).
async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    hub: &HubHandle,
    connection_id: ConnectionId,
    settings: TransportSettings,
    cancel_token: &CancellationToken,
) -> Option<LeaveReason> {
    loop {
        let next = tokio::select! {
            biased;
            () = cancel_token.cancelled() => return None,
            next = timeout(settings.pong_timeout, stream.next()) => next,
        };

        let Ok(next) = next else {
            debug!(target: "sc.ws.connection", "No inbound frame within pong timeout");
            return Some(LeaveReason::TransportError);
        };

        let frame = match next {
            None | Some(Ok(Message::Close(_))) => return Some(LeaveReason::ClientClosed),
            Some(Err(e)) => {
                debug!(target: "sc.ws.connection", error = %e, "WebSocket read failed");
                return Some(LeaveReason::TransportError);
            }
            Some(Ok(Message::Text(text))) => text,
            Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => return Some(LeaveReason::MalformedFrame),
            },
            Some(Ok(Message::Pong(_))) => {
                hub.touch(connection_id).await;
                continue;
            }
            // Pings are answered by the protocol layer; they still count as
            // transport activity for the pong timeout above.
            Some(Ok(Message::Ping(_))) => continue,
        };

        if hub.inbound(connection_id, frame).await.is_err() {
            return None;
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound: mpsc::Receiver<Arc<str>>,
    snapshot: Vec<Arc<str>>,
    settings: TransportSettings,
    cancel_token: CancellationToken,
) {
    for frame in snapshot {
        if send(&mut sink, Message::Text(frame.to_string()), settings.write_timeout)
            .await
            .is_err()
        {
            cancel_token.cancel();
            return;
        }
    }

    let mut ping = tokio::time::interval_at(
        Instant::now() + settings.ping_interval,
        settings.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let message = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            frame = outbound.recv() => match frame {
                Some(frame) => Message::Text(frame.to_string()),
                // The hub dropped its sender: unregistered.
                None => break,
            },
            _ = ping.tick() => Message::Ping(Vec::new()),
        };

        if send(&mut sink, message, settings.write_timeout).await.is_err() {
            debug!(target: "sc.ws.connection", "WebSocket write failed or timed out");
            break;
        }
    }

    cancel_token.cancel();
    let _ = send(&mut sink, Message::Close(None), settings.write_timeout).await;
}

async fn send(
    sink: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_timeout: Duration,
) -> Result<(), ()> {
    match timeout(write_timeout, sink.send(message)).await {
        Ok(Ok(())) => Ok(()),
        _ => Err(()),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::models::{ConnectionStatus, ParticipantRole};
    use axum::http::HeaderValue;
    use common::types::{MeetingId, PeerId, UserId};

    #[test]
    fn test_snapshot_frames_are_participant_updates() {
        let record = ParticipantRecord::new(
            MeetingId::parse("m1").unwrap(),
            UserId::parse("u1").unwrap(),
            "Alice".to_string(),
            PeerId::parse("peer-a").unwrap(),
            ParticipantRole::Host,
            ConnectionStatus::Connected,
            Utc::now(),
        );
        let frames = snapshot_frames(&[record]);
        assert_eq!(frames.len(), 1);

        let value: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["type"], "participant-update");
        assert_eq!(value["userId"], "u1");
        assert_eq!(value["data"]["peerId"], "peer-a");
        assert_eq!(value["data"]["isHost"], true);
    }

    #[test]
    fn test_origin_check() {
        let allowed = vec!["https://app.example".to_string()];
        let with_origin = |origin: &'static str| {
            let mut headers = HeaderMap::new();
            headers.insert(header::ORIGIN, HeaderValue::from_static(origin));
            headers
        };

        assert!(check_origin(&allowed, &with_origin("https://app.example")).is_ok());
        assert!(check_origin(&allowed, &HeaderMap::new()).is_ok());
        let err = check_origin(&allowed, &with_origin("https://evil.example")).unwrap_err();
        assert_eq!(err.error_code(), "ACCESS_DENIED");

        // No list configured: any origin.
        assert!(check_origin(&[], &with_origin("https://evil.example")).is_ok());
    }

    #[test]
    fn test_query_accepts_camel_case() {
        let query: WsQuery =
            serde_json::from_value(serde_json::json!({"peerId": "p", "userName": "n"})).unwrap();
        assert_eq!(query.peer_id.as_deref(), Some("p"));
        assert_eq!(query.user_name.as_deref(), Some("n"));
        assert!(query.token.is_none());
    }
}
