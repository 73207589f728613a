//! Participant endpoints.
//!
//! - `POST /api/meetings/{id}/join` - join-notify, records a `connecting` participant
//! - `GET /api/meetings/{id}/participants` - stored participants of a meeting
//! - `PUT|PATCH /api/meetings/{id}/participants` - update the caller's flags
//!
//! # Security
//!
//! - Every endpoint requires a session token
//! - Private meetings are visible to and joinable by their creator only
//! - Storage errors return a generic message

use crate::auth::{authenticate, Identity};
use crate::errors::SessionError;
use crate::models::{ConnectionStatus, Meeting, ParticipantPatch, ParticipantRecord};
use crate::observability::metrics as prom;
use crate::routes::AppState;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use chrono::Utc;
use common::types::{MeetingId, PeerId};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Longest display name accepted, in characters.
pub const MAX_USER_NAME_CHARS: usize = 100;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinNotifyRequest {
    #[serde(default)]
    pub user_name: Option<String>,
    pub peer_id: String,
}

pub(crate) fn parse_meeting_id(raw: &str) -> Result<MeetingId, SessionError> {
    MeetingId::parse(raw).map_err(|_| SessionError::BadRequest("Invalid meeting id".to_string()))
}

pub(crate) fn parse_peer_id(raw: Option<&str>) -> Result<PeerId, SessionError> {
    let raw = raw.ok_or_else(|| SessionError::BadRequest("peerId is required".to_string()))?;
    PeerId::parse(raw).map_err(|_| SessionError::BadRequest("Invalid peerId".to_string()))
}

/// Display name for a joining participant: the supplied one, else the
/// token's name claim, else the user id.
pub(crate) fn resolve_user_name(
    requested: Option<&str>,
    identity: &Identity,
) -> Result<String, SessionError> {
    match requested.map(str::trim).filter(|n| !n.is_empty()) {
        Some(name) if name.chars().count() > MAX_USER_NAME_CHARS => Err(SessionError::BadRequest(
            format!("userName exceeds {MAX_USER_NAME_CHARS} characters"),
        )),
        Some(name) => Ok(name.to_string()),
        None => Ok(identity.display_name()),
    }
}

/// Load an active meeting and check that `identity` may access it.
///
/// # Errors
///
/// - `MeetingNotFound` if the meeting is unknown or inactive
/// - `AccessDenied` if it is private and the caller is not its creator
/// - `Storage` if the lookup fails
pub(crate) async fn authorize_meeting(
    state: &AppState,
    meeting_id: &MeetingId,
    identity: &Identity,
) -> Result<Meeting, SessionError> {
    let meeting = state
        .meetings
        .find_meeting(meeting_id)
        .await?
        .filter(|m| m.is_active)
        .ok_or_else(|| SessionError::MeetingNotFound(meeting_id.to_string()))?;

    if !meeting.admits(&identity.user_id) {
        warn!(
            target: "sc.handlers",
            meeting_id = %meeting_id,
            user_id = %identity.user_id,
            "Private meeting access denied"
        );
        return Err(SessionError::AccessDenied(format!(
            "meeting {meeting_id} is private"
        )));
    }

    Ok(meeting)
}

/// Handler for POST /api/meetings/{id}/join
///
/// # Response
///
/// - 200 OK: the stored `connecting` record, or the live record if the
///   caller is already connected
/// - 400 Bad Request: invalid body
/// - 401 Unauthorized: missing or invalid token
/// - 403 Forbidden: private meeting or meeting full
/// - 404 Not Found: unknown or inactive meeting
#[instrument(skip_all, name = "sc.handlers.join_notify")]
pub async fn join_notify(
    State(state): State<Arc<AppState>>,
    Path(raw_meeting_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ParticipantRecord>, SessionError> {
    let result = join_notify_inner(&state, &raw_meeting_id, &headers, &body).await;
    if let Err(e) = &result {
        prom::record_join_rejection(e.rejection_reason());
    }
    result.map(Json)
}

async fn join_notify_inner(
    state: &AppState,
    raw_meeting_id: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<ParticipantRecord, SessionError> {
    let identity = authenticate(state.validator.as_ref(), headers, None).await?;
    let meeting_id = parse_meeting_id(raw_meeting_id)?;

    // Deserialize manually to return 400 (not axum's default 422)
    let request: JoinNotifyRequest = serde_json::from_slice(body).map_err(|e| {
        debug!(target: "sc.handlers", error = %e, "Invalid join body");
        SessionError::BadRequest("Invalid request body".to_string())
    })?;
    let peer_id = parse_peer_id(Some(&request.peer_id))?;
    let user_name = resolve_user_name(request.user_name.as_deref(), &identity)?;

    let meeting = authorize_meeting(state, &meeting_id, &identity).await?;

    let live = state.hub.room_snapshot(meeting_id.clone()).await?;
    if let Some(existing) = live.iter().find(|r| r.user_id == identity.user_id) {
        // The live session owns this record; a connecting write would clobber it.
        debug!(
            target: "sc.handlers",
            meeting_id = %meeting_id,
            user_id = %identity.user_id,
            "Join notified for connected user"
        );
        return Ok(existing.clone());
    }
    if live.len() >= meeting.effective_capacity() {
        return Err(SessionError::MeetingFull(format!(
            "meeting {meeting_id} at capacity"
        )));
    }

    let record = ParticipantRecord::new(
        meeting_id,
        identity.user_id.clone(),
        user_name,
        peer_id,
        meeting.role_for(&identity.user_id),
        ConnectionStatus::Connecting,
        Utc::now(),
    );
    state.participants.insert_participant(&record).await?;

    info!(
        target: "sc.handlers",
        meeting_id = %record.meeting_id,
        user_id = %record.user_id,
        "Join notified"
    );
    Ok(record)
}

/// Handler for GET /api/meetings/{id}/participants
///
/// Point-in-time snapshot from storage, not the live room.
#[instrument(skip_all, name = "sc.handlers.get_participants")]
pub async fn get_participants(
    State(state): State<Arc<AppState>>,
    Path(raw_meeting_id): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Vec<ParticipantRecord>>, SessionError> {
    let identity = authenticate(state.validator.as_ref(), &headers, None).await?;
    let meeting_id = parse_meeting_id(&raw_meeting_id)?;
    authorize_meeting(&state, &meeting_id, &identity).await?;

    let participants = state.participants.list_participants(&meeting_id).await?;
    Ok(Json(participants))
}

/// Handler for PUT/PATCH /api/meetings/{id}/participants
///
/// A connected caller is patched through the hub, which broadcasts
/// `participant-update` and queues the storage write behind earlier
/// mirror writes. A caller with no live connection is patched in storage.
///
/// # Response
///
/// - 200 OK: the resulting record
/// - 400 Bad Request: invalid body
/// - 404 Not Found: the caller has no record in this meeting
#[instrument(skip_all, name = "sc.handlers.update_participant")]
pub async fn update_participant(
    State(state): State<Arc<AppState>>,
    Path(raw_meeting_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ParticipantRecord>, SessionError> {
    let identity = authenticate(state.validator.as_ref(), &headers, None).await?;
    let meeting_id = parse_meeting_id(&raw_meeting_id)?;

    let patch: ParticipantPatch = serde_json::from_slice(&body).map_err(|e| {
        debug!(target: "sc.handlers", error = %e, "Invalid participant patch");
        SessionError::BadRequest("Invalid request body".to_string())
    })?;

    let now = Utc::now();
    let live = state
        .hub
        .update_participant(meeting_id.clone(), identity.user_id.clone(), patch.clone(), now)
        .await?;
    if let Some(record) = live {
        return Ok(Json(record));
    }

    state
        .participants
        .update_participant(&meeting_id, &identity.user_id, &patch, now)
        .await?
        .map(Json)
        .ok_or_else(|| {
            SessionError::ParticipantNotFound(format!(
                "no participant {} in meeting {meeting_id}",
                identity.user_id
            ))
        })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::types::UserId;

    fn identity(name: Option<&str>) -> Identity {
        Identity {
            user_id: UserId::parse("user-1").unwrap(),
            name: name.map(String::from),
        }
    }

    #[test]
    fn test_resolve_user_name_prefers_request() {
        let name = resolve_user_name(Some("  Bob "), &identity(Some("Alice"))).unwrap();
        assert_eq!(name, "Bob");
    }

    #[test]
    fn test_resolve_user_name_falls_back() {
        assert_eq!(
            resolve_user_name(Some(""), &identity(Some("Alice"))).unwrap(),
            "Alice"
        );
        assert_eq!(resolve_user_name(None, &identity(None)).unwrap(), "user-1");
    }

    #[test]
    fn test_resolve_user_name_rejects_long_names() {
        let long = "x".repeat(MAX_USER_NAME_CHARS + 1);
        let err = resolve_user_name(Some(&long), &identity(None)).unwrap_err();
        assert_eq!(err.error_code(), "BAD_REQUEST");
    }

    #[test]
    fn test_parse_peer_id_required() {
        assert_eq!(parse_peer_id(None).unwrap_err().error_code(), "BAD_REQUEST");
        assert_eq!(parse_peer_id(Some("peer-1")).unwrap().as_str(), "peer-1");
    }
}
