//! Storage collaborators.
//!
//! Meetings are owned by the rest of the application; the coordinator only
//! reads them. Participant records are written by the coordinator as a
//! best-effort mirror of the live session, so the REST participant list
//! works without touching the hub.
//!
//! # Backends
//!
//! - [`MemoryStore`] - in-process maps, used by default and in tests
//! - [`RedisStore`] - JSON values in Redis with a TTL on participant keys

pub mod memory;
pub mod redis;

pub use memory::MemoryStore;
pub use redis::RedisStore;

use crate::errors::SessionError;
use crate::models::{Meeting, ParticipantPatch, ParticipantRecord};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MeetingId, UserId};
use thiserror::Error;

/// Storage failure. Details stay server-side.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("backend error: {0}")]
    Backend(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        StoreError::Serialization(err.to_string())
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::Storage(err.to_string())
    }
}

/// Read access to meeting metadata.
#[async_trait]
pub trait MeetingStore: Send + Sync {
    async fn find_meeting(&self, meeting_id: &MeetingId) -> Result<Option<Meeting>, StoreError>;
}

/// Participant record persistence.
#[async_trait]
pub trait ParticipantStore: Send + Sync {
    /// Insert or replace the record for `(meeting_id, user_id)`.
    async fn insert_participant(&self, record: &ParticipantRecord) -> Result<(), StoreError>;

    /// Apply `patch` to the stored record and set `last_active` to `at`.
    ///
    /// Returns `Ok(None)` when no record exists.
    async fn update_participant(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
        patch: &ParticipantPatch,
        at: DateTime<Utc>,
    ) -> Result<Option<ParticipantRecord>, StoreError>;

    async fn find_participant(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<Option<ParticipantRecord>, StoreError>;

    /// Records of one meeting, oldest join first.
    async fn list_participants(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<ParticipantRecord>, StoreError>;

    /// Delete records whose `last_active` is before `cutoff`. Returns the
    /// number removed.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
