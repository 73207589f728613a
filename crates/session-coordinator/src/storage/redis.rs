//! Redis-backed store.
//!
//! # Key Patterns
//!
//! - `sc:meeting:{id}` - Meeting metadata (JSON)
//! - `sc:participant:{meeting_id}:{user_id}` - Participant record (JSON, TTL = retention)
//! - `sc:participants:{meeting_id}` - Index of user ids with a record (SET)
//!
//! Participant keys expire on their own; every write refreshes the TTL.
//! Index entries whose record has expired are pruned when the meeting is
//! listed.
//!
//! # Connection Pattern
//!
//! `MultiplexedConnection` is cheap to clone and safe to use concurrently,
//! so each operation clones it instead of locking.

use super::{MeetingStore, ParticipantStore, StoreError};
use crate::models::{Meeting, ParticipantPatch, ParticipantRecord};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::types::{MeetingId, UserId};
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

fn meeting_key(meeting_id: &MeetingId) -> String {
    format!("sc:meeting:{meeting_id}")
}

fn participant_key(meeting_id: &MeetingId, user_id: &str) -> String {
    format!("sc:participant:{meeting_id}:{user_id}")
}

fn index_key(meeting_id: &MeetingId) -> String {
    format!("sc:participants:{meeting_id}")
}

fn backend_error(operation: &'static str, err: &redis::RedisError) -> StoreError {
    warn!(
        target: "sc.storage.redis",
        operation = operation,
        error = %err,
        "Redis operation failed"
    );
    StoreError::Backend(format!("{operation}: {err}"))
}

/// Redis store. Cheaply cloneable.
#[derive(Clone)]
pub struct RedisStore {
    connection: MultiplexedConnection,
    retention_secs: u64,
}

impl RedisStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if the URL is invalid or the server is
    /// unreachable.
    pub async fn connect(redis_url: &str, retention: Duration) -> Result<Self, StoreError> {
        let client = Client::open(redis_url).map_err(|e| {
            // Never log redis_url, it may carry credentials.
            error!(target: "sc.storage.redis", error = %e, "Failed to open Redis client");
            StoreError::Backend(format!("Failed to open Redis client: {e}"))
        })?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| {
                error!(target: "sc.storage.redis", error = %e, "Failed to connect to Redis");
                StoreError::Backend(format!("Failed to connect to Redis: {e}"))
            })?;

        Ok(Self {
            connection,
            retention_secs: retention.as_secs().max(1),
        })
    }

    /// Seed or replace a meeting. Meetings have no TTL.
    ///
    /// # Errors
    ///
    /// Returns `StoreError` on serialization or Redis failure.
    pub async fn insert_meeting(&self, meeting: &Meeting) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(meeting)?;
        conn.set::<_, _, ()>(meeting_key(&meeting.id), json)
            .await
            .map_err(|e| backend_error("insert_meeting", &e))
    }

    async fn write_record(&self, record: &ParticipantRecord) -> Result<(), StoreError> {
        let mut conn = self.connection.clone();
        let json = serde_json::to_string(record)?;

        let (): () = redis::pipe()
            .atomic()
            .set_ex(
                participant_key(&record.meeting_id, record.user_id.as_str()),
                json,
                self.retention_secs,
            )
            .ignore()
            .sadd(index_key(&record.meeting_id), record.user_id.as_str())
            .ignore()
            .query_async(&mut conn)
            .await
            .map_err(|e| backend_error("write_participant", &e))?;
        Ok(())
    }
}

#[async_trait]
impl MeetingStore for RedisStore {
    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn find_meeting(&self, meeting_id: &MeetingId) -> Result<Option<Meeting>, StoreError> {
        let mut conn = self.connection.clone();
        let json: Option<String> = conn
            .get(meeting_key(meeting_id))
            .await
            .map_err(|e| backend_error("find_meeting", &e))?;

        json.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }
}

#[async_trait]
impl ParticipantStore for RedisStore {
    #[instrument(skip_all, fields(meeting_id = %record.meeting_id, user_id = %record.user_id))]
    async fn insert_participant(&self, record: &ParticipantRecord) -> Result<(), StoreError> {
        self.write_record(record).await
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id, user_id = %user_id))]
    async fn update_participant(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
        patch: &ParticipantPatch,
        at: DateTime<Utc>,
    ) -> Result<Option<ParticipantRecord>, StoreError> {
        let Some(mut record) = self.find_participant(meeting_id, user_id).await? else {
            return Ok(None);
        };
        record.apply(patch, at);
        self.write_record(&record).await?;
        Ok(Some(record))
    }

    async fn find_participant(
        &self,
        meeting_id: &MeetingId,
        user_id: &UserId,
    ) -> Result<Option<ParticipantRecord>, StoreError> {
        let mut conn = self.connection.clone();
        let json: Option<String> = conn
            .get(participant_key(meeting_id, user_id.as_str()))
            .await
            .map_err(|e| backend_error("find_participant", &e))?;

        json.map(|json| serde_json::from_str(&json).map_err(StoreError::from))
            .transpose()
    }

    #[instrument(skip_all, fields(meeting_id = %meeting_id))]
    async fn list_participants(
        &self,
        meeting_id: &MeetingId,
    ) -> Result<Vec<ParticipantRecord>, StoreError> {
        let mut conn = self.connection.clone();
        let index = index_key(meeting_id);

        let user_ids: Vec<String> = conn
            .smembers(&index)
            .await
            .map_err(|e| backend_error("list_participants", &e))?;
        if user_ids.is_empty() {
            return Ok(Vec::new());
        }

        let keys: Vec<String> = user_ids
            .iter()
            .map(|user_id| participant_key(meeting_id, user_id))
            .collect();
        let values: Vec<Option<String>> = conn
            .mget(&keys)
            .await
            .map_err(|e| backend_error("list_participants", &e))?;

        let mut records = Vec::with_capacity(values.len());
        let mut expired = Vec::new();
        for (user_id, value) in user_ids.into_iter().zip(values) {
            match value {
                Some(json) => records.push(serde_json::from_str::<ParticipantRecord>(&json)?),
                None => expired.push(user_id),
            }
        }

        if !expired.is_empty() {
            debug!(
                target: "sc.storage.redis",
                meeting_id = %meeting_id,
                count = expired.len(),
                "Pruning expired participants from index"
            );
            conn.srem::<_, _, ()>(&index, expired)
                .await
                .map_err(|e| backend_error("prune_index", &e))?;
        }

        records.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        Ok(records)
    }

    /// Participant keys carry their own TTL, so there is nothing to sweep.
    async fn purge_expired(&self, _cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        Ok(0)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_key_patterns() {
        let meeting = MeetingId::parse("m-42").unwrap();
        assert_eq!(meeting_key(&meeting), "sc:meeting:m-42");
        assert_eq!(participant_key(&meeting, "u7"), "sc:participant:m-42:u7");
        assert_eq!(index_key(&meeting), "sc:participants:m-42");
    }

    #[tokio::test]
    async fn test_connect_rejects_invalid_url() {
        let result = RedisStore::connect("not-a-redis-url", Duration::from_secs(60)).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
    }
}
