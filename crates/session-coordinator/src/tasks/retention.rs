//! Participant retention background task.
//!
//! Stored participant records are a mirror of live sessions. This task
//! deletes the ones untouched for longer than the retention window. It is a
//! storage-hygiene net only: live departures are handled by the hub.
//!
//! Redis expires keys on its own, so for that backend a sweep only returns 0.
//!
//! # Graceful Shutdown
//!
//! The task supports graceful shutdown via a cancellation token. When the token
//! is cancelled, the task completes its current iteration and exits cleanly.

use crate::config::{
    Config, DEFAULT_PARTICIPANT_RETENTION_SECONDS, DEFAULT_RETENTION_SWEEP_INTERVAL_SECONDS,
};
use crate::storage::ParticipantStore;

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

#[derive(Debug, Clone, Copy)]
pub struct RetentionConfig {
    /// How often to sweep.
    pub sweep_interval: Duration,
    /// Records with `lastActive` older than this are purged.
    pub retention: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval: Duration::from_secs(DEFAULT_RETENTION_SWEEP_INTERVAL_SECONDS),
            retention: Duration::from_secs(DEFAULT_PARTICIPANT_RETENTION_SECONDS),
        }
    }
}

impl RetentionConfig {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            sweep_interval: config.retention_sweep_interval,
            retention: config.participant_retention,
        }
    }
}

/// Start the retention sweep.
///
/// Sweeps once immediately, then every `sweep_interval`, until the
/// cancellation token is triggered.
#[instrument(skip_all, name = "sc.task.retention")]
pub async fn start_retention_sweep(
    store: Arc<dyn ParticipantStore>,
    config: RetentionConfig,
    cancel_token: CancellationToken,
) {
    info!(
        target: "sc.task.retention",
        sweep_interval_seconds = config.sweep_interval.as_secs(),
        retention_seconds = config.retention.as_secs(),
        "Starting retention sweep task"
    );

    let mut interval = tokio::time::interval(config.sweep_interval);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                run_sweep(store.as_ref(), config.retention).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "sc.task.retention",
                    "Retention sweep task received shutdown signal, exiting"
                );
                break;
            }
        }
    }
}

/// One sweep. Returns the number of purged records, or `None` on failure.
pub async fn run_sweep(store: &dyn ParticipantStore, retention: Duration) -> Option<u64> {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::MAX);
    let cutoff = Utc::now()
        .checked_sub_signed(retention)
        .unwrap_or(chrono::DateTime::<Utc>::MIN_UTC);

    match store.purge_expired(cutoff).await {
        Ok(purged) => {
            if purged > 0 {
                info!(
                    target: "sc.task.retention",
                    purged = purged,
                    "Purged expired participant records"
                );
            }
            Some(purged)
        }
        Err(e) => {
            error!(
                target: "sc.task.retention",
                error = %e,
                "Failed to purge expired participant records"
            );
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{ConnectionStatus, ParticipantRecord, ParticipantRole};
    use crate::storage::MemoryStore;
    use common::types::{MeetingId, PeerId, UserId};

    fn record(user: &str, age: chrono::Duration) -> ParticipantRecord {
        ParticipantRecord::new(
            MeetingId::parse("m1").unwrap(),
            UserId::parse(user).unwrap(),
            user.to_string(),
            PeerId::parse(format!("peer-{user}")).unwrap(),
            ParticipantRole::Participant,
            ConnectionStatus::Disconnected,
            Utc::now() - age,
        )
    }

    #[test]
    fn test_default_config() {
        let config = RetentionConfig::default();
        assert_eq!(config.sweep_interval, Duration::from_secs(3600));
        assert_eq!(config.retention, Duration::from_secs(86_400));
    }

    #[tokio::test]
    async fn test_run_sweep_purges_only_expired() {
        let store = MemoryStore::new();
        store
            .insert_participant(&record("old", chrono::Duration::hours(25)))
            .await
            .unwrap();
        store
            .insert_participant(&record("fresh", chrono::Duration::minutes(5)))
            .await
            .unwrap();

        let purged = run_sweep(&store, Duration::from_secs(86_400)).await;
        assert_eq!(purged, Some(1));
        assert_eq!(store.participant_count().await, 1);
    }

    #[tokio::test]
    async fn test_task_sweeps_then_exits_on_cancel() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_participant(&record("old", chrono::Duration::hours(48)))
            .await
            .unwrap();

        let cancel = CancellationToken::new();
        let task = tokio::spawn(start_retention_sweep(
            Arc::clone(&store) as Arc<dyn ParticipantStore>,
            RetentionConfig::default(),
            cancel.clone(),
        ));

        // The first tick fires immediately.
        for _ in 0..50 {
            if store.participant_count().await == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(store.participant_count().await, 0);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("task should exit")
            .unwrap();
    }
}
