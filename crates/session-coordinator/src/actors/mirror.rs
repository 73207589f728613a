//! Storage mirror worker.
//!
//! The hub never awaits storage. It hands each participant change to this
//! worker with a non-blocking `try_send`; the worker applies the writes in
//! order, retrying a failed write a few times before giving up. Failures are
//! logged and counted and never roll back the live session.
//!
//! On cancellation the worker applies whatever is already queued, then
//! exits.

use super::metrics::{ActorType, MailboxMonitor};
use crate::config::{Config, DEFAULT_MIRROR_QUEUE_CAPACITY};
use crate::models::{ParticipantPatch, ParticipantRecord};
use crate::observability::metrics as prom;
use crate::storage::ParticipantStore;

use chrono::{DateTime, Utc};
use common::types::{MeetingId, UserId};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

pub const DEFAULT_MIRROR_ATTEMPTS: u32 = 3;
pub const DEFAULT_MIRROR_RETRY_DELAY: Duration = Duration::from_secs(1);

/// One storage write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MirrorOp {
    Insert(ParticipantRecord),
    Update {
        meeting_id: MeetingId,
        user_id: UserId,
        patch: ParticipantPatch,
        at: DateTime<Utc>,
    },
}

impl MirrorOp {
    /// Label for storage metrics.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            MirrorOp::Insert(_) => "insert",
            MirrorOp::Update { .. } => "update",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MirrorSettings {
    pub queue_capacity: usize,
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for MirrorSettings {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_MIRROR_QUEUE_CAPACITY,
            max_attempts: DEFAULT_MIRROR_ATTEMPTS,
            retry_delay: DEFAULT_MIRROR_RETRY_DELAY,
        }
    }
}

impl MirrorSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            queue_capacity: config.mirror_queue_capacity,
            ..Self::default()
        }
    }
}

/// Handle used by the hub to queue writes.
#[derive(Clone, Debug)]
pub struct MirrorHandle {
    sender: mpsc::Sender<MirrorOp>,
    mailbox: Arc<MailboxMonitor>,
}

impl MirrorHandle {
    /// Spawn the worker. It stops when `cancel_token` fires or every handle
    /// is dropped.
    #[must_use]
    pub fn spawn(
        store: Arc<dyn ParticipantStore>,
        settings: MirrorSettings,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(settings.queue_capacity.max(1));
        let mailbox = MailboxMonitor::new(ActorType::Mirror);

        let actor = MirrorActor {
            receiver,
            store,
            settings,
            cancel_token,
            mailbox: Arc::clone(&mailbox),
        };
        let task = tokio::spawn(actor.run());

        (Self { sender, mailbox }, task)
    }

    /// Queue a write without waiting. Returns `false` if it was dropped.
    pub fn submit(&self, op: MirrorOp) -> bool {
        let operation = op.operation();
        self.mailbox.record_enqueue();
        match self.sender.try_send(op) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.mailbox.record_send_failure();
                self.mailbox.record_drop();
                prom::record_mirror_failure(operation);
                false
            }
            Err(TrySendError::Closed(_)) => {
                self.mailbox.record_send_failure();
                debug!(
                    target: "sc.actor.mirror",
                    operation = operation,
                    "Mirror stopped, write discarded"
                );
                false
            }
        }
    }
}

struct MirrorActor {
    receiver: mpsc::Receiver<MirrorOp>,
    store: Arc<dyn ParticipantStore>,
    settings: MirrorSettings,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
}

impl MirrorActor {
    #[instrument(skip_all, name = "sc.actor.mirror")]
    async fn run(mut self) {
        debug!(target: "sc.actor.mirror", "Storage mirror started");

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    self.drain().await;
                    break;
                }

                op = self.receiver.recv() => {
                    match op {
                        Some(op) => {
                            self.apply(op).await;
                            self.mailbox.record_dequeue();
                        }
                        None => break,
                    }
                }
            }
        }

        info!(
            target: "sc.actor.mirror",
            writes_processed = self.mailbox.messages_processed(),
            writes_dropped = self.mailbox.messages_dropped(),
            "Storage mirror stopped"
        );
    }

    async fn drain(&mut self) {
        self.receiver.close();
        let mut drained = 0usize;
        while let Ok(op) = self.receiver.try_recv() {
            self.apply(op).await;
            self.mailbox.record_dequeue();
            drained += 1;
        }
        if drained > 0 {
            debug!(target: "sc.actor.mirror", drained = drained, "Drained queued writes");
        }
    }

    async fn apply(&self, op: MirrorOp) {
        let operation = op.operation();
        let attempts = self.settings.max_attempts.max(1);

        for attempt in 1..=attempts {
            let start = Instant::now();
            let result = match &op {
                MirrorOp::Insert(record) => self.store.insert_participant(record).await,
                MirrorOp::Update {
                    meeting_id,
                    user_id,
                    patch,
                    at,
                } => self
                    .store
                    .update_participant(meeting_id, user_id, patch, *at)
                    .await
                    .map(|updated| {
                        if updated.is_none() {
                            debug!(
                                target: "sc.actor.mirror",
                                meeting_id = %meeting_id,
                                user_id = %user_id,
                                "No stored record to update"
                            );
                        }
                    }),
            };
            prom::record_storage_latency(operation, start.elapsed());

            match result {
                Ok(()) => return,
                Err(e) if attempt < attempts => {
                    warn!(
                        target: "sc.actor.mirror",
                        operation = operation,
                        attempt = attempt,
                        error = %e,
                        "Storage write failed, retrying"
                    );
                    tokio::time::sleep(self.settings.retry_delay).await;
                }
                Err(e) => {
                    error!(
                        target: "sc.actor.mirror",
                        operation = operation,
                        attempts = attempts,
                        error = %e,
                        "Storage write failed, giving up"
                    );
                    prom::record_mirror_failure(operation);
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{ConnectionStatus, ParticipantRole};
    use crate::storage::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use common::types::PeerId;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails the first `failures` writes.
    struct FailingStore {
        inner: MemoryStore,
        failures: AtomicU32,
        calls: AtomicU32,
    }

    impl FailingStore {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                inner: MemoryStore::new(),
                failures: AtomicU32::new(failures),
                calls: AtomicU32::new(0),
            })
        }

        fn fail(&self) -> Result<(), StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::Backend("injected".to_string()));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl ParticipantStore for FailingStore {
        async fn insert_participant(&self, record: &ParticipantRecord) -> Result<(), StoreError> {
            self.fail()?;
            self.inner.insert_participant(record).await
        }

        async fn update_participant(
            &self,
            meeting_id: &MeetingId,
            user_id: &UserId,
            patch: &ParticipantPatch,
            at: DateTime<Utc>,
        ) -> Result<Option<ParticipantRecord>, StoreError> {
            self.fail()?;
            self.inner
                .update_participant(meeting_id, user_id, patch, at)
                .await
        }

        async fn find_participant(
            &self,
            meeting_id: &MeetingId,
            user_id: &UserId,
        ) -> Result<Option<ParticipantRecord>, StoreError> {
            self.inner.find_participant(meeting_id, user_id).await
        }

        async fn list_participants(
            &self,
            meeting_id: &MeetingId,
        ) -> Result<Vec<ParticipantRecord>, StoreError> {
            self.inner.list_participants(meeting_id).await
        }

        async fn purge_expired(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
            self.inner.purge_expired(cutoff).await
        }
    }

    fn record() -> ParticipantRecord {
        ParticipantRecord::new(
            MeetingId::parse("m1").unwrap(),
            UserId::parse("u1").unwrap(),
            "Alice".to_string(),
            PeerId::parse("p1").unwrap(),
            ParticipantRole::Participant,
            ConnectionStatus::Connected,
            Utc::now(),
        )
    }

    async fn stop(cancel: CancellationToken, task: JoinHandle<()>) {
        cancel.cancel();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_retried_until_success() {
        let store = FailingStore::new(2);
        let cancel = CancellationToken::new();
        let (mirror, task) = MirrorHandle::spawn(
            Arc::clone(&store) as Arc<dyn ParticipantStore>,
            MirrorSettings::default(),
            cancel.clone(),
        );

        assert!(mirror.submit(MirrorOp::Insert(record())));
        stop(cancel, task).await;

        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
        let m1 = MeetingId::parse("m1").unwrap();
        assert_eq!(store.inner.list_participants(&m1).await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_abandoned_after_max_attempts() {
        let store = FailingStore::new(10);
        let cancel = CancellationToken::new();
        let (mirror, task) = MirrorHandle::spawn(
            Arc::clone(&store) as Arc<dyn ParticipantStore>,
            MirrorSettings::default(),
            cancel.clone(),
        );

        mirror.submit(MirrorOp::Insert(record()));
        // A later write still goes through once the store recovers.
        mirror.submit(MirrorOp::Update {
            meeting_id: MeetingId::parse("m1").unwrap(),
            user_id: UserId::parse("u1").unwrap(),
            patch: ParticipantPatch::status(ConnectionStatus::Disconnected),
            at: Utc::now(),
        });
        stop(cancel, task).await;

        assert_eq!(store.calls.load(Ordering::SeqCst), 6);
        assert_eq!(store.inner.participant_count().await, 0);
    }

    #[tokio::test]
    async fn test_queued_writes_applied_in_order() {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let (mirror, task) = MirrorHandle::spawn(
            Arc::clone(&store) as Arc<dyn ParticipantStore>,
            MirrorSettings::default(),
            cancel.clone(),
        );

        let r = record();
        mirror.submit(MirrorOp::Insert(r.clone()));
        mirror.submit(MirrorOp::Update {
            meeting_id: r.meeting_id.clone(),
            user_id: r.user_id.clone(),
            patch: ParticipantPatch::status(ConnectionStatus::Disconnected),
            at: Utc::now(),
        });
        stop(cancel, task).await;

        let stored = store
            .find_participant(&r.meeting_id, &r.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, ConnectionStatus::Disconnected);
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        let cancel = CancellationToken::new();
        let (mirror, task) = MirrorHandle::spawn(
            Arc::clone(&store) as Arc<dyn ParticipantStore>,
            MirrorSettings::default(),
            cancel.clone(),
        );
        stop(cancel, task).await;

        assert!(!mirror.submit(MirrorOp::Insert(record())));
    }

    #[tokio::test]
    async fn test_full_queue_drops_write() {
        let store = Arc::new(MemoryStore::new());
        let (sender, _receiver) = mpsc::channel(1);
        let mirror = MirrorHandle {
            sender,
            mailbox: MailboxMonitor::new(ActorType::Mirror),
        };

        assert!(mirror.submit(MirrorOp::Insert(record())));
        assert!(!mirror.submit(MirrorOp::Insert(record())));
        assert_eq!(mirror.mailbox.messages_dropped(), 1);
        assert_eq!(store.participant_count().await, 0);
    }
}
