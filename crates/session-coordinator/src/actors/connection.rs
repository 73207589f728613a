//! Hub-side view of one live WebSocket connection.
//!
//! The hub owns a [`ConnectionEntry`] for every registered connection. The
//! entry holds the sending half of the connection's outbound queue; the
//! writer task in `handlers::ws` owns the receiving half.
//!
//! # Lifecycle
//!
//! 1. Created by the hub when a join is admitted (`Registered`)
//! 2. Becomes `Active` on the first frame or pong from the client
//! 3. Ends `Unregistered` on leave, transport error, eviction or idle expiry

use crate::models::ParticipantRecord;

use common::types::ConnectionId;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Per-connection state machine. There is no way out of `Unregistered`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Registered,
    Active,
    Unregistered,
}

/// Why a connection left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
    /// Leave, transport close, malformed frame, idle expiry or shutdown.
    Requested,
    /// Outbound queue was full during a delivery.
    QueueFull,
    /// Writer task was already gone during a delivery.
    QueueClosed,
}

impl RemovalCause {
    /// Label for `sc_connections_evicted_total`.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            RemovalCause::Requested => "requested",
            RemovalCause::QueueFull => "queue_full",
            RemovalCause::QueueClosed => "queue_closed",
        }
    }

    #[must_use]
    pub const fn is_eviction(&self) -> bool {
        !matches!(self, RemovalCause::Requested)
    }
}

/// A connection registered with the hub.
#[derive(Debug)]
pub struct ConnectionEntry {
    connection_id: ConnectionId,
    /// Live participant record; mirrored to storage by the hub.
    pub record: ParticipantRecord,
    outbound: mpsc::Sender<Arc<str>>,
    cancel_token: CancellationToken,
    last_seen: Instant,
    state: ConnectionState,
}

impl ConnectionEntry {
    #[must_use]
    pub fn new(
        connection_id: ConnectionId,
        record: ParticipantRecord,
        outbound: mpsc::Sender<Arc<str>>,
        cancel_token: CancellationToken,
    ) -> Self {
        Self {
            connection_id,
            record,
            outbound,
            cancel_token,
            last_seen: Instant::now(),
            state: ConnectionState::Registered,
        }
    }

    #[must_use]
    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[must_use]
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Enqueue without waiting. A full or closed queue marks the
    /// connection dead.
    pub fn try_deliver(&self, frame: Arc<str>) -> Result<(), RemovalCause> {
        match self.outbound.try_send(frame) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(RemovalCause::QueueFull),
            Err(TrySendError::Closed(_)) => Err(RemovalCause::QueueClosed),
        }
    }

    /// Record client activity.
    pub fn touch(&mut self) {
        if self.state == ConnectionState::Unregistered {
            return;
        }
        self.last_seen = Instant::now();
        self.state = ConnectionState::Active;
    }

    #[must_use]
    pub fn is_idle_since(&self, cutoff: Instant) -> bool {
        self.last_seen < cutoff
    }

    /// Terminal transition. Cancels the transport tasks; dropping the entry
    /// afterwards closes the outbound queue.
    pub fn close(&mut self) {
        self.state = ConnectionState::Unregistered;
        self.cancel_token.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::models::{ConnectionStatus, ParticipantRole};
    use chrono::Utc;
    use common::types::{MeetingId, PeerId, UserId};
    use std::time::Duration;

    fn entry(capacity: usize) -> (ConnectionEntry, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(capacity);
        let record = ParticipantRecord::new(
            MeetingId::parse("m1").unwrap(),
            UserId::parse("u1").unwrap(),
            "Alice".to_string(),
            PeerId::parse("p1").unwrap(),
            ParticipantRole::Participant,
            ConnectionStatus::Connected,
            Utc::now(),
        );
        (
            ConnectionEntry::new(ConnectionId::new(), record, tx, CancellationToken::new()),
            rx,
        )
    }

    #[tokio::test]
    async fn test_try_deliver_reports_full_and_closed() {
        let (entry, mut rx) = entry(1);

        assert!(entry.try_deliver(Arc::from("one")).is_ok());
        assert_eq!(
            entry.try_deliver(Arc::from("two")),
            Err(RemovalCause::QueueFull)
        );
        assert_eq!(&*rx.recv().await.unwrap(), "one");

        drop(rx);
        assert_eq!(
            entry.try_deliver(Arc::from("three")),
            Err(RemovalCause::QueueClosed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_touch_activates_and_refreshes() {
        let (mut entry, _rx) = entry(4);
        assert_eq!(entry.state(), ConnectionState::Registered);

        tokio::time::advance(Duration::from_secs(10)).await;
        let cutoff = Instant::now();
        assert!(entry.is_idle_since(cutoff));

        entry.touch();
        assert_eq!(entry.state(), ConnectionState::Active);
        assert!(!entry.is_idle_since(cutoff));
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let (mut entry, _rx) = entry(4);
        let token = entry.cancel_token.clone();

        entry.close();
        assert!(token.is_cancelled());
        assert_eq!(entry.state(), ConnectionState::Unregistered);

        entry.touch();
        assert_eq!(entry.state(), ConnectionState::Unregistered);
    }

    #[test]
    fn test_removal_cause_labels() {
        assert_eq!(RemovalCause::QueueFull.as_str(), "queue_full");
        assert!(RemovalCause::QueueClosed.is_eviction());
        assert!(!RemovalCause::Requested.is_eviction());
    }
}
