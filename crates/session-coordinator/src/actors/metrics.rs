//! Actor metrics and mailbox monitoring.
//!
//! | Actor   | Normal | Warning  | Critical |
//! |---------|--------|----------|----------|
//! | Hub     | < 100  | 100-500  | > 500    |
//! | Mirror  | < 200  | 200-800  | > 800    |

use crate::observability::metrics as prom;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

pub const HUB_MAILBOX_NORMAL: usize = 100;
pub const HUB_MAILBOX_WARNING: usize = 500;

pub const MIRROR_MAILBOX_NORMAL: usize = 200;
pub const MIRROR_MAILBOX_WARNING: usize = 800;

/// Actor type for metrics labeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorType {
    /// The event router (singleton).
    Hub,
    /// The storage mirror worker (singleton).
    Mirror,
}

impl ActorType {
    /// Returns the actor type as a string for metric labels.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            ActorType::Hub => "hub",
            ActorType::Mirror => "mirror",
        }
    }

    #[must_use]
    pub const fn warning_threshold(&self) -> usize {
        match self {
            ActorType::Hub => HUB_MAILBOX_WARNING,
            ActorType::Mirror => MIRROR_MAILBOX_WARNING,
        }
    }

    #[must_use]
    pub const fn normal_threshold(&self) -> usize {
        match self {
            ActorType::Hub => HUB_MAILBOX_NORMAL,
            ActorType::Mirror => MIRROR_MAILBOX_NORMAL,
        }
    }
}

/// Mailbox depth level for alerting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MailboxLevel {
    /// Below normal threshold.
    Normal,
    /// Between normal and warning thresholds.
    Warning,
    /// Above warning threshold.
    Critical,
}

/// Tracks queue depth of one actor mailbox.
///
/// Handles call [`record_enqueue`](Self::record_enqueue) before sending;
/// the actor calls [`record_dequeue`](Self::record_dequeue) after handling.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_type: ActorType,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
    messages_dropped: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_type: ActorType) -> Arc<Self> {
        Arc::new(Self {
            actor_type,
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
            messages_dropped: AtomicU64::new(0),
        })
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak_depth.fetch_max(new_depth, Ordering::Relaxed);

        let level = self.level_for_depth(new_depth);
        if level == MailboxLevel::Critical {
            warn!(
                target: "sc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                depth = new_depth,
                threshold = self.actor_type.warning_threshold(),
                "Mailbox depth critical"
            );
        } else if level == MailboxLevel::Warning
            && new_depth == self.actor_type.normal_threshold() + 1
        {
            // Log once when crossing into the warning band
            debug!(
                target: "sc.actor.mailbox",
                actor_type = self.actor_type.as_str(),
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        let previous = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            })
            .unwrap_or(0);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
        prom::set_actor_mailbox_depth(self.actor_type.as_str(), previous.saturating_sub(1));
    }

    /// Undo an enqueue whose send failed.
    pub fn record_send_failure(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |d| {
                Some(d.saturating_sub(1))
            });
    }

    /// Record a message being dropped due to backpressure.
    pub fn record_drop(&self) {
        let dropped = self.messages_dropped.fetch_add(1, Ordering::Relaxed) + 1;
        warn!(
            target: "sc.actor.mailbox",
            actor_type = self.actor_type.as_str(),
            dropped = dropped,
            "Message dropped due to backpressure"
        );
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_dropped(&self) -> u64 {
        self.messages_dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn current_level(&self) -> MailboxLevel {
        self.level_for_depth(self.current_depth())
    }

    fn level_for_depth(&self, depth: usize) -> MailboxLevel {
        if depth > self.actor_type.warning_threshold() {
            MailboxLevel::Critical
        } else if depth > self.actor_type.normal_threshold() {
            MailboxLevel::Warning
        } else {
            MailboxLevel::Normal
        }
    }
}

/// Live counts published by the hub after every mutation.
///
/// Read lock-free by the stats endpoint and readiness checks.
#[derive(Debug, Default)]
pub struct HubMetrics {
    active_connections: AtomicUsize,
    active_rooms: AtomicUsize,
    evictions: AtomicU64,
    relayed: AtomicU64,
}

/// Point-in-time copy of [`HubMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubMetricsSnapshot {
    pub connections: usize,
    pub rooms: usize,
    pub evictions: u64,
    pub relayed: u64,
}

impl HubMetrics {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Publish the registry size.
    pub fn set_counts(&self, connections: usize, rooms: usize) {
        self.active_connections.store(connections, Ordering::SeqCst);
        self.active_rooms.store(rooms, Ordering::SeqCst);
        prom::set_connections_active(connections);
        prom::set_rooms_active(rooms);
    }

    pub fn record_eviction(&self, reason: &'static str) {
        self.evictions.fetch_add(1, Ordering::Relaxed);
        prom::record_connection_evicted(reason);
    }

    pub fn record_relayed(&self, message_type: &'static str) {
        self.relayed.fetch_add(1, Ordering::Relaxed);
        prom::record_message_relayed(message_type);
    }

    #[must_use]
    pub fn snapshot(&self) -> HubMetricsSnapshot {
        HubMetricsSnapshot {
            connections: self.active_connections.load(Ordering::SeqCst),
            rooms: self.active_rooms.load(Ordering::SeqCst),
            evictions: self.evictions.load(Ordering::Relaxed),
            relayed: self.relayed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_actor_type_labels_and_thresholds() {
        assert_eq!(ActorType::Hub.as_str(), "hub");
        assert_eq!(ActorType::Mirror.as_str(), "mirror");
        assert_eq!(ActorType::Hub.normal_threshold(), 100);
        assert_eq!(ActorType::Hub.warning_threshold(), 500);
        assert_eq!(ActorType::Mirror.warning_threshold(), 800);
    }

    #[test]
    fn test_mailbox_monitor_enqueue_dequeue() {
        let monitor = MailboxMonitor::new(ActorType::Hub);

        monitor.record_enqueue();
        monitor.record_enqueue();
        monitor.record_enqueue();
        assert_eq!(monitor.current_depth(), 3);
        assert_eq!(monitor.peak_depth(), 3);

        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 2);
        assert_eq!(monitor.peak_depth(), 3);
        assert_eq!(monitor.messages_processed(), 1);

        monitor.record_send_failure();
        assert_eq!(monitor.current_depth(), 1);
    }

    #[test]
    fn test_mailbox_monitor_dequeue_never_underflows() {
        let monitor = MailboxMonitor::new(ActorType::Mirror);
        monitor.record_dequeue();
        assert_eq!(monitor.current_depth(), 0);
    }

    #[test]
    fn test_mailbox_monitor_levels() {
        let monitor = MailboxMonitor::new(ActorType::Hub);
        assert_eq!(monitor.current_level(), MailboxLevel::Normal);

        for _ in 0..150 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Warning);

        for _ in 0..400 {
            monitor.record_enqueue();
        }
        assert_eq!(monitor.current_level(), MailboxLevel::Critical);
    }

    #[test]
    fn test_mailbox_monitor_drop_counter() {
        let monitor = MailboxMonitor::new(ActorType::Mirror);
        monitor.record_drop();
        monitor.record_drop();
        assert_eq!(monitor.messages_dropped(), 2);
    }

    #[test]
    fn test_hub_metrics_snapshot() {
        let metrics = HubMetrics::new();
        metrics.set_counts(5, 2);
        metrics.record_eviction("queue_full");
        metrics.record_relayed("offer");
        metrics.record_relayed("answer");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.connections, 5);
        assert_eq!(snapshot.rooms, 2);
        assert_eq!(snapshot.evictions, 1);
        assert_eq!(snapshot.relayed, 2);
    }
}
