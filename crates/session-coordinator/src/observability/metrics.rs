//! Metrics definitions for the session coordinator.
//!
//! All metrics follow Prometheus naming conventions:
//! - `sc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `actor_type`: hub, mirror
//! - `message_type`: the envelope types (12 values)
//! - `reason`: eviction causes and join rejection reasons (under 10 each)
//! - `operation`: storage mirror operations (insert, update)

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Install the Prometheus recorder and return the handle served at
/// `/metrics`.
///
/// # Errors
///
/// Returns error if a recorder is already installed.
pub fn init_metrics_recorder() -> Result<PrometheusHandle, String> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Prefix("sc_storage".to_string()),
            &[
                0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.000, 2.500,
            ],
        )
        .map_err(|e| format!("Failed to set storage latency buckets: {e}"))?
        .install_recorder()
        .map_err(|e| format!("Failed to install Prometheus metrics recorder: {e}"))
}

/// Metric: `sc_connections_active`
pub fn set_connections_active(count: usize) {
    // usize to f64 is exact for realistic connection counts (< 2^53)
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_connections_active").set(count as f64);
}

/// Metric: `sc_rooms_active`
pub fn set_rooms_active(count: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_rooms_active").set(count as f64);
}

/// Set the mailbox depth for an actor type.
///
/// Metric: `sc_actor_mailbox_depth`
/// Labels: `actor_type`
pub fn set_actor_mailbox_depth(actor_type: &'static str, depth: usize) {
    #[allow(clippy::cast_precision_loss)]
    gauge!("sc_actor_mailbox_depth", "actor_type" => actor_type).set(depth as f64);
}

/// Metric: `sc_messages_relayed_total`
/// Labels: `message_type`
pub fn record_message_relayed(message_type: &'static str) {
    counter!("sc_messages_relayed_total", "message_type" => message_type).increment(1);
}

/// A connection removed by the hub for any reason other than a clean
/// leave: full or closed queue, idle expiry, malformed frame.
///
/// Metric: `sc_connections_evicted_total`
/// Labels: `reason`
pub fn record_connection_evicted(reason: &'static str) {
    counter!("sc_connections_evicted_total", "reason" => reason).increment(1);
}

/// Metric: `sc_join_rejections_total`
/// Labels: `reason`
pub fn record_join_rejection(reason: &'static str) {
    counter!("sc_join_rejections_total", "reason" => reason).increment(1);
}

/// A mirror write that exhausted its retries or was dropped on a full
/// queue.
///
/// Metric: `sc_storage_mirror_failures_total`
/// Labels: `operation`
pub fn record_mirror_failure(operation: &'static str) {
    counter!("sc_storage_mirror_failures_total", "operation" => operation).increment(1);
}

/// Metric: `sc_storage_latency_seconds`
/// Labels: `operation`
pub fn record_storage_latency(operation: &'static str, duration: Duration) {
    histogram!("sc_storage_latency_seconds", "operation" => operation)
        .record(duration.as_secs_f64());
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use metrics_util::debugging::{DebugValue, DebuggingRecorder};
    use metrics_util::MetricKind;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        set_connections_active(3);
        set_rooms_active(1);
        record_message_relayed("offer");
        record_storage_latency("insert", Duration::from_millis(2));
    }

    #[test]
    fn test_metric_names_and_labels() {
        let recorder = DebuggingRecorder::new();
        let snapshotter = recorder.snapshotter();

        metrics::with_local_recorder(&recorder, || {
            set_connections_active(42);
            set_rooms_active(7);
            set_actor_mailbox_depth("hub", 3);
            record_message_relayed("ice-candidate");
            record_message_relayed("ice-candidate");
            record_connection_evicted("queue_full");
            record_join_rejection("meeting_full");
            record_mirror_failure("update");
            record_storage_latency("insert", Duration::from_millis(4));
        });

        let snapshot = snapshotter.snapshot().into_vec();
        let find = |name: &str| {
            snapshot
                .iter()
                .find(|(key, _, _, _)| key.key().name() == name)
                .unwrap_or_else(|| panic!("metric {name} not recorded"))
        };

        let (_, _, _, value) = find("sc_connections_active");
        assert_eq!(*value, DebugValue::Gauge(42.0.into()));

        let (key, _, _, value) = find("sc_messages_relayed_total");
        assert_eq!(key.kind(), MetricKind::Counter);
        assert_eq!(*value, DebugValue::Counter(2));
        let label = key.key().labels().next().unwrap();
        assert_eq!(label.key(), "message_type");
        assert_eq!(label.value(), "ice-candidate");

        for name in [
            "sc_rooms_active",
            "sc_actor_mailbox_depth",
            "sc_connections_evicted_total",
            "sc_join_rejections_total",
            "sc_storage_mirror_failures_total",
            "sc_storage_latency_seconds",
        ] {
            find(name);
        }
    }
}
