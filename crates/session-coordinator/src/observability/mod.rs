//! Observability for the session coordinator.
//!
//! # Privacy by Default
//!
//! Instrumentation uses `#[instrument(skip_all)]` with explicit fields.
//! Tokens, secrets and Redis URLs are never logged. Metric labels are
//! bounded enums, never user or meeting ids.
//!
//! # Metrics
//!
//! | Metric | Type | Labels | Purpose |
//! |--------|------|--------|---------|
//! | `sc_connections_active` | Gauge | none | Registered connections |
//! | `sc_rooms_active` | Gauge | none | Non-empty rooms |
//! | `sc_actor_mailbox_depth` | Gauge | `actor_type` | Backpressure per actor |
//! | `sc_messages_relayed_total` | Counter | `message_type` | Frames routed by the hub |
//! | `sc_connections_evicted_total` | Counter | `reason` | Non-clean removals |
//! | `sc_join_rejections_total` | Counter | `reason` | Refused joins |
//! | `sc_storage_mirror_failures_total` | Counter | `operation` | Lost mirror writes |
//! | `sc_storage_latency_seconds` | Histogram | `operation` | Mirror write latency |

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::init_metrics_recorder;
