//! HTTP and WebSocket request handlers.

pub mod metrics;
pub mod participants;
pub mod stats;
pub mod ws;

pub use metrics::metrics_handler;
pub use participants::{get_participants, join_notify, update_participant};
pub use stats::stats;
pub use ws::ws_handler;
