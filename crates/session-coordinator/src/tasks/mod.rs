//! Background tasks for the session coordinator.
//!
//! # Tasks
//!
//! - `retention` - Purges stored participant records past the retention window

pub mod retention;

pub use retention::{start_retention_sweep, RetentionConfig};
