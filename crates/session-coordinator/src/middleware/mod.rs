//! HTTP middleware for the session coordinator.
//!
//! # Components
//!
//! - `rate_limit` - per-client-address request quota for the API routes

pub mod rate_limit;

pub use rate_limit::{rate_limit, RateLimitState};
