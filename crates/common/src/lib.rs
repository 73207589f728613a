//! Common utilities and types shared across session coordinator crates.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for identifier newtypes
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for JWT utilities (size limits, claims, clock skew)
pub mod jwt;
