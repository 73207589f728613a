//! Secret types for protecting sensitive values from accidental logging.
//!
//! Re-exports [`secrecy`] types. `SecretString` implements `Debug` with
//! redaction, so any struct deriving `Debug` that holds one is safe to log.
//! Secrets are zeroized on drop.
//!
//! Use `SecretString` for the token signing secret, the Redis URL (it may
//! embed a password) and bearer tokens in transit.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct StoreSettings {
//!     backend: String,
//!     redis_url: SecretString,
//! }
//!
//! let settings = StoreSettings {
//!     backend: "redis".to_string(),
//!     redis_url: SecretString::from("redis://:hunter2@cache:6379"),
//! };
//!
//! assert!(!format!("{settings:?}").contains("hunter2"));
//! assert!(settings.redis_url.expose_secret().starts_with("redis://"));
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretBox, SecretString};
