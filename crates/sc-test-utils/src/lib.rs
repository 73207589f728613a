//! # Session Coordinator Test Utilities
//!
//! Shared fixtures and harnesses for session coordinator tests.
//!
//! ## Modules
//!
//! - `fixtures` - meeting builders
//! - `token_builders` - signed session tokens for test users
//! - `flaky_store` - a participant store that fails on demand
//! - `server_harness` - a real coordinator bound to a random local port
//!
//! ## Usage
//!
//! ```rust,ignore
//! use sc_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let meeting = TestMeeting::new("standup").created_by("alice").build();
//!     let server = TestScServer::builder().with_meeting(meeting).spawn().await?;
//!
//!     let token = TestTokenBuilder::new().for_user("bob").sign();
//!     let url = server.ws_url("standup", "peer-bob", &token);
//!     // Connect with any WebSocket client...
//!     Ok(())
//! }
//! ```

pub mod fixtures;
pub mod flaky_store;
pub mod server_harness;
pub mod token_builders;

pub use fixtures::*;
pub use flaky_store::*;
pub use server_harness::*;
pub use token_builders::*;
