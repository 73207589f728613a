//! Session Coordinator Library
//!
//! Real-time session coordination for browser video meetings:
//!
//! - Tracks which connections belong to which meeting room
//! - Fans out presence and control events (join, leave, mute, screen-share,
//!   hand, chat) to the right room
//! - Relays WebRTC signaling (offer, answer, ICE candidate) between peers
//!   of one room, addressed by peer id
//! - Mirrors participant records into storage for the REST surface
//!
//! The coordinator never touches media; it only brokers connection setup.
//!
//! # Architecture
//!
//! ```text
//! WebSocket reader tasks ─┐
//! REST handlers ──────────┼─► HubActor (single owner of rooms)
//! inactivity sweep ───────┘      │  try_send
//!                                ├─► per-connection outbound queues ─► writer tasks
//!                                └─► MirrorActor ─► ParticipantStore
//! ```
//!
//! # Key Design Decisions
//!
//! - **Serialized mutation**: all room changes are messages to one actor
//! - **Eviction on saturation**: a full outbound queue removes its connection
//!   instead of stalling the room
//! - **Storage is a mirror**: the live session is the source of truth
//!
//! # Modules
//!
//! - [`actors`] - hub, registry and storage mirror
//! - [`auth`] - session token validation
//! - [`config`] - service configuration from environment
//! - [`errors`] - error types with client-facing codes
//! - [`handlers`] - WebSocket and REST handlers
//! - [`middleware`] - per-client rate limiting
//! - [`signaling`] - wire envelope and inbound decoding
//! - [`storage`] - meeting and participant stores

pub mod actors;
pub mod auth;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod routes;
pub mod services;
pub mod signaling;
pub mod storage;
pub mod tasks;
