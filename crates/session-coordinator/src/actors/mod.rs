//! Actor model for the session coordinator.
//!
//! ```text
//! HubActor (singleton per instance)
//! ├── owns the Registry (rooms, connections, peer index)
//! ├── delivers frames into per-connection outbound queues
//! └── hands participant writes to the MirrorActor
//!
//! MirrorActor (singleton per instance)
//! └── applies writes to the ParticipantStore in order, with retries
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: only the hub touches room state, so joins, leaves and
//!   broadcasts are totally ordered
//! - **Never block on a client**: deliveries use `try_send`; a full or closed
//!   queue evicts its connection
//! - **Storage is a mirror**: a failed write is logged and counted, and the
//!   live session is unaffected
//! - **CancellationToken propagation**: connection tasks hold child tokens of
//!   the hub's token
//!
//! # Modules
//!
//! - [`hub`] - `HubActor` and its handle
//! - [`registry`] - room and connection bookkeeping owned by the hub
//! - [`connection`] - per-connection entry held in the registry
//! - [`mirror`] - storage mirror worker
//! - [`messages`] - message types for actor communication
//! - [`metrics`] - mailbox monitoring and hub metrics

pub mod connection;
pub mod hub;
pub mod messages;
pub mod metrics;
pub mod mirror;
pub mod registry;

pub use connection::{ConnectionEntry, ConnectionState, RemovalCause};
pub use hub::{HubActor, HubHandle, HubSettings};
pub use messages::*;
pub use metrics::{ActorType, HubMetrics, HubMetricsSnapshot, MailboxMonitor};
pub use mirror::{MirrorHandle, MirrorOp, MirrorSettings};
pub use registry::{Delivery, Fanout, Registry, Removal};
