//! Signaling protocol: the wire envelope and inbound frame decoding.

pub mod envelope;
pub mod relay;

pub use envelope::{Envelope, ErrorData, MessageType, PresenceData};
pub use relay::{decode, ControlEvent, DecodeError, InboundMessage};
