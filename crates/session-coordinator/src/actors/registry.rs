//! Connection registry and meeting rooms.
//!
//! Owned exclusively by the hub actor; nothing here is shared or locked.
//!
//! Invariants, checked by [`Registry::is_consistent`] in tests:
//! - a room exists iff it has at least one member
//! - every member of a room is a registered connection bound to that meeting
//! - a peer id maps to at most one connection per room
//!
//! Delivery is at-most-once and never waits. A member whose outbound queue
//! is full or closed is removed on the spot, and its `user-left` is fanned
//! out through the same worklist. A cascade removes one connection per
//! step, so it always terminates.

use super::connection::{ConnectionEntry, RemovalCause};
use crate::models::ParticipantRecord;
use crate::signaling::{Envelope, MessageType};

use common::types::{ConnectionId, MeetingId, PeerId, UserId};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::time::Instant;
use tracing::warn;

#[derive(Debug, Default)]
struct Room {
    members: HashSet<ConnectionId>,
    peers: HashMap<PeerId, ConnectionId>,
}

/// A connection taken out of the registry, returned to the hub so it can
/// mirror the departure and record metrics.
#[derive(Debug)]
pub struct Removal {
    pub entry: ConnectionEntry,
    pub cause: RemovalCause,
}

/// Outcome of one registry mutation.
#[derive(Debug, Default)]
pub struct Fanout {
    /// Frames successfully enqueued, across the whole cascade.
    pub delivered: usize,
    pub removed: Vec<Removal>,
}

impl Fanout {
    pub fn merge(&mut self, other: Fanout) {
        self.delivered += other.delivered;
        self.removed.extend(other.removed);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.delivered == 0 && self.removed.is_empty()
    }
}

/// Outcome of a point-to-point delivery.
#[derive(Debug)]
pub enum Delivery {
    Delivered,
    /// No such connection or peer in the room.
    Unavailable,
    /// The target's queue was dead; it was removed.
    Evicted(Fanout),
}

struct Pending {
    meeting_id: MeetingId,
    frame: Arc<str>,
    exclude: Option<ConnectionId>,
}

#[derive(Debug, Default)]
pub struct Registry {
    connections: HashMap<ConnectionId, ConnectionEntry>,
    rooms: HashMap<MeetingId, Room>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `entry` to its meeting's room, creating the room if absent, and
    /// announce it to everyone already there.
    ///
    /// Admission (capacity, peer uniqueness) is the caller's job.
    pub fn register(&mut self, entry: ConnectionEntry) -> Fanout {
        let connection_id = entry.connection_id();
        let meeting_id = entry.record.meeting_id.clone();
        let announcement = Envelope::presence(MessageType::UserJoined, &entry.record);

        let room = self.rooms.entry(meeting_id.clone()).or_default();
        room.members.insert(connection_id);
        room.peers
            .insert(entry.record.peer_id.clone(), connection_id);
        self.connections.insert(connection_id, entry);

        self.broadcast_to_room(&meeting_id, &announcement, Some(connection_id))
    }

    /// Remove a connection. A second call for the same id is a no-op.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Fanout {
        self.remove_with_cascade(connection_id, RemovalCause::Requested)
    }

    /// Serialize `envelope` once and enqueue it to every member except
    /// `exclude`.
    pub fn broadcast_to_room(
        &mut self,
        meeting_id: &MeetingId,
        envelope: &Envelope,
        exclude: Option<ConnectionId>,
    ) -> Fanout {
        match envelope.to_frame() {
            Ok(frame) => self.broadcast_frame(meeting_id, frame, exclude),
            Err(e) => {
                warn!(
                    target: "sc.actor.hub",
                    meeting_id = %meeting_id,
                    message_type = envelope.kind.as_str(),
                    error = %e,
                    "Failed to serialize broadcast"
                );
                Fanout::default()
            }
        }
    }

    pub fn broadcast_frame(
        &mut self,
        meeting_id: &MeetingId,
        frame: Arc<str>,
        exclude: Option<ConnectionId>,
    ) -> Fanout {
        let mut fanout = Fanout::default();
        let mut work = VecDeque::from([Pending {
            meeting_id: meeting_id.clone(),
            frame,
            exclude,
        }]);
        self.drain(&mut work, &mut fanout);
        fanout
    }

    /// Enqueue `frame` to the connection owning `peer_id` in `meeting_id`.
    pub fn send_to_peer(
        &mut self,
        meeting_id: &MeetingId,
        peer_id: &PeerId,
        frame: Arc<str>,
    ) -> Delivery {
        match self.peer_connection(meeting_id, peer_id) {
            Some(target) => self.deliver(target, frame),
            None => Delivery::Unavailable,
        }
    }

    /// Enqueue `frame` to one connection.
    pub fn deliver(&mut self, connection_id: ConnectionId, frame: Arc<str>) -> Delivery {
        let Some(entry) = self.connections.get(&connection_id) else {
            return Delivery::Unavailable;
        };
        match entry.try_deliver(frame) {
            Ok(()) => Delivery::Delivered,
            Err(cause) => Delivery::Evicted(self.remove_with_cascade(connection_id, cause)),
        }
    }

    #[must_use]
    pub fn get(&self, connection_id: ConnectionId) -> Option<&ConnectionEntry> {
        self.connections.get(&connection_id)
    }

    pub fn get_mut(&mut self, connection_id: ConnectionId) -> Option<&mut ConnectionEntry> {
        self.connections.get_mut(&connection_id)
    }

    #[must_use]
    pub fn peer_connection(&self, meeting_id: &MeetingId, peer_id: &PeerId) -> Option<ConnectionId> {
        self.rooms
            .get(meeting_id)
            .and_then(|room| room.peers.get(peer_id))
            .copied()
    }

    /// Live connections of one user in one meeting (a user may have several
    /// tabs open).
    #[must_use]
    pub fn user_connections(&self, meeting_id: &MeetingId, user_id: &UserId) -> Vec<ConnectionId> {
        let Some(room) = self.rooms.get(meeting_id) else {
            return Vec::new();
        };
        room.members
            .iter()
            .filter(|id| {
                self.connections
                    .get(id)
                    .is_some_and(|entry| &entry.record.user_id == user_id)
            })
            .copied()
            .collect()
    }

    /// Records of every member, oldest join first.
    #[must_use]
    pub fn room_records(&self, meeting_id: &MeetingId) -> Vec<ParticipantRecord> {
        let Some(room) = self.rooms.get(meeting_id) else {
            return Vec::new();
        };
        let mut records: Vec<ParticipantRecord> = room
            .members
            .iter()
            .filter_map(|id| self.connections.get(id))
            .map(|entry| entry.record.clone())
            .collect();
        records.sort_by(|a, b| a.joined_at.cmp(&b.joined_at));
        records
    }

    #[must_use]
    pub fn room_size(&self, meeting_id: &MeetingId) -> usize {
        self.rooms.get(meeting_id).map_or(0, |room| room.members.len())
    }

    #[must_use]
    pub fn has_room(&self, meeting_id: &MeetingId) -> bool {
        self.rooms.contains_key(meeting_id)
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn connection_ids(&self) -> Vec<ConnectionId> {
        self.connections.keys().copied().collect()
    }

    /// Connections with no client activity since `cutoff`.
    #[must_use]
    pub fn stale_connections(&self, cutoff: Instant) -> Vec<ConnectionId> {
        self.connections
            .values()
            .filter(|entry| entry.is_idle_since(cutoff))
            .map(ConnectionEntry::connection_id)
            .collect()
    }

    /// Checks the registry invariants listed in the module docs.
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        let rooms_ok = self.rooms.iter().all(|(meeting_id, room)| {
            !room.members.is_empty()
                && room.members.iter().all(|id| {
                    self.connections
                        .get(id)
                        .is_some_and(|entry| &entry.record.meeting_id == meeting_id)
                })
                && room
                    .peers
                    .values()
                    .all(|id| room.members.contains(id))
        });

        let connections_ok = self.connections.iter().all(|(id, entry)| {
            self.rooms
                .get(&entry.record.meeting_id)
                .is_some_and(|room| room.members.contains(id))
        });

        rooms_ok && connections_ok
    }

    fn remove_with_cascade(&mut self, connection_id: ConnectionId, cause: RemovalCause) -> Fanout {
        let mut fanout = Fanout::default();
        let mut work = VecDeque::new();
        self.remove(connection_id, cause, &mut fanout, &mut work);
        self.drain(&mut work, &mut fanout);
        fanout
    }

    /// Take one connection out and queue its `user-left` if the room
    /// survives.
    fn remove(
        &mut self,
        connection_id: ConnectionId,
        cause: RemovalCause,
        fanout: &mut Fanout,
        work: &mut VecDeque<Pending>,
    ) {
        let Some(mut entry) = self.connections.remove(&connection_id) else {
            return;
        };
        entry.close();

        let meeting_id = entry.record.meeting_id.clone();
        let mut room_now_empty = false;
        if let Some(room) = self.rooms.get_mut(&meeting_id) {
            room.members.remove(&connection_id);
            if room.peers.get(&entry.record.peer_id) == Some(&connection_id) {
                room.peers.remove(&entry.record.peer_id);
            }
            room_now_empty = room.members.is_empty();
        }

        if room_now_empty {
            self.rooms.remove(&meeting_id);
        } else {
            let departure = Envelope::presence(MessageType::UserLeft, &entry.record);
            match departure.to_frame() {
                Ok(frame) => work.push_back(Pending {
                    meeting_id,
                    frame,
                    exclude: None,
                }),
                Err(e) => warn!(
                    target: "sc.actor.hub",
                    error = %e,
                    "Failed to serialize user-left"
                ),
            }
        }

        fanout.removed.push(Removal { entry, cause });
    }

    fn drain(&mut self, work: &mut VecDeque<Pending>, fanout: &mut Fanout) {
        while let Some(pending) = work.pop_front() {
            let Some(room) = self.rooms.get(&pending.meeting_id) else {
                continue;
            };

            let mut dead = Vec::new();
            for id in room.members.iter().filter(|id| Some(**id) != pending.exclude) {
                let Some(entry) = self.connections.get(id) else {
                    continue;
                };
                match entry.try_deliver(Arc::clone(&pending.frame)) {
                    Ok(()) => fanout.delivered += 1,
                    Err(cause) => dead.push((*id, cause)),
                }
            }

            for (id, cause) in dead {
                self.remove(id, cause, fanout, work);
            }
        }
    }
}
