//! `HubActor` - the single owner of rooms and connections.
//!
//! Every state change goes through the hub's mailbox and is applied one
//! message at a time, so membership, peer lookups and broadcasts never race.
//! Producers (connection readers, HTTP handlers) only wait for mailbox
//! capacity, never for room state.
//!
//! The hub itself never blocks on a connection: deliveries use `try_send`
//! and a dead queue gets its connection evicted (see [`Registry`]). Storage
//! writes are handed to the [`MirrorHandle`] the same way.
//!
//! # Inactivity
//!
//! The hub ticks every `sweep_interval` and unregisters connections with no
//! client activity (frame or pong) for `inactivity_timeout`. The synthetic
//! `user-left` goes out through the normal unregister path.

use crate::config::{
    Config, DEFAULT_HUB_CHANNEL_CAPACITY, DEFAULT_INACTIVITY_SWEEP_INTERVAL_SECONDS,
    DEFAULT_INACTIVITY_TIMEOUT_SECONDS,
};
use crate::errors::SessionError;
use crate::models::{ConnectionStatus, ParticipantPatch, ParticipantRecord};
use crate::signaling::{decode, Envelope, InboundMessage, MessageType};

use super::connection::ConnectionEntry;
use super::messages::{HubMessage, HubStatus, JoinAdmission, JoinRequest, LeaveReason};
use super::metrics::{ActorType, HubMetrics, HubMetricsSnapshot, MailboxMonitor};
use super::mirror::{MirrorHandle, MirrorOp};
use super::registry::{Delivery, Fanout, Registry};

use chrono::{DateTime, Utc};
use common::types::{ConnectionId, MeetingId, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    pub channel_capacity: usize,
    pub inactivity_timeout: Duration,
    pub sweep_interval: Duration,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            channel_capacity: DEFAULT_HUB_CHANNEL_CAPACITY,
            inactivity_timeout: Duration::from_secs(DEFAULT_INACTIVITY_TIMEOUT_SECONDS),
            sweep_interval: Duration::from_secs(DEFAULT_INACTIVITY_SWEEP_INTERVAL_SECONDS),
        }
    }
}

impl HubSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            channel_capacity: config.hub_channel_capacity,
            inactivity_timeout: config.inactivity_timeout,
            sweep_interval: config.inactivity_sweep_interval,
        }
    }
}

/// Handle to the `HubActor`.
///
/// Cheap to clone. Once the hub has stopped every call fails with
/// `SessionError::Unavailable`.
#[derive(Clone, Debug)]
pub struct HubHandle {
    sender: mpsc::Sender<HubMessage>,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    metrics: Arc<HubMetrics>,
}

impl HubHandle {
    /// Spawn the hub and return a handle to it.
    #[must_use]
    pub fn spawn(
        settings: HubSettings,
        mirror: MirrorHandle,
        cancel_token: CancellationToken,
    ) -> (Self, JoinHandle<()>) {
        let (sender, receiver) = mpsc::channel(settings.channel_capacity.max(1));
        let mailbox = MailboxMonitor::new(ActorType::Hub);
        let metrics = HubMetrics::new();

        let actor = HubActor {
            receiver,
            registry: Registry::new(),
            mirror,
            settings,
            cancel_token: cancel_token.clone(),
            mailbox: Arc::clone(&mailbox),
            metrics: Arc::clone(&metrics),
        };
        let task = tokio::spawn(actor.run());

        (
            Self {
                sender,
                cancel_token,
                mailbox,
                metrics,
            },
            task,
        )
    }

    async fn send(&self, message: HubMessage) -> Result<(), SessionError> {
        self.mailbox.record_enqueue();
        self.sender.send(message).await.map_err(|_| {
            self.mailbox.record_send_failure();
            SessionError::Unavailable("hub stopped".to_string())
        })
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> HubMessage,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.send(build(tx)).await?;
        rx.await
            .map_err(|_| SessionError::Unavailable("hub dropped the request".to_string()))
    }

    /// Admit a connection.
    ///
    /// # Errors
    ///
    /// - `MeetingFull` if the room is at capacity
    /// - `PeerIdInUse` if the peer id is live in the room
    /// - `Unavailable` if the hub has stopped
    pub async fn join(&self, request: JoinRequest) -> Result<JoinAdmission, SessionError> {
        self.request(|respond_to| HubMessage::Join {
            request,
            respond_to,
        })
        .await?
    }

    /// Remove a connection. Safe to call more than once, and after the hub
    /// has stopped.
    pub async fn leave(&self, connection_id: ConnectionId, reason: LeaveReason) {
        let _ = self
            .send(HubMessage::Leave {
                connection_id,
                reason,
            })
            .await;
    }

    /// Hand a text frame to the relay.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the hub has stopped.
    pub async fn inbound(&self, connection_id: ConnectionId, frame: String) -> Result<(), SessionError> {
        self.send(HubMessage::Inbound {
            connection_id,
            frame,
        })
        .await
    }

    /// Record transport-level activity (pong).
    pub async fn touch(&self, connection_id: ConnectionId) {
        let _ = self.send(HubMessage::Touch { connection_id }).await;
    }

    /// Apply `patch` to every live connection of `user_id` in the meeting
    /// and broadcast the result. `Ok(None)` if the user has no live
    /// connection.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the hub has stopped.
    pub async fn update_participant(
        &self,
        meeting_id: MeetingId,
        user_id: UserId,
        patch: ParticipantPatch,
        at: DateTime<Utc>,
    ) -> Result<Option<ParticipantRecord>, SessionError> {
        self.request(|respond_to| HubMessage::UpdateParticipant {
            meeting_id,
            user_id,
            patch,
            at,
            respond_to,
        })
        .await
    }

    /// Live records of one room, oldest join first.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the hub has stopped.
    pub async fn room_snapshot(&self, meeting_id: MeetingId) -> Result<Vec<ParticipantRecord>, SessionError> {
        self.request(|respond_to| HubMessage::RoomSnapshot {
            meeting_id,
            respond_to,
        })
        .await
    }

    /// Broadcast a server-originated envelope to a room.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the hub has stopped.
    pub async fn broadcast(
        &self,
        meeting_id: MeetingId,
        envelope: Envelope,
        exclude: Option<ConnectionId>,
    ) -> Result<(), SessionError> {
        self.send(HubMessage::Broadcast {
            meeting_id,
            envelope,
            exclude,
        })
        .await
    }

    /// # Errors
    ///
    /// Returns `Unavailable` if the hub has stopped.
    pub async fn status(&self) -> Result<HubStatus, SessionError> {
        self.request(|respond_to| HubMessage::Status { respond_to })
            .await
    }

    /// Close every connection and stop the hub. Queued mirror writes for the
    /// departures are submitted before this returns.
    ///
    /// # Errors
    ///
    /// Returns `Unavailable` if the hub had already stopped.
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.request(|respond_to| HubMessage::Shutdown { respond_to })
            .await
    }

    /// Last published counts, without a round trip through the mailbox.
    #[must_use]
    pub fn metrics(&self) -> HubMetricsSnapshot {
        self.metrics.snapshot()
    }

    #[must_use]
    pub fn mailbox(&self) -> &MailboxMonitor {
        &self.mailbox
    }

    /// Cancel the hub (immediate shutdown).
    pub fn cancel(&self) {
        self.cancel_token.cancel();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel_token.is_cancelled()
    }

    /// Token for per-connection tasks; cancelled when the hub is.
    #[must_use]
    pub fn child_token(&self) -> CancellationToken {
        self.cancel_token.child_token()
    }
}

pub struct HubActor {
    receiver: mpsc::Receiver<HubMessage>,
    registry: Registry,
    mirror: MirrorHandle,
    settings: HubSettings,
    cancel_token: CancellationToken,
    mailbox: Arc<MailboxMonitor>,
    metrics: Arc<HubMetrics>,
}

impl HubActor {
    #[instrument(skip_all, name = "sc.actor.hub")]
    async fn run(mut self) {
        info!(target: "sc.actor.hub", "Hub started");

        let period = self.settings.sweep_interval;
        let mut sweep = tokio::time::interval_at(Instant::now() + period, period);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                () = self.cancel_token.cancelled() => {
                    info!(target: "sc.actor.hub", "Hub received cancellation signal");
                    self.close_all(LeaveReason::Shutdown);
                    break;
                }

                msg = self.receiver.recv() => {
                    let Some(message) = msg else {
                        info!(target: "sc.actor.hub", "Hub channel closed, exiting");
                        break;
                    };
                    let stop = self.handle_message(message);
                    self.mailbox.record_dequeue();
                    self.publish_counts();
                    if stop {
                        break;
                    }
                }

                _ = sweep.tick() => {
                    self.sweep_idle();
                    self.publish_counts();
                }
            }
        }

        self.publish_counts();
        info!(
            target: "sc.actor.hub",
            messages_processed = self.mailbox.messages_processed(),
            evictions = self.metrics.snapshot().evictions,
            "Hub stopped"
        );
    }

    /// Returns `true` when the hub should stop.
    fn handle_message(&mut self, message: HubMessage) -> bool {
        match message {
            HubMessage::Join {
                request,
                respond_to,
            } => {
                let result = self.join(request);
                let _ = respond_to.send(result);
            }

            HubMessage::Leave {
                connection_id,
                reason,
            } => self.leave(connection_id, reason),

            HubMessage::Inbound {
                connection_id,
                frame,
            } => self.inbound(connection_id, frame),

            HubMessage::Touch { connection_id } => {
                if let Some(entry) = self.registry.get_mut(connection_id) {
                    entry.touch();
                }
            }

            HubMessage::UpdateParticipant {
                meeting_id,
                user_id,
                patch,
                at,
                respond_to,
            } => {
                let updated = self.update_participant(&meeting_id, &user_id, &patch, at);
                let _ = respond_to.send(updated);
            }

            HubMessage::RoomSnapshot {
                meeting_id,
                respond_to,
            } => {
                let _ = respond_to.send(self.registry.room_records(&meeting_id));
            }

            HubMessage::Broadcast {
                meeting_id,
                envelope,
                exclude,
            } => {
                let fanout = self.registry.broadcast_to_room(&meeting_id, &envelope, exclude);
                self.settle(fanout);
            }

            HubMessage::Status { respond_to } => {
                let _ = respond_to.send(HubStatus {
                    connections: self.registry.connection_count(),
                    rooms: self.registry.room_count(),
                });
            }

            HubMessage::Shutdown { respond_to } => {
                self.close_all(LeaveReason::Shutdown);
                let _ = respond_to.send(());
                return true;
            }
        }

        debug_assert!(self.registry.is_consistent());
        false
    }

    fn join(&mut self, request: JoinRequest) -> Result<JoinAdmission, SessionError> {
        let JoinRequest {
            connection_id,
            meeting_id,
            user_id,
            user_name,
            peer_id,
            role,
            capacity,
            outbound,
            cancel_token,
        } = request;

        if self.registry.get(connection_id).is_some() {
            return Err(SessionError::Internal(format!(
                "connection {connection_id} already registered"
            )));
        }
        if self.registry.room_size(&meeting_id) >= capacity {
            debug!(
                target: "sc.actor.hub",
                meeting_id = %meeting_id,
                capacity = capacity,
                "Join rejected, meeting full"
            );
            return Err(SessionError::MeetingFull(format!(
                "meeting {meeting_id} at capacity {capacity}"
            )));
        }
        if self.registry.peer_connection(&meeting_id, &peer_id).is_some() {
            return Err(SessionError::PeerIdInUse(format!(
                "peer {peer_id} already in meeting {meeting_id}"
            )));
        }

        let participants = self.registry.room_records(&meeting_id);
        let record = ParticipantRecord::new(
            meeting_id,
            user_id,
            user_name,
            peer_id,
            role,
            ConnectionStatus::Connected,
            Utc::now(),
        );
        let entry = ConnectionEntry::new(connection_id, record.clone(), outbound, cancel_token);

        let fanout = self.registry.register(entry);
        self.mirror.submit(MirrorOp::Insert(record.clone()));

        info!(
            target: "sc.actor.hub",
            connection_id = %connection_id,
            meeting_id = %record.meeting_id,
            user_id = %record.user_id,
            peer_id = %record.peer_id,
            room_size = participants.len() + 1,
            "Connection registered"
        );
        self.settle(fanout);

        Ok(JoinAdmission {
            record,
            participants,
        })
    }

    fn leave(&mut self, connection_id: ConnectionId, reason: LeaveReason) {
        let fanout = self.registry.unregister(connection_id);
        if fanout.removed.is_empty() {
            debug!(
                target: "sc.actor.hub",
                connection_id = %connection_id,
                reason = reason.as_str(),
                "Leave for unknown connection ignored"
            );
            return;
        }

        info!(
            target: "sc.actor.hub",
            connection_id = %connection_id,
            reason = reason.as_str(),
            "Connection unregistered"
        );
        if reason.is_eviction() {
            self.metrics.record_eviction(reason.as_str());
        }
        self.settle(fanout);
    }

    fn inbound(&mut self, connection_id: ConnectionId, frame: String) {
        let Some(entry) = self.registry.get_mut(connection_id) else {
            debug!(
                target: "sc.actor.hub",
                connection_id = %connection_id,
                "Frame from unregistered connection dropped"
            );
            return;
        };
        entry.touch();
        let meeting_id = entry.record.meeting_id.clone();

        match decode(&frame) {
            Err(e) if e.is_fatal() => {
                warn!(
                    target: "sc.actor.hub",
                    connection_id = %connection_id,
                    error = %e,
                    "Malformed frame, closing connection"
                );
                self.leave(connection_id, LeaveReason::MalformedFrame);
            }

            Err(e) => {
                debug!(
                    target: "sc.actor.hub",
                    connection_id = %connection_id,
                    error = %e,
                    "Rejected frame"
                );
                self.notify(connection_id, &Envelope::error(e.code(), e.to_string()));
            }

            Ok(InboundMessage::Signal { kind, target }) => {
                let unavailable = match self
                    .registry
                    .send_to_peer(&meeting_id, &target, Arc::from(frame))
                {
                    Delivery::Delivered => {
                        self.metrics.record_relayed(kind.as_str());
                        false
                    }
                    Delivery::Unavailable => {
                        debug!(
                            target: "sc.actor.hub",
                            meeting_id = %meeting_id,
                            target_peer = %target,
                            message_type = kind.as_str(),
                            "Signaling target not in room"
                        );
                        true
                    }
                    Delivery::Evicted(fanout) => {
                        self.settle(fanout);
                        true
                    }
                };
                if unavailable {
                    self.notify(
                        connection_id,
                        &Envelope::error(
                            "PEER_UNAVAILABLE",
                            format!("Peer {target} is not in this meeting"),
                        ),
                    );
                }
            }

            Ok(InboundMessage::Control(event)) => {
                let now = Utc::now();
                let Some(entry) = self.registry.get_mut(connection_id) else {
                    return;
                };
                let patch = event.patch();
                match &patch {
                    Some(patch) => entry.record.apply(patch, now),
                    None => entry.record.last_active = now,
                }
                let envelope = event.outbound(&entry.record, now);
                let user_id = entry.record.user_id.clone();

                // Chat carries no patch; an empty one still moves last_active.
                self.mirror.submit(MirrorOp::Update {
                    meeting_id: meeting_id.clone(),
                    user_id,
                    patch: patch.unwrap_or_default(),
                    at: now,
                });

                self.metrics.record_relayed(envelope.kind.as_str());
                let fanout =
                    self.registry
                        .broadcast_to_room(&meeting_id, &envelope, Some(connection_id));
                self.settle(fanout);
            }
        }
    }

    fn update_participant(
        &mut self,
        meeting_id: &MeetingId,
        user_id: &UserId,
        patch: &ParticipantPatch,
        at: DateTime<Utc>,
    ) -> Option<ParticipantRecord> {
        let mut updated = None;
        let mut fanout = Fanout::default();

        for connection_id in self.registry.user_connections(meeting_id, user_id) {
            let Some(entry) = self.registry.get_mut(connection_id) else {
                continue;
            };
            entry.record.apply(patch, at);
            let record = entry.record.clone();

            let envelope = Envelope::from_participant(
                MessageType::ParticipantUpdate,
                &record,
                serde_json::to_value(&record).unwrap_or_default(),
                at,
            );
            fanout.merge(self.registry.broadcast_to_room(meeting_id, &envelope, None));
            updated = Some(record);
        }

        if updated.is_some() {
            self.metrics
                .record_relayed(MessageType::ParticipantUpdate.as_str());
            self.mirror.submit(MirrorOp::Update {
                meeting_id: meeting_id.clone(),
                user_id: user_id.clone(),
                patch: patch.clone(),
                at,
            });
        }
        self.settle(fanout);
        updated
    }

    /// Send an informational notice to one connection.
    fn notify(&mut self, connection_id: ConnectionId, envelope: &Envelope) {
        let Ok(frame) = envelope.to_frame() else {
            return;
        };
        if let Delivery::Evicted(fanout) = self.registry.deliver(connection_id, frame) {
            self.settle(fanout);
        }
    }

    fn sweep_idle(&mut self) {
        let Some(cutoff) = Instant::now().checked_sub(self.settings.inactivity_timeout) else {
            return;
        };
        let stale = self.registry.stale_connections(cutoff);
        if stale.is_empty() {
            return;
        }

        info!(
            target: "sc.actor.hub",
            count = stale.len(),
            "Expiring idle connections"
        );
        for connection_id in stale {
            self.leave(connection_id, LeaveReason::IdleTimeout);
        }
    }

    fn close_all(&mut self, reason: LeaveReason) {
        let ids = self.registry.connection_ids();
        if !ids.is_empty() {
            info!(
                target: "sc.actor.hub",
                count = ids.len(),
                reason = reason.as_str(),
                "Closing all connections"
            );
        }
        for connection_id in ids {
            let fanout = self.registry.unregister(connection_id);
            self.settle(fanout);
        }
    }

    /// Record evictions and mirror departures for every connection the
    /// registry removed.
    fn settle(&mut self, fanout: Fanout) {
        for removal in fanout.removed {
            let record = &removal.entry.record;
            if removal.cause.is_eviction() {
                info!(
                    target: "sc.actor.hub",
                    connection_id = %removal.entry.connection_id(),
                    meeting_id = %record.meeting_id,
                    cause = removal.cause.as_str(),
                    "Connection evicted"
                );
                self.metrics.record_eviction(removal.cause.as_str());
            }

            // Another tab of the same user keeps the stored record connected.
            if self
                .registry
                .user_connections(&record.meeting_id, &record.user_id)
                .is_empty()
            {
                self.mirror.submit(MirrorOp::Update {
                    meeting_id: record.meeting_id.clone(),
                    user_id: record.user_id.clone(),
                    patch: ParticipantPatch::status(ConnectionStatus::Disconnected),
                    at: Utc::now(),
                });
            }
        }
    }

    fn publish_counts(&self) {
        self.metrics
            .set_counts(self.registry.connection_count(), self.registry.room_count());
    }
}
