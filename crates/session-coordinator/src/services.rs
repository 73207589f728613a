//! Assembly of the running coordinator: stores, the hub, the storage mirror
//! and the retention sweep.
//!
//! `main` and the end-to-end tests both build the service through
//! [`Services::start`], so they exercise the same wiring.
//!
//! # Shutdown order
//!
//! 1. The hub closes every connection and queues the final
//!    `disconnected` writes
//! 2. The mirror applies what is queued, then stops
//! 3. The retention sweep stops with the root token

use crate::actors::{HubHandle, HubSettings, MirrorHandle, MirrorSettings};
use crate::auth::TokenValidator;
use crate::config::{Config, StoreBackend};
use crate::routes::AppState;
use crate::storage::{MeetingStore, MemoryStore, ParticipantStore, RedisStore, StoreError};
use crate::tasks::{start_retention_sweep, RetentionConfig};

use common::secret::ExposeSecret;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// The storage collaborators, as trait objects.
#[derive(Clone)]
pub struct Stores {
    pub meetings: Arc<dyn MeetingStore>,
    pub participants: Arc<dyn ParticipantStore>,
}

impl Stores {
    /// One store serving both traits.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: MeetingStore + ParticipantStore + 'static,
    {
        Self {
            meetings: Arc::clone(&store) as Arc<dyn MeetingStore>,
            participants: store as Arc<dyn ParticipantStore>,
        }
    }

    /// Open the backend named by `SC_STORE_BACKEND`.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Backend` if Redis is selected and unreachable,
    /// or its URL is missing.
    pub async fn from_config(config: &Config) -> Result<Self, StoreError> {
        match config.store_backend {
            StoreBackend::Memory => {
                info!(target: "sc.storage", "Using in-memory store");
                Ok(Self::shared(Arc::new(MemoryStore::new())))
            }
            StoreBackend::Redis => {
                let url = config
                    .redis_url
                    .as_ref()
                    .ok_or_else(|| StoreError::Backend("REDIS_URL is not set".to_string()))?;
                let store =
                    RedisStore::connect(url.expose_secret(), config.participant_retention).await?;
                info!(target: "sc.storage", "Connected to Redis store");
                Ok(Self::shared(Arc::new(store)))
            }
        }
    }
}

/// Running background actors and the state handed to the router.
pub struct Services {
    pub state: Arc<AppState>,
    root_token: CancellationToken,
    mirror_token: CancellationToken,
    hub_task: JoinHandle<()>,
    mirror_task: JoinHandle<()>,
    retention_task: JoinHandle<()>,
}

impl Services {
    /// Spawn the mirror, the hub and the retention sweep.
    ///
    /// The hub and the sweep stop when `root_token` is cancelled. The mirror
    /// has its own token so it can outlive the hub long enough to apply the
    /// departures the hub queues while closing.
    #[must_use]
    pub fn start(
        config: Config,
        stores: Stores,
        validator: Arc<dyn TokenValidator>,
        root_token: CancellationToken,
    ) -> Self {
        let mirror_token = CancellationToken::new();
        let (mirror, mirror_task) = MirrorHandle::spawn(
            Arc::clone(&stores.participants),
            MirrorSettings::from_config(&config),
            mirror_token.clone(),
        );

        let (hub, hub_task) = HubHandle::spawn(
            HubSettings::from_config(&config),
            mirror,
            root_token.child_token(),
        );

        let retention_task = tokio::spawn(start_retention_sweep(
            Arc::clone(&stores.participants),
            RetentionConfig::from_config(&config),
            root_token.child_token(),
        ));

        let state = Arc::new(AppState {
            config,
            hub,
            meetings: stores.meetings,
            participants: stores.participants,
            validator,
        });

        Self {
            state,
            root_token,
            mirror_token,
            hub_task,
            mirror_task,
            retention_task,
        }
    }

    /// Stop everything, waiting at most `deadline` for each stage.
    pub async fn shutdown(self, deadline: Duration) {
        info!(target: "sc.services", "Shutting down coordinator services");

        match tokio::time::timeout(deadline, self.state.hub.shutdown()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(target: "sc.services", error = %e, "Hub already stopped"),
            Err(_) => {
                warn!(target: "sc.services", "Hub shutdown timed out, cancelling");
                self.state.hub.cancel();
            }
        }
        if tokio::time::timeout(deadline, self.hub_task).await.is_err() {
            warn!(target: "sc.services", "Hub task did not stop in time");
        }

        self.mirror_token.cancel();
        if tokio::time::timeout(deadline, self.mirror_task).await.is_err() {
            warn!(target: "sc.services", "Storage mirror did not drain in time");
        }

        self.root_token.cancel();
        let _ = tokio::time::timeout(deadline, self.retention_task).await;

        info!(target: "sc.services", "Coordinator services stopped");
    }
}
