//! Test server harness for E2E testing
//!
//! Provides `TestScServer` for spawning a real coordinator in tests: the
//! same [`Services`] assembly and router as the binary, bound to a random
//! local port.

use crate::token_builders::TEST_TOKEN_SECRET;
use metrics_exporter_prometheus::PrometheusBuilder;
use session_coordinator::auth::JwtTokenValidator;
use session_coordinator::config::Config;
use session_coordinator::models::Meeting;
use session_coordinator::observability::HealthState;
use session_coordinator::routes::{build_routes, AppState};
use session_coordinator::services::{Services, Stores};
use session_coordinator::storage::{MeetingStore, MemoryStore, ParticipantStore};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Builder for [`TestScServer`].
pub struct TestScServerBuilder {
    vars: HashMap<String, String>,
    meetings: Vec<Meeting>,
    stores: Option<Stores>,
}

impl TestScServerBuilder {
    /// Seed a meeting into the default in-memory store.
    pub fn with_meeting(mut self, meeting: Meeting) -> Self {
        self.meetings.push(meeting);
        self
    }

    /// Set a configuration variable, e.g. `SC_OUTBOUND_QUEUE_CAPACITY`.
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_string(), value.to_string());
        self
    }

    /// Use a caller-provided store instead of a fresh `MemoryStore`.
    /// Meetings added with [`with_meeting`](Self::with_meeting) are ignored;
    /// seed the store directly.
    pub fn with_store<S>(mut self, store: Arc<S>) -> Self
    where
        S: MeetingStore + ParticipantStore + 'static,
    {
        self.stores = Some(Stores::shared(store));
        self
    }

    pub async fn spawn(self) -> Result<TestScServer, anyhow::Error> {
        let config = Config::from_vars(&self.vars)
            .map_err(|e| anyhow::anyhow!("Failed to create config: {}", e))?;

        let stores = match self.stores {
            Some(stores) => stores,
            None => {
                let store = Arc::new(MemoryStore::new());
                for meeting in self.meetings {
                    store.insert_meeting(meeting).await;
                }
                Stores::shared(store)
            }
        };

        let validator = Arc::new(JwtTokenValidator::new(&config.auth_token_secret));
        let root_token = CancellationToken::new();
        let services = Services::start(config, stores, validator, root_token.clone());

        // A recorder handle without installing the global recorder, so
        // several servers can run in one test binary.
        let metrics_handle = PrometheusBuilder::new().build_recorder().handle();
        let health_state = Arc::new(HealthState::new());
        health_state.set_ready();

        let app = build_routes(Arc::clone(&services.state), health_state, metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let server_token = root_token.child_token();
        let handle = tokio::spawn(async move {
            let server = axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { server_token.cancelled().await });
            if let Err(e) = server.await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(TestScServer {
            addr,
            state: Arc::clone(&services.state),
            services: Some(services),
            root_token,
            _handle: handle,
        })
    }
}

/// Test harness for spawning the session coordinator in E2E tests.
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_join_flow() -> anyhow::Result<()> {
///     let server = TestScServer::builder()
///         .with_meeting(TestMeeting::new("m1").build())
///         .spawn()
///         .await?;
///
///     let token = TestTokenBuilder::new().for_user("alice").sign();
///     let (socket, _) = tokio_tungstenite::connect_async(server.ws_url("m1", "peer-a", &token)).await?;
///     Ok(())
/// }
/// ```
pub struct TestScServer {
    addr: SocketAddr,
    state: Arc<AppState>,
    services: Option<Services>,
    root_token: CancellationToken,
    _handle: JoinHandle<()>,
}

impl TestScServer {
    /// Builder with the test signing secret, a random port and a generous
    /// rate limit configured.
    pub fn builder() -> TestScServerBuilder {
        let vars = HashMap::from([
            (
                "SC_AUTH_TOKEN_SECRET".to_string(),
                TEST_TOKEN_SECRET.to_string(),
            ),
            ("SC_BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            // Every test client shares one address; polling helpers would trip the default.
            ("SC_RATE_LIMIT_PER_MINUTE".to_string(), "100000".to_string()),
        ]);
        TestScServerBuilder {
            vars,
            meetings: Vec::new(),
            stores: None,
        }
    }

    /// Get the base URL of the test server.
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// WebSocket join URL with the token in the query string.
    pub fn ws_url(&self, meeting_id: &str, peer_id: &str, token: &str) -> String {
        format!(
            "ws://{}/api/ws/{}?peerId={}&token={}",
            self.addr, meeting_id, peer_id, token
        )
    }

    /// Get the socket address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Shared state, for inspecting the hub or stores directly.
    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    /// Graceful shutdown: closes every connection and drains the mirror.
    pub async fn shutdown(mut self) {
        if let Some(services) = self.services.take() {
            services.shutdown(Duration::from_secs(5)).await;
        }
        self.root_token.cancel();
    }
}

impl Drop for TestScServer {
    fn drop(&mut self) {
        self.root_token.cancel();
        self._handle.abort();
    }
}
