//! HTTP routes and shared server state.
//!
//! Each WebSocket upgrade hands the connection to its session handler
//! ([`crate::chat`], [`crate::status`]); everything else here is plain HTTP.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use confab_core::{PresenceTracker, RoomBroker, SessionRegistry};
use confab_store::{DirectoryService, MemoryDirectory, MemoryMessageStore, MessageStore};
use serde::Deserialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use crate::config::Config;
use crate::metrics;

/// Shared server state.
pub struct AppState {
    /// Live sessions and their group memberships.
    pub registry: SessionRegistry,
    /// Group fan-out table.
    pub broker: Arc<RoomBroker>,
    /// Derived online/offline tracking.
    pub presence: PresenceTracker,
    /// Durable chat log.
    pub store: Arc<dyn MessageStore>,
    /// User identity lookup.
    pub directory: Arc<dyn DirectoryService>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create state backed by the in-memory collaborators.
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self::with_collaborators(
            config,
            Arc::new(MemoryMessageStore::new()),
            Arc::new(MemoryDirectory::new()),
        )
    }

    /// Create state with explicit store and directory backends.
    #[must_use]
    pub fn with_collaborators(
        config: Config,
        store: Arc<dyn MessageStore>,
        directory: Arc<dyn DirectoryService>,
    ) -> Self {
        let broker = Arc::new(RoomBroker::with_capacity(config.limits.group_capacity));
        Self {
            registry: SessionRegistry::new(Arc::clone(&broker)),
            broker,
            presence: PresenceTracker::new(),
            store,
            directory,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(config: Config) -> Result<()> {
    let state = Arc::new(AppState::new(config.clone()));

    // Start metrics server if enabled
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            error!("Failed to start metrics server: {}", e);
        }
    }

    // Build router
    let app = Router::new()
        .route(
            &format!("{}/:peer_id", config.transport.chat_path),
            get(crate::chat::ws_handler),
        )
        .route(&config.transport.status_path, get(crate::status::ws_handler))
        .route("/users", post(create_user_handler))
        .route("/health", get(health_handler))
        .with_state(state);

    // Bind and serve
    let addr = config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("Confab server listening on {}", addr);
    info!(
        "Chat endpoint: ws://{}{}/<peer_id>",
        addr, config.transport.chat_path
    );
    info!(
        "Status endpoint: ws://{}{}",
        addr, config.transport.status_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// New account payload.
#[derive(Debug, Deserialize)]
pub struct CreateUser {
    pub id: String,
    pub username: String,
}

/// Account-creation hook: creates the profile explicitly and admits the
/// user to presence tracking. The status channel's `user_created` event
/// handles the broadcast.
async fn create_user_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateUser>,
) -> impl IntoResponse {
    match state.directory.create_profile(&body.id, &body.username).await {
        Ok(()) => {
            state.presence.register_user(&body.id, &body.username);
            StatusCode::CREATED
        }
        Err(e) => {
            error!(user = %body.id, error = %e, "Profile creation failed");
            metrics::record_error("directory");
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
