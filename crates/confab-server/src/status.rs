//! Global user-status session handler.
//!
//! One [`StatusSession`] per WebSocket connection on the presence channel,
//! driven through `Connecting -> Open -> Closed`. Every session joins the
//! single global group; unauthenticated connections are admitted read-only
//! and never marked online.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use chrono::Utc;
use confab_core::{RegistryError, SessionId, STATUS_GROUP};
use confab_protocol::{
    ClientEvent, ServerEvent, UserId, UserList, UserStatus, UserStatusUpdate,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::chat::AuthQuery;
use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};

/// Status connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StatusState {
    Connecting,
    Open,
    Closed,
}

/// WebSocket upgrade handler for the global presence channel.
pub async fn ws_handler(
    Query(auth): Query<AuthQuery>,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    // Resolve the caller if they identified themselves; unknown or absent
    // callers still get the read-only list.
    let mut user = None;
    let mut display_name = None;
    if let Some(candidate) = auth.user {
        match state.directory.display_name(&candidate).await {
            Ok(name) => {
                display_name = Some(name);
                user = Some(candidate);
            }
            Err(e) => {
                debug!(user = %candidate, error = %e, "Status caller not in directory");
            }
        }
    }

    let session = StatusSession::new(state, user, display_name);
    ws.on_upgrade(move |socket| session.run(socket))
}

/// Per-connection state machine for the presence channel.
pub(crate) struct StatusSession {
    app: Arc<AppState>,
    state: StatusState,
    session_id: SessionId,
    user: Option<UserId>,
    display_name: Option<String>,
}

impl StatusSession {
    /// Create a session in `Connecting`.
    pub(crate) fn new(
        app: Arc<AppState>,
        user: Option<UserId>,
        display_name: Option<String>,
    ) -> Self {
        Self {
            app,
            state: StatusState::Connecting,
            session_id: SessionId::from_raw(0),
            user,
            display_name,
        }
    }

    /// `Connecting -> Open`: register, join the global group, mark the
    /// caller online.
    pub(crate) fn open(
        &mut self,
    ) -> Result<broadcast::Receiver<Arc<ServerEvent>>, RegistryError> {
        self.session_id = self.app.registry.register(self.user.clone());
        let rx = self.app.registry.join_group(self.session_id, STATUS_GROUP)?;

        if let (Some(user), Some(name)) = (&self.user, &self.display_name) {
            self.app.presence.mark_online(user.clone(), name.clone());
            metrics::set_users_online(self.app.presence.online_count());
        }

        self.state = StatusState::Open;
        debug!(session = %self.session_id, user = ?self.user, "Status session open");
        Ok(rx)
    }

    /// Broadcast the full current user list to the global group.
    pub(crate) fn announce(&self) {
        let recipients = self
            .app
            .broker
            .publish(STATUS_GROUP, ServerEvent::UserList(self.user_list()));
        metrics::record_fanout(recipients);
    }

    /// Handle one inbound event while `Open`.
    ///
    /// Returns an event to send back to this socket only, or `None`.
    pub(crate) async fn handle_event(&self, event: ClientEvent) -> Option<ServerEvent> {
        if self.state == StatusState::Closed {
            return None;
        }
        match event {
            // Fresh account: broadcast the single-user delta instead of
            // recomputing the full list. The next connect/disconnect
            // broadcast converges everyone anyway.
            ClientEvent::UserCreated { user } => {
                match self.app.directory.display_name(&user).await {
                    Ok(name) => {
                        self.app.presence.register_user(&user, &name);
                        self.app.broker.publish(
                            STATUS_GROUP,
                            ServerEvent::StatusUpdate(UserStatusUpdate::new(vec![UserStatus {
                                id: user,
                                username: name,
                                online: true,
                            }])),
                        );
                    }
                    Err(e) => {
                        debug!(user = %user, error = %e, "user_created for unknown user");
                    }
                }
                None
            }
            // Anything else is a refresh request: current list, this
            // socket only
            _ => Some(ServerEvent::UserList(self.user_list())),
        }
    }

    /// `Open -> Closed`: leave, deregister, stamp last-online, broadcast
    /// the updated list.
    pub(crate) fn close(&mut self) {
        if let Err(RegistryError::NotFound(id)) =
            self.app.registry.leave_group(self.session_id, STATUS_GROUP)
        {
            debug!(session = %id, "Leave after session already gone");
        }
        if let Err(RegistryError::NotFound(id)) = self.app.registry.deregister(self.session_id) {
            debug!(session = %id, "Deregister after session already gone");
        }

        if let Some(user) = &self.user {
            self.app.presence.mark_offline(user, Utc::now());
            metrics::set_users_online(self.app.presence.online_count());
        }

        self.announce();
        self.state = StatusState::Closed;
        debug!(session = %self.session_id, user = ?self.user, "Status session closed");
    }

    fn user_list(&self) -> UserList {
        UserList {
            user_list: self.app.presence.snapshot(Utc::now()),
        }
    }

    /// Drive the connection until the transport closes.
    pub(crate) async fn run(mut self, socket: WebSocket) {
        let _guard = ConnectionMetricsGuard::new();

        let mut rx = match self.open() {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "Status session failed to open");
                return;
            }
        };

        // Everyone on the channel, this session included, sees the list
        // with the caller online
        self.announce();

        let (mut sender, mut receiver) = socket.split();
        let max_bytes = self.app.config.limits.max_message_bytes;

        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Ok(ev) => {
                        let Ok(text) = ev.to_json() else { continue };
                        metrics::record_message("outbound");
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(session = %self.session_id, skipped, "Slow consumer, closing");
                        metrics::record_error("lagged");
                        break;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                msg = receiver.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        if text.len() > max_bytes {
                            warn!(session = %self.session_id, bytes = text.len(), "Oversized payload discarded");
                            continue;
                        }
                        metrics::record_message("inbound");
                        match ClientEvent::parse(&text) {
                            Ok(event) => {
                                if let Some(reply) = self.handle_event(event).await {
                                    let Ok(text) = reply.to_json() else { continue };
                                    if sender.send(Message::Text(text)).await.is_err() {
                                        break;
                                    }
                                }
                            }
                            Err(e) => {
                                debug!(session = %self.session_id, error = %e, "Discarding malformed event");
                                metrics::record_error("malformed");
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {}
                    Some(Ok(Message::Close(_))) => {
                        debug!(session = %self.session_id, "Received close frame");
                        break;
                    }
                    Some(Ok(Message::Binary(_))) => {
                        debug!(session = %self.session_id, "Ignoring binary frame");
                    }
                    Some(Err(e)) => {
                        warn!(session = %self.session_id, error = %e, "WebSocket error");
                        metrics::record_error("websocket");
                        break;
                    }
                    None => break,
                }
            }
        }

        self.close();
    }
}
