//! Private chat session handler.
//!
//! One [`ChatSession`] per WebSocket connection, driven through the state
//! machine `Connecting -> Open -> Closing -> Closed`. Identity and peer
//! validation happen before the upgrade completes, so a rejected
//! connection never joins a group.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use chrono::Utc;
use confab_core::{room_name, timefmt, GroupName, RegistryError, SessionId};
use confab_protocol::{ChatBroadcast, ClientEvent, ErrorEvent, ReadReceipt, ServerEvent, UserId};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::handlers::AppState;
use crate::metrics::{self, ConnectionMetricsGuard};

/// Caller-supplied identity; authentication itself is the external
/// collaborator's job.
#[derive(Debug, Deserialize)]
pub struct AuthQuery {
    pub user: Option<UserId>,
}

/// Chat connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChatState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// WebSocket upgrade handler for `/ws/private_chat/:peer_id`.
///
/// Rejects unauthenticated callers and unknown peers with an HTTP status
/// before the upgrade, per the no-partial-join rule.
pub async fn ws_handler(
    Path(peer_id): Path<UserId>,
    Query(auth): Query<AuthQuery>,
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
) -> Response {
    let Some(user) = auth.user else {
        metrics::record_error("rejected_connection");
        return StatusCode::FORBIDDEN.into_response();
    };

    match state.directory.exists(&user).await {
        Ok(true) => {}
        Ok(false) => {
            metrics::record_error("rejected_connection");
            return StatusCode::FORBIDDEN.into_response();
        }
        Err(e) => {
            warn!(user = %user, error = %e, "Directory lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    match state.directory.exists(&peer_id).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(user = %user, peer = %peer_id, "Rejected chat with unknown peer");
            metrics::record_error("rejected_connection");
            return StatusCode::NOT_FOUND.into_response();
        }
        Err(e) => {
            warn!(peer = %peer_id, error = %e, "Directory lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let display_name = match state.directory.display_name(&user).await {
        Ok(name) => name,
        Err(e) => {
            warn!(user = %user, error = %e, "Display name lookup failed");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let session = ChatSession::new(state, user, display_name, peer_id);
    ws.on_upgrade(move |socket| session.run(socket))
}

/// Per-connection state machine for one private chat.
pub(crate) struct ChatSession {
    app: Arc<AppState>,
    state: ChatState,
    session_id: SessionId,
    user: UserId,
    display_name: String,
    peer: UserId,
    room: GroupName,
}

impl ChatSession {
    /// Create a session in `Connecting`; identity is already validated.
    pub(crate) fn new(
        app: Arc<AppState>,
        user: UserId,
        display_name: String,
        peer: UserId,
    ) -> Self {
        let room = room_name(&user, &peer);
        Self {
            app,
            state: ChatState::Connecting,
            session_id: SessionId::from_raw(0),
            user,
            display_name,
            peer,
            room,
        }
    }

    /// `Connecting -> Open`: register, join the room, return its event
    /// stream.
    pub(crate) fn open(
        &mut self,
    ) -> Result<broadcast::Receiver<Arc<ServerEvent>>, RegistryError> {
        self.session_id = self.app.registry.register(Some(self.user.clone()));
        let rx = self.app.registry.join_group(self.session_id, &self.room)?;
        self.state = ChatState::Open;
        metrics::set_active_groups(self.app.broker.group_count());
        debug!(session = %self.session_id, room = %self.room, "Chat session open");
        Ok(rx)
    }

    /// Handle one inbound event while `Open`.
    ///
    /// Returns an event to send back to this socket only (never broadcast),
    /// or `None`.
    pub(crate) async fn handle_event(&self, event: ClientEvent) -> Option<ServerEvent> {
        if self.state == ChatState::Closing || self.state == ChatState::Closed {
            return None;
        }
        match event {
            ClientEvent::Chat { text } => self.handle_chat(&text).await,
            ClientEvent::MessageRead { message_id } => self.handle_read(message_id).await,
            ClientEvent::UserCreated { .. } => {
                // Status-channel event; nothing to do on a chat socket
                debug!(session = %self.session_id, "Ignoring user_created on chat channel");
                None
            }
        }
    }

    /// Persist then fan out a chat message.
    async fn handle_chat(&self, text: &str) -> Option<ServerEvent> {
        let content = text.trim();
        if content.is_empty() {
            // Whitespace-only payloads are discarded without persist or
            // broadcast; the connection stays open.
            return None;
        }

        let now = Utc::now();
        match self
            .app
            .store
            .append(&self.user, &self.peer, content, now)
            .await
        {
            Ok(message_id) => {
                let recipients = self.app.broker.publish(
                    &self.room,
                    ServerEvent::Chat(ChatBroadcast {
                        message: content.to_string(),
                        username: self.display_name.clone(),
                        message_id,
                        sent_time: timefmt::sent_time(now, now),
                    }),
                );
                metrics::record_fanout(recipients);
                debug!(
                    session = %self.session_id,
                    room = %self.room,
                    message = message_id,
                    recipients,
                    "Chat message published"
                );
                None
            }
            Err(e) => {
                warn!(session = %self.session_id, error = %e, "Persist failed");
                metrics::record_error("persist");
                Some(ServerEvent::Error(ErrorEvent::persist_failed()))
            }
        }
    }

    /// Mark a message read and notify the room once.
    async fn handle_read(&self, message_id: u64) -> Option<ServerEvent> {
        match self.app.store.mark_read(message_id).await {
            Ok(true) => {
                self.app
                    .broker
                    .publish(&self.room, ServerEvent::Read(ReadReceipt::new(message_id)));
                None
            }
            // Already read: idempotent, no duplicate receipt
            Ok(false) => None,
            Err(e) => {
                debug!(session = %self.session_id, message = message_id, error = %e, "Read ack ignored");
                None
            }
        }
    }

    /// `Open -> Closing -> Closed`: leave the room, destroy the session.
    pub(crate) fn close(&mut self) {
        self.state = ChatState::Closing;

        if let Err(RegistryError::NotFound(id)) =
            self.app.registry.leave_group(self.session_id, &self.room)
        {
            debug!(session = %id, "Leave after session already gone");
        }
        if let Err(RegistryError::NotFound(id)) = self.app.registry.deregister(self.session_id) {
            debug!(session = %id, "Deregister after session already gone");
        }

        metrics::set_active_groups(self.app.broker.group_count());
        self.state = ChatState::Closed;
        debug!(session = %self.session_id, room = %self.room, "Chat session closed");
    }

    /// Drive the connection until the transport closes.
    pub(crate) async fn run(mut self, socket: WebSocket) {
        let _guard = ConnectionMetricsGuard::new();

        let mut rx = match self.open() {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "Chat session failed to open");
                return;
            }
        };

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
                        // This consumer fell too far behind; close its own
                        // path instead of stalling the publishers.
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

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::DateTime;
    use confab_store::{
        ChatMessage, MemoryDirectory, MemoryMessageStore, MessageStore, StoreError,
    };
    use tokio::sync::broadcast::error::TryRecvError;

    use crate::config::Config;

    fn app_with(
        store: Arc<dyn MessageStore>,
        directory: Arc<MemoryDirectory>,
    ) -> Arc<AppState> {
        directory.insert("alice", "Alice", None);
        directory.insert("bob", "Bob", None);
        Arc::new(AppState::with_collaborators(
            Config::default(),
            store,
            directory,
        ))
    }

    fn app() -> Arc<AppState> {
        app_with(
            Arc::new(MemoryMessageStore::new()),
            Arc::new(MemoryDirectory::new()),
        )
    }

    fn open_session(app: &Arc<AppState>, user: &str, name: &str, peer: &str) -> (ChatSession, broadcast::Receiver<Arc<ServerEvent>>) {
        let mut session = ChatSession::new(
            Arc::clone(app),
            user.to_string(),
            name.to_string(),
            peer.to_string(),
        );
        let rx = session.open().unwrap();
        (session, rx)
    }

    #[tokio::test]
    async fn test_send_persists_and_broadcasts() {
        let app = app();
        let (alice, _rx_a) = open_session(&app, "alice", "Alice", "bob");
        let (_bob, mut rx_b) = open_session(&app, "bob", "Bob", "alice");

        assert_eq!(alice.state, ChatState::Open);

        let reply = alice.handle_event(ClientEvent::Chat { text: "hi".to_string() }).await;
        assert!(reply.is_none());

        let got = rx_b.recv().await.unwrap();
        match &*got {
            ServerEvent::Chat(chat) => {
                assert_eq!(chat.message, "hi");
                assert_eq!(chat.username, "Alice");
                assert_eq!(chat.sent_time, "just now");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let stored = app.store.list_between("alice", "bob").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "hi");
        assert!(!stored[0].is_read);
    }

    #[tokio::test]
    async fn test_whitespace_message_discarded() {
        let app = app();
        let (alice, _rx_a) = open_session(&app, "alice", "Alice", "bob");
        let (_bob, mut rx_b) = open_session(&app, "bob", "Bob", "alice");

        for text in ["", "   ", "\n\t  "] {
            let reply = alice.handle_event(ClientEvent::Chat { text: text.to_string() }).await;
            assert!(reply.is_none());
        }

        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));
        assert!(app.store.list_between("alice", "bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_ack_is_idempotent() {
        let app = app();
        let (alice, _rx_a) = open_session(&app, "alice", "Alice", "bob");
        let (_bob, mut rx_b) = open_session(&app, "bob", "Bob", "alice");

        let id = app
            .store
            .append("alice", "bob", "hi", Utc::now())
            .await
            .unwrap();

        alice.handle_event(ClientEvent::MessageRead { message_id: id }).await;
        let got = rx_b.recv().await.unwrap();
        assert_eq!(*got, ServerEvent::Read(ReadReceipt::new(id)));

        // Second ack: flag stays set, no duplicate receipt
        alice.handle_event(ClientEvent::MessageRead { message_id: id }).await;
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));

        // Unknown id: logged and ignored
        let reply = alice.handle_event(ClientEvent::MessageRead { message_id: 9999 }).await;
        assert!(reply.is_none());
    }

    #[tokio::test]
    async fn test_peer_gone_still_persists() {
        let app = app();
        let (mut alice, _rx_a) = open_session(&app, "alice", "Alice", "bob");
        let room = alice.room.clone();

        // The only room member disconnects
        alice.close();
        assert_eq!(alice.state, ChatState::Closed);
        assert!(app.registry.sessions_in(&room).is_empty());

        // Publishing to the now-empty room reaches nobody
        assert_eq!(
            app.broker.publish(&room, ServerEvent::Read(ReadReceipt::new(1))),
            0
        );

        // A sender with no connected peer still gets durable persistence
        let bob = ChatSession::new(
            Arc::clone(&app),
            "bob".to_string(),
            "Bob".to_string(),
            "alice".to_string(),
        );
        let reply = bob.handle_event(ClientEvent::Chat { text: "anyone home?".to_string() }).await;
        assert!(reply.is_none());

        let stored = app.store.list_between("alice", "bob").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "anyone home?");
    }

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn append(
            &self,
            _sender: &str,
            _receiver: &str,
            _content: &str,
            _timestamp: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            Err(StoreError::Unavailable("disk on fire".to_string()))
        }

        async fn mark_read(&self, id: u64) -> Result<bool, StoreError> {
            Err(StoreError::UnknownMessage(id))
        }

        async fn list_between(&self, _a: &str, _b: &str) -> Result<Vec<ChatMessage>, StoreError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_persist_failure_surfaces_to_sender_only() {
        let app = app_with(Arc::new(FailingStore), Arc::new(MemoryDirectory::new()));
        let (alice, _rx_a) = open_session(&app, "alice", "Alice", "bob");
        let (_bob, mut rx_b) = open_session(&app, "bob", "Bob", "alice");

        let reply = alice.handle_event(ClientEvent::Chat { text: "hi".to_string() }).await;
        assert_eq!(reply, Some(ServerEvent::Error(ErrorEvent::persist_failed())));

        // Persist failure aborts the fan-out
        assert!(matches!(rx_b.try_recv(), Err(TryRecvError::Empty)));
    }

    #[tokio::test]
    async fn test_room_is_shared_regardless_of_initiator() {
        let app = app();
        let (alice, _) = open_session(&app, "alice", "Alice", "bob");
        let (bob, _) = open_session(&app, "bob", "Bob", "alice");
        assert_eq!(alice.room, bob.room);
    }
}
