//! Per-connection protocol state machine.
//!
//! A session starts in the open state and must authenticate before any
//! activity batch is accepted. Every inbound frame produces exactly one
//! reply; protocol-level failures become reply messages, never closed
//! connections. The transport layer owns the socket and feeds decoded
//! frames in; the session never touches I/O.

use std::sync::Arc;

use actigraph_auth::{AuthError, TokenCodec};
use actigraph_store::{ActivityStore, Insert};
use actigraph_types::UserId;
use actigraph_wire::{ClientMessage, Frame, ServerMessage};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::registry::{ConnectionHandle, ConnectionId, Registry};

/// Authentication state of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionState {
    /// Connected, handshake not yet completed.
    Open,
    /// Handshake completed; batches are accepted for this user.
    Authenticated(UserId),
}

/// One client connection's protocol state.
pub struct Session {
    id: ConnectionId,
    state: SessionState,
    registry: Arc<Registry>,
    tokens: Arc<TokenCodec>,
    store: Arc<dyn ActivityStore>,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl Session {
    /// Creates a session in the open state.
    ///
    /// `sender` is the connection's outbound queue; it is handed to the
    /// registry on successful authentication so the server can push
    /// messages to this user later.
    pub fn new(
        registry: Arc<Registry>,
        tokens: Arc<TokenCodec>,
        store: Arc<dyn ActivityStore>,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Self {
        Self {
            id: ConnectionId::next(),
            state: SessionState::Open,
            registry,
            tokens,
            store,
            sender,
        }
    }

    /// Returns this session's connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the authenticated user, if the handshake has completed.
    pub fn user(&self) -> Option<&UserId> {
        match &self.state {
            SessionState::Authenticated(user) => Some(user),
            SessionState::Open => None,
        }
    }

    /// Handles one inbound frame and returns the reply to send.
    pub fn on_frame(&mut self, frame: &Frame) -> ServerMessage {
        let message = match ClientMessage::from_frame(frame) {
            Ok(message) => message,
            Err(e) => {
                debug!(connection = self.id.as_u64(), error = %e, "malformed frame");
                return ServerMessage::Error {
                    message: "invalid message format".to_string(),
                };
            }
        };

        match message {
            ClientMessage::Auth { token } => self.handle_auth(&token),
            ClientMessage::ActivityBatch { events, batch_id } => match &self.state {
                SessionState::Authenticated(user) => {
                    let user = user.clone();
                    let mut stored = 0usize;
                    let mut duplicates = 0usize;
                    for event in &events {
                        match self.store.insert(&user, event) {
                            Ok(Insert::Stored) => stored += 1,
                            Ok(Insert::Duplicate) => duplicates += 1,
                            Err(e) => {
                                warn!(
                                    user = %user,
                                    event_id = %event.event_id(),
                                    error = %e,
                                    "failed to store event"
                                );
                            }
                        }
                    }
                    debug!(
                        user = %user,
                        batch_id = %batch_id,
                        stored,
                        duplicates,
                        "ingested batch"
                    );
                    ServerMessage::BatchAck { batch_id }
                }
                SessionState::Open => ServerMessage::Error {
                    message: "Not authenticated".to_string(),
                },
            },
        }
    }

    fn handle_auth(&mut self, token: &str) -> ServerMessage {
        let claims = match self.tokens.verify(token) {
            Ok(claims) => claims,
            Err(e) => {
                let reason = match e {
                    AuthError::Expired => "token expired".to_string(),
                    AuthError::Invalid(_) => "invalid token".to_string(),
                };
                debug!(connection = self.id.as_u64(), %reason, "auth rejected");
                return ServerMessage::AuthFail { reason };
            }
        };

        let user = claims.user_id();

        // Re-authentication under a different identity releases the old
        // registration first, guarded so a replacement connection for
        // the old user is left alone.
        if let SessionState::Authenticated(previous) = &self.state {
            if *previous != user {
                self.registry.unregister(previous, self.id);
            }
        }

        self.registry.register(
            user.clone(),
            ConnectionHandle {
                id: self.id,
                sender: self.sender.clone(),
            },
        );
        debug!(connection = self.id.as_u64(), user = %user, "authenticated");
        self.state = SessionState::Authenticated(user);
        ServerMessage::AuthOk
    }

    /// Releases this session's registration. Called when the transport
    /// closes; safe if the session never authenticated.
    pub fn on_close(&mut self) {
        if let SessionState::Authenticated(user) = &self.state {
            self.registry.unregister(user, self.id);
        }
        self.state = SessionState::Open;
    }
}
