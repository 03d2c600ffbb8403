//! Per-connection session state machine and command interpreter.
//!
//! A session owns nothing shared: its peer is reachable only through the
//! bounded outbound channel, and the registry holds a clone of that same
//! sender while the session is logged in. Replies and broadcasts therefore
//! flow through one FIFO queue per connection, which is what guarantees the
//! per-session delivery order.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error};
use uuid::Uuid;

use messenger_protocol::{chat_shape, parse, reply, Command};

use crate::registry::{Registry, SessionId};
use crate::store::{AuthOutcome, ChatStore, RegisterOutcome};

/// What the transport loop should do after a line has been handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionControl {
    Continue,
    /// Logout acknowledged; flush the queue, wait the grace period, close
    /// with a normal-closure status.
    Close,
}

pub struct Session {
    id: SessionId,
    outbound: mpsc::Sender<String>,
    registry: Arc<Registry>,
    store: ChatStore,
    authenticated: Option<String>,
}

impl Session {
    pub fn new(registry: Arc<Registry>, store: ChatStore, outbound: mpsc::Sender<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            outbound,
            registry,
            store,
            authenticated: None,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn authenticated_user(&self) -> Option<&str> {
        self.authenticated.as_deref()
    }

    /// Interpret one inbound line and enqueue whatever it produces.
    pub async fn handle_line(&mut self, line: &str) -> SessionControl {
        let command = match parse(line) {
            Ok(command) => command,
            Err(malformed) => {
                self.reply(malformed.reply()).await;
                return SessionControl::Continue;
            }
        };

        match command {
            Command::Register { login, password } => {
                self.register(login, password).await;
                SessionControl::Continue
            }
            Command::Login { login, password } => {
                self.login(login, password).await;
                SessionControl::Continue
            }
            Command::Logout { login } => self.logout(login).await,
            Command::Chat(text) => {
                self.chat(text).await;
                SessionControl::Continue
            }
        }
    }

    /// Terminal cleanup: idempotent registry removal. Called by the transport
    /// loop on every exit path, including read errors and peer close.
    pub fn disconnect(&mut self) {
        self.registry.leave(&self.id);
        self.authenticated = None;
    }

    async fn register(&mut self, login: &str, password: &str) {
        // Auth state never changes here, whatever the outcome.
        match self.store.register(login, password).await {
            Ok(RegisterOutcome::Created) => self.reply(reply::REGISTRATION_OK).await,
            Ok(RegisterOutcome::Conflict) => self.reply(reply::REGISTRATION_CONFLICT).await,
            Err(e) => error!(session_id = %self.id, login, error = %e, "registration failed"),
        }
    }

    async fn login(&mut self, login: &str, password: &str) {
        match self.store.authenticate(login, password).await {
            Ok(AuthOutcome::Accepted) => {
                self.authenticated = Some(login.to_string());
                self.registry.join(self.id, login, self.outbound.clone());
                self.reply(reply::LOGIN_OK).await;
                // The new member receives its own join notice.
                self.registry.broadcast(&reply::joined(login));
            }
            Ok(AuthOutcome::Rejected) | Ok(AuthOutcome::NotFound) => {
                self.reply(reply::LOGIN_FAILED).await;
            }
            Err(e) => {
                error!(session_id = %self.id, login, error = %e, "authentication failed");
                self.reply(reply::LOGIN_FAILED).await;
            }
        }
    }

    async fn logout(&mut self, login: &str) -> SessionControl {
        match self.authenticated.as_deref() {
            Some(current) if current == login => {
                // Broadcast while still a member so the leaver sees it too.
                self.registry.broadcast(&reply::left(login));
                self.registry.leave(&self.id);
                self.authenticated = None;
                self.reply(reply::LOGOUT_OK).await;
                SessionControl::Close
            }
            _ => {
                self.reply(reply::LOGOUT_INVALID_USER).await;
                SessionControl::Continue
            }
        }
    }

    async fn chat(&mut self, text: &str) {
        if self.authenticated.is_none() {
            self.reply(reply::LOGIN_REQUIRED).await;
            return;
        }

        if let Some((user, content)) = chat_shape(text) {
            if let Err(e) = self.store.save_message(user, content).await {
                error!(session_id = %self.id, error = %e, "failed to persist message");
            }
        }
        // The raw line is broadcast whether or not it was persisted.
        self.registry.broadcast(text);
    }

    async fn reply(&self, text: &str) {
        if self.outbound.send(text.to_string()).await.is_err() {
            debug!(session_id = %self.id, "outbound queue closed, dropping reply");
        }
    }
}
