//! Session admission and per-connection lifecycle.
//!
//! A connection that passed the handshake starts in
//! [`SessionState::Authenticating`]. The [`SessionArbiter`] then decides,
//! against the registry, whether it becomes the live session for its user:
//!
//! ```text
//! Authenticating --admitted--> Registered --disconnected--> Closed
//!       |
//!       +--------rejected (invalid id / already connected)--> Closed
//! ```
//!
//! A handshake that fails authentication never gets this far: the upgrade is
//! refused and no session exists.

use std::sync::Arc;

use tokio::sync::mpsc;

use crate::error::{RelayError, SessionConflict, ValidationError};
use crate::protocol::ServerEvent;
use crate::registry::{ConnectionHandle, ConnectionRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Authenticating,
    Registered,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Admitted,
    Rejected,
    Disconnected,
}

impl SessionState {
    pub fn next(self, transition: Transition) -> SessionState {
        match (self, transition) {
            (SessionState::Authenticating, Transition::Admitted) => SessionState::Registered,
            (SessionState::Authenticating, Transition::Rejected) => SessionState::Closed,
            (_, Transition::Disconnected) => SessionState::Closed,
            (state, _) => state,
        }
    }
}

/// Check a token subject for use as a registry key.
///
/// The key is the subject exactly as issued; trimming only decides whether
/// it is blank.
pub fn validate_user_id(subject: Option<&str>) -> Result<&str, ValidationError> {
    match subject {
        Some(id) if !id.trim().is_empty() => Ok(id),
        _ => Err(ValidationError::InvalidUserId),
    }
}

/// Resolves duplicate-session conflicts for newly authenticated connections.
#[derive(Clone)]
pub struct SessionArbiter {
    registry: Arc<ConnectionRegistry>,
}

impl SessionArbiter {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Admit a connection for `subject`, or explain why not.
    ///
    /// With `overwrite`, an existing session for the same user is replaced
    /// and force-closed. Without it, the new connection is refused and the
    /// existing one is left alone.
    pub fn admit(
        &self,
        subject: Option<&str>,
        overwrite: bool,
        tx: mpsc::Sender<ServerEvent>,
    ) -> Result<ConnectionHandle, RelayError> {
        let user_id = match validate_user_id(subject) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(subject = ?subject, "Invalid userId provided");
                return Err(e.into());
            }
        };

        let conn = ConnectionHandle::new(user_id, tx);
        match self.registry.claim(conn.clone(), overwrite) {
            Ok(Some(prior)) => {
                prior.force_close();
                tracing::info!(
                    %user_id,
                    old_conn = prior.id(),
                    old_connected_at = %prior.connected_at(),
                    new_conn = conn.id(),
                    "Terminating existing session and replacing with new session"
                );
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(%user_id, "Connection rejected: user is already connected");
                return Err(e.into());
            }
        }

        tracing::info!(
            %user_id,
            conn = conn.id(),
            active = self.registry.len(),
            "User connected"
        );
        Ok(conn)
    }

    /// Drop `conn` from the registry if it is still the live session.
    pub fn release(&self, conn: &ConnectionHandle, reason: &str) -> bool {
        let removed = self.registry.unregister(conn.user_id(), conn);
        if removed {
            tracing::info!(
                user_id = conn.user_id(),
                conn = conn.id(),
                %reason,
                active = self.registry.len(),
                "User disconnected"
            );
        } else {
            tracing::debug!(
                user_id = conn.user_id(),
                conn = conn.id(),
                %reason,
                "Superseded connection closed"
            );
        }
        removed
    }
}

/// Lifecycle of one WebSocket connection.
#[derive(Debug)]
pub struct Session {
    state: SessionState,
    conn: Option<ConnectionHandle>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self {
            state: SessionState::Authenticating,
            conn: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn connection(&self) -> Option<&ConnectionHandle> {
        self.conn.as_ref()
    }

    pub fn admit(
        &mut self,
        arbiter: &SessionArbiter,
        subject: Option<&str>,
        overwrite: bool,
        tx: mpsc::Sender<ServerEvent>,
    ) -> Result<ConnectionHandle, RelayError> {
        if self.state != SessionState::Authenticating {
            return Err(SessionConflict::AlreadyAdmitted.into());
        }
        match arbiter.admit(subject, overwrite, tx) {
            Ok(conn) => {
                self.state = self.state.next(Transition::Admitted);
                self.conn = Some(conn.clone());
                Ok(conn)
            }
            Err(e) => {
                self.state = self.state.next(Transition::Rejected);
                Err(e)
            }
        }
    }

    /// Close the session. Returns whether the registry entry was removed.
    pub fn disconnect(&mut self, arbiter: &SessionArbiter, reason: &str) -> bool {
        let removed = match self.conn.take() {
            Some(conn) => arbiter.release(&conn, reason),
            None => false,
        };
        self.state = self.state.next(Transition::Disconnected);
        removed
    }
}
