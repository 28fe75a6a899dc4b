//! Push request validation and delivery.

use std::sync::Arc;

use serde_json::Value;

use crate::error::{RelayError, ValidationError};
use crate::protocol::{PushNotification, ServerEvent};
use crate::registry::{ConnectionRegistry, Delivery};

/// Body keys a push request must carry. Presence is what counts; `null`
/// is a legitimate value.
pub const REQUIRED_FIELDS: [&str; 7] = [
    "message",
    "emp_no",
    "attempt_id",
    "client_id",
    "data",
    "service_name",
    "status",
];

/// A validated push request. Every field except `user_id` is opaque.
#[derive(Debug, Clone, PartialEq)]
pub struct PushRequest {
    pub message: Value,
    pub user_id: Value,
    pub attempt_id: Value,
    pub client_id: Value,
    pub data: Value,
    pub service_name: Value,
    pub status: Value,
}

impl PushRequest {
    /// Parse a raw HTTP body. An empty body is treated as `{}`.
    pub fn from_body(body: &[u8]) -> Result<Self, ValidationError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Self::from_value(Value::Object(Default::default()));
        }
        let value: Value =
            serde_json::from_slice(body).map_err(|_| ValidationError::MalformedBody)?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let Value::Object(mut map) = value else {
            return Err(ValidationError::MalformedBody);
        };
        let missing: Vec<&'static str> = REQUIRED_FIELDS
            .iter()
            .copied()
            .filter(|field| !map.contains_key(*field))
            .collect();
        if !missing.is_empty() {
            return Err(ValidationError::MissingField(missing));
        }

        let mut take = |key: &str| map.remove(key).unwrap_or(Value::Null);
        Ok(Self {
            message: take("message"),
            user_id: take("emp_no"),
            attempt_id: take("attempt_id"),
            client_id: take("client_id"),
            data: take("data"),
            service_name: take("service_name"),
            status: take("status"),
        })
    }

    /// Registry key for the recipient. Only a string can name a user.
    pub fn recipient(&self) -> Option<&str> {
        self.user_id.as_str()
    }

    /// The outbound payload. `status` is dropped here.
    pub fn into_notification(self) -> PushNotification {
        PushNotification {
            message: self.message,
            user_id: self.user_id,
            attempt_id: self.attempt_id,
            client_id: self.client_id,
            data: self.data,
            service_name: self.service_name,
        }
    }
}

/// Routes push requests to live connections.
///
/// Delivery is at-most-once: nothing is queued for absent users, and a
/// recipient whose outbound queue is full loses the event rather than
/// stalling the caller.
#[derive(Clone)]
pub struct PushDispatcher {
    registry: Arc<ConnectionRegistry>,
}

impl PushDispatcher {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// Validate a raw body, then deliver it.
    pub fn deliver_body(&self, body: &[u8]) -> Result<(), RelayError> {
        let request = PushRequest::from_body(body)?;
        self.deliver(request)
    }

    pub fn deliver(&self, request: PushRequest) -> Result<(), RelayError> {
        let Some(conn) = request.recipient().and_then(|id| self.registry.lookup(id)) else {
            tracing::info!(user_id = %request.user_id, "User is not connected; push dropped");
            return Err(RelayError::NotConnected);
        };

        let attempt_id = request.attempt_id.clone();
        let service_name = request.service_name.clone();
        let event = ServerEvent::PushNotification(request.into_notification());
        match conn.send(event) {
            Delivery::Queued => {}
            Delivery::Dropped => {
                tracing::warn!(
                    user_id = conn.user_id(),
                    conn = conn.id(),
                    %attempt_id,
                    "Outbound queue full; push dropped"
                );
                return Ok(());
            }
            Delivery::Closed => {
                tracing::info!(
                    user_id = conn.user_id(),
                    conn = conn.id(),
                    "Connection closed before push could be queued"
                );
                return Err(RelayError::NotConnected);
            }
        }

        tracing::info!(
            user_id = conn.user_id(),
            conn = conn.id(),
            %attempt_id,
            %service_name,
            "Push notification sent"
        );
        Ok(())
    }
}
