//! Server → client WebSocket events.
//!
//! Every frame is a JSON text frame of the form
//! `{"event": "<name>", "data": {...}}`.

use serde::Serialize;
use serde_json::Value;

pub const CONNECTED_MESSAGE: &str = "Successfully connected to push notification server";

/// Push payload as forwarded to the recipient. `status` from the request is
/// deliberately absent.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PushNotification {
    pub message: Value,
    #[serde(rename = "emp_no")]
    pub user_id: Value,
    pub attempt_id: Value,
    pub client_id: Value,
    pub data: Value,
    pub service_name: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected { message: String },
    ConnectionRejected { message: String },
    PushNotification(PushNotification),
}

impl ServerEvent {
    pub fn connected() -> Self {
        Self::Connected {
            message: CONNECTED_MESSAGE.to_string(),
        }
    }

    pub fn rejected(reason: impl ToString) -> Self {
        Self::ConnectionRejected {
            message: reason.to_string(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| {
            tracing::error!("Failed to serialize server event: {e}");
            String::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn rejection_frame_shape() {
        let frame: Value =
            serde_json::from_str(&ServerEvent::rejected("Invalid userId provided").to_json())
                .unwrap();
        assert_eq!(
            frame,
            json!({"event": "connection_rejected", "data": {"message": "Invalid userId provided"}})
        );
    }

    #[test]
    fn push_frame_uses_wire_field_names() {
        let event = ServerEvent::PushNotification(PushNotification {
            message: json!("hi"),
            user_id: json!("E1001"),
            attempt_id: json!(7),
            client_id: json!("web"),
            data: json!({"k": "v"}),
            service_name: json!("billing"),
        });
        let frame: Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(frame["event"], "push_notification");
        assert_eq!(frame["data"]["emp_no"], "E1001");
        assert_eq!(frame["data"]["attempt_id"], 7);
        assert!(frame["data"].get("status").is_none());
    }
}
