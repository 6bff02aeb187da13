//! WebSocket protocol types.
//!
//! Every frame is a JSON envelope: `{"type": ..., "session_id": ..., "data":
//! {...}}`. Inbound frames are deserialized into [`Envelope`] first and only
//! then parsed into a typed [`ClientEvent`], so an unknown `type` is reported
//! back to the sender instead of killing the read loop.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::HubError;
use crate::models::{BillingRecord, ChatMessage, SessionStatus};

use super::hub::EndedBy;

/// Raw inbound frame.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub session_id: Option<i64>,
    #[serde(default)]
    pub data: Value,
}

/// Typed client events, parsed out of an [`Envelope`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Join,
    Message {
        content: String,
        content_type: String,
        file_url: Option<String>,
    },
    Typing,
    TypingStop,
    Read {
        message_id: i64,
    },
    Leave,
    Ping,
}

#[derive(Debug, Deserialize)]
struct MessageData {
    content: String,
    #[serde(default = "default_content_type")]
    content_type: String,
    #[serde(default)]
    file_url: Option<String>,
}

fn default_content_type() -> String {
    "text".to_string()
}

#[derive(Debug, Deserialize)]
struct ReadData {
    message_id: i64,
}

impl Envelope {
    pub fn parse(&self) -> Result<ClientEvent, HubError> {
        match self.kind.as_str() {
            "join" => Ok(ClientEvent::Join),
            "message" => {
                let d: MessageData = serde_json::from_value(self.data.clone())
                    .map_err(|e| HubError::InvalidPayload(e.to_string()))?;
                Ok(ClientEvent::Message {
                    content: d.content,
                    content_type: d.content_type,
                    file_url: d.file_url,
                })
            }
            "typing" => Ok(ClientEvent::Typing),
            "typing_stop" => Ok(ClientEvent::TypingStop),
            "read" => {
                let d: ReadData = serde_json::from_value(self.data.clone())
                    .map_err(|e| HubError::InvalidPayload(e.to_string()))?;
                Ok(ClientEvent::Read {
                    message_id: d.message_id,
                })
            }
            "leave" => Ok(ClientEvent::Leave),
            "ping" => Ok(ClientEvent::Ping),
            other => Err(HubError::UnknownMessageType(other.to_string())),
        }
    }
}

/// Outbound frame, mirrored shape of [`Envelope`].
#[derive(Debug, Clone, Serialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<i64>,
    pub data: Value,
}

impl ServerMessage {
    pub fn join_success(session_id: i64, status: SessionStatus) -> Self {
        Self {
            kind: "join_success",
            session_id: Some(session_id),
            data: json!({ "session_id": session_id, "status": status }),
        }
    }

    pub fn session_start(
        session_id: i64,
        start_time: DateTime<Utc>,
        price_cents_per_minute: i64,
    ) -> Self {
        Self {
            kind: "session_start",
            session_id: Some(session_id),
            data: json!({
                "start_time": start_time,
                "price_per_minute": price_cents_per_minute,
            }),
        }
    }

    pub fn chat_message(msg: &ChatMessage) -> Self {
        Self {
            kind: "message",
            session_id: Some(msg.session_id),
            data: json!({
                "message_id": msg.id,
                "sender_id": msg.sender_id,
                "sender_type": msg.sender_type,
                "content_type": msg.content_type,
                "content": msg.content,
                "file_url": msg.file_url,
                "created_at": msg.created_at,
            }),
        }
    }

    pub fn typing(session_id: i64, from: i64) -> Self {
        Self {
            kind: "typing",
            session_id: Some(session_id),
            data: json!({ "from": from }),
        }
    }

    pub fn typing_stop(session_id: i64, from: i64) -> Self {
        Self {
            kind: "typing_stop",
            session_id: Some(session_id),
            data: json!({ "from": from }),
        }
    }

    pub fn message_read(
        session_id: i64,
        message_id: i64,
        read_by: i64,
        read_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: "message_read",
            session_id: Some(session_id),
            data: json!({
                "message_id": message_id,
                "read_by": read_by,
                "read_at": read_at,
            }),
        }
    }

    pub fn session_end(session_id: i64, ended_by: EndedBy) -> Self {
        Self {
            kind: "session_end",
            session_id: Some(session_id),
            data: json!({ "ended_by": ended_by.as_str() }),
        }
    }

    pub fn billing(record: &BillingRecord) -> Self {
        Self {
            kind: "billing",
            session_id: Some(record.session_id),
            data: json!({
                "duration": record.duration_secs,
                "duration_minutes": record.billed_minutes,
                "price_per_minute": record.price_cents_per_minute,
                "total_amount": record.total_amount_cents,
                "platform_fee": record.platform_fee_cents,
                "counselor_fee": record.counselor_fee_cents,
            }),
        }
    }

    pub fn error(session_id: Option<i64>, message: &str) -> Self {
        Self {
            kind: "error",
            session_id,
            data: json!({ "error": message }),
        }
    }

    pub fn pong() -> Self {
        Self {
            kind: "pong",
            session_id: None,
            data: json!({ "timestamp": Utc::now() }),
        }
    }
}
