//! Named chat events exchanged with the backend
//!
//! Client to server: `user_message`, `heartbeat`.
//! Server to client: `bot_response`, `typing`, `error`, `connection`,
//! `heartbeat`.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use super::packet::SocketPacket;

/// Fallback text for an `error` event that carries none.
pub const DEFAULT_SERVER_ERROR: &str = "Erreur médicale survenue";

/// Payload of `user_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMessage {
    pub user_id: String,
    pub message: String,
    pub conversation_id: String,
    pub message_id: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    UserMessage(UserMessage),
    Heartbeat,
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::UserMessage(_) => "user_message",
            ClientEvent::Heartbeat => "heartbeat",
        }
    }

    pub fn to_packet(&self) -> crate::Result<SocketPacket> {
        let data = match self {
            ClientEvent::UserMessage(message) => Some(serde_json::to_value(message)?),
            ClientEvent::Heartbeat => None,
        };
        Ok(SocketPacket::event(self.name(), data))
    }
}

/// Payload of `bot_response`. Every field is optional on the wire.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BotResponse {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub conversation_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_id")]
    pub message_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Typed server event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    BotResponse(BotResponse),
    Typing,
    Error { message: String },
    Connection { message: Option<String> },
    Heartbeat,
}

impl ServerEvent {
    /// Interpret a Socket.IO event. Unknown names yield `None`.
    pub fn from_event(name: &str, data: Option<Value>) -> Option<Self> {
        match name {
            "bot_response" => {
                let response = data
                    .and_then(|d| match serde_json::from_value::<BotResponse>(d) {
                        Ok(response) => Some(response),
                        Err(e) => {
                            tracing::warn!(error = %e, "Malformed bot_response payload");
                            None
                        }
                    })
                    .unwrap_or_default();
                Some(ServerEvent::BotResponse(response))
            }
            "typing" => Some(ServerEvent::Typing),
            "error" => {
                let message = data
                    .as_ref()
                    .and_then(message_field)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_SERVER_ERROR.to_string());
                Some(ServerEvent::Error { message })
            }
            "connection" => Some(ServerEvent::Connection {
                message: data.as_ref().and_then(message_field),
            }),
            "heartbeat" => Some(ServerEvent::Heartbeat),
            other => {
                tracing::debug!(event = other, "Ignoring unknown server event");
                None
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::BotResponse(_) => "bot_response",
            ServerEvent::Typing => "typing",
            ServerEvent::Error { .. } => "error",
            ServerEvent::Connection { .. } => "connection",
            ServerEvent::Heartbeat => "heartbeat",
        }
    }
}

fn message_field(data: &Value) -> Option<String> {
    match data {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("message").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

/// Ids arrive as strings from some servers and as numbers from others.
fn lenient_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_timestamp<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(Value::as_str).and_then(parse_timestamp))
}

/// RFC 3339, or a naive ISO-8601 timestamp taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    #[test]
    fn test_user_message_wire_format() {
        let ts = Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap();
        let event = ClientEvent::UserMessage(UserMessage {
            user_id: "medical_user_1".to_string(),
            message: "asthme".to_string(),
            conversation_id: "c1".to_string(),
            message_id: "msg_1".to_string(),
            timestamp: ts,
        });

        let SocketPacket::Event { name, data } = event.to_packet().unwrap() else {
            panic!("expected event packet");
        };
        assert_eq!(name, "user_message");
        assert_eq!(
            data.unwrap(),
            json!({
                "userId": "medical_user_1",
                "message": "asthme",
                "conversationId": "c1",
                "messageId": "msg_1",
                "timestamp": "2025-03-01T10:00:00Z"
            })
        );
    }

    #[test]
    fn test_heartbeat_has_no_payload() {
        assert_eq!(
            ClientEvent::Heartbeat.to_packet().unwrap(),
            SocketPacket::event("heartbeat", None)
        );
    }

    #[test]
    fn test_bot_response_lenient_fields() {
        let event = ServerEvent::from_event(
            "bot_response",
            Some(json!({
                "message": "Avez-vous de la fièvre ?",
                "conversationId": 1700000000000u64,
                "messageId": 42,
                "timestamp": "2025-03-01T10:00:00.250"
            })),
        )
        .unwrap();

        let ServerEvent::BotResponse(response) = event else {
            panic!("expected bot_response");
        };
        assert_eq!(response.message.as_deref(), Some("Avez-vous de la fièvre ?"));
        assert_eq!(response.conversation_id.as_deref(), Some("1700000000000"));
        assert_eq!(response.message_id.as_deref(), Some("42"));
        assert_eq!(
            response.timestamp,
            Some(Utc.with_ymd_and_hms(2025, 3, 1, 10, 0, 0).unwrap() + chrono::Duration::milliseconds(250))
        );
    }

    #[test]
    fn test_bot_response_bad_timestamp_is_dropped() {
        let event = ServerEvent::from_event(
            "bot_response",
            Some(json!({"message": "ok", "timestamp": "yesterday", "messageId": ""})),
        );
        let Some(ServerEvent::BotResponse(response)) = event else {
            panic!("expected bot_response");
        };
        assert_eq!(response.timestamp, None);
        assert_eq!(response.message_id, None);
    }

    #[test]
    fn test_error_event_defaults_message() {
        assert_eq!(
            ServerEvent::from_event("error", Some(json!({}))),
            Some(ServerEvent::Error {
                message: DEFAULT_SERVER_ERROR.to_string()
            })
        );
        assert_eq!(
            ServerEvent::from_event("error", Some(json!({"message": "Maladie inconnue"}))),
            Some(ServerEvent::Error {
                message: "Maladie inconnue".to_string()
            })
        );
    }

    #[test]
    fn test_unknown_event_ignored() {
        assert_eq!(ServerEvent::from_event("analysis_progress", None), None);
        assert_eq!(ServerEvent::from_event("typing", None), Some(ServerEvent::Typing));
    }

    #[test]
    fn test_parse_timestamp_forms() {
        assert!(parse_timestamp("2025-03-01T10:00:00+02:00").is_some());
        assert!(parse_timestamp("2025-03-01T10:00:00").is_some());
        assert!(parse_timestamp("01/03/2025").is_none());
    }
}
