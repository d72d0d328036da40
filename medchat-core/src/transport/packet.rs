//! Engine.IO v4 and Socket.IO v4 text framing
//!
//! Engine.IO carries the transport-level packets (`0` open, `1` close,
//! `2`/`3` ping/pong, `4` message, `6` noop); a Socket.IO packet rides in the
//! body of an Engine.IO `4` message. Only the default namespace and text
//! frames are supported. Binary attachments and acknowledgements are not
//! used by the chat backend.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

/// Record separator between packets in a long-polling payload.
pub const PAYLOAD_SEPARATOR: char = '\x1e';

/// Body of the Engine.IO open packet.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenHandshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    /// Milliseconds between server pings
    pub ping_interval: u64,
    /// Milliseconds the server waits for a pong
    pub ping_timeout: u64,
    #[serde(default)]
    pub max_payload: Option<u64>,
}

impl OpenHandshake {
    /// How long the link may stay silent before the server is presumed gone.
    pub fn silence_limit(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnginePacket {
    Open(OpenHandshake),
    Close,
    Ping(String),
    Pong(String),
    Message(String),
    Upgrade,
    Noop,
}

impl EnginePacket {
    pub fn decode(frame: &str) -> Result<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::Protocol("empty engine.io packet".to_string()))?;
        let body = chars.as_str();

        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(body).map_err(|e| {
                Error::Protocol(format!("invalid open handshake: {}", e))
            })?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping(body.to_string())),
            '3' => Ok(EnginePacket::Pong(body.to_string())),
            '4' => Ok(EnginePacket::Message(body.to_string())),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(Error::Protocol(format!(
                "unknown engine.io packet type '{}'",
                other
            ))),
        }
    }

    /// Text form of the packet. The open packet is server-only and is
    /// never encoded by the client, so it renders as a bare type digit.
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(_) => "0".to_string(),
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping(data) => format!("2{}", data),
            EnginePacket::Pong(data) => format!("3{}", data),
            EnginePacket::Message(data) => format!("4{}", data),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }
}

/// Split a long-polling response body into its packets.
pub fn decode_payload(body: &str) -> Result<Vec<EnginePacket>> {
    body.split(PAYLOAD_SEPARATOR)
        .filter(|frame| !frame.is_empty())
        .map(EnginePacket::decode)
        .collect()
}

/// Join packets into a long-polling request body.
pub fn encode_payload(packets: &[EnginePacket]) -> String {
    packets
        .iter()
        .map(EnginePacket::encode)
        .collect::<Vec<_>>()
        .join(&PAYLOAD_SEPARATOR.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    /// Client: join the namespace. Server: acknowledgement with its sid.
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Option<Value> },
    ConnectError(String),
}

impl SocketPacket {
    pub fn event(name: &str, data: Option<Value>) -> Self {
        SocketPacket::Event {
            name: name.to_string(),
            data,
        }
    }

    pub fn decode(body: &str) -> Result<Self> {
        let mut chars = body.chars();
        let kind = chars
            .next()
            .ok_or_else(|| Error::Protocol("empty socket.io packet".to_string()))?;
        let json = skip_ack_id(skip_namespace(chars.as_str()));

        match kind {
            '0' => Ok(SocketPacket::Connect(parse_optional_json(json)?)),
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let value: Value = serde_json::from_str(json)
                    .map_err(|e| Error::Protocol(format!("invalid event payload: {}", e)))?;
                let mut items = match value {
                    Value::Array(items) if !items.is_empty() => items.into_iter(),
                    _ => return Err(Error::Protocol("event payload is not a named array".to_string())),
                };
                let name = match items.next() {
                    Some(Value::String(name)) => name,
                    _ => return Err(Error::Protocol("event name is not a string".to_string())),
                };
                Ok(SocketPacket::Event {
                    name,
                    data: items.next(),
                })
            }
            '4' => {
                let message = parse_optional_json(json)?
                    .and_then(|v| match v {
                        Value::String(s) => Some(s),
                        Value::Object(map) => map
                            .get("message")
                            .and_then(Value::as_str)
                            .map(str::to_string),
                        _ => None,
                    })
                    .unwrap_or_else(|| "connection refused".to_string());
                Ok(SocketPacket::ConnectError(message))
            }
            other => Err(Error::Protocol(format!(
                "unsupported socket.io packet type '{}'",
                other
            ))),
        }
    }

    pub fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(auth)) => format!("0{}", auth),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, data } => {
                let mut items = vec![Value::String(name.clone())];
                items.extend(data.clone());
                format!("2{}", Value::Array(items))
            }
            SocketPacket::ConnectError(message) => {
                format!("4{}", serde_json::json!({ "message": message }))
            }
        }
    }

    /// Wrap into the Engine.IO message that carries it.
    pub fn into_engine(self) -> EnginePacket {
        EnginePacket::Message(self.encode())
    }
}

fn skip_namespace(rest: &str) -> &str {
    if rest.starts_with('/') {
        match rest.find(',') {
            Some(idx) => &rest[idx + 1..],
            None => "",
        }
    } else {
        rest
    }
}

fn skip_ack_id(rest: &str) -> &str {
    rest.trim_start_matches(|c: char| c.is_ascii_digit())
}

fn parse_optional_json(json: &str) -> Result<Option<Value>> {
    if json.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(json)
        .map(Some)
        .map_err(|e| Error::Protocol(format!("invalid packet body: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_open_handshake() {
        let frame = r#"0{"sid":"lv_VI97HAXpY6yYWAAAC","upgrades":["websocket"],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;
        let EnginePacket::Open(open) = EnginePacket::decode(frame).unwrap() else {
            panic!("expected open packet");
        };
        assert_eq!(open.sid, "lv_VI97HAXpY6yYWAAAC");
        assert_eq!(open.upgrades, vec!["websocket".to_string()]);
        assert_eq!(open.silence_limit(), Duration::from_millis(45000));
    }

    #[test]
    fn test_engine_control_packets() {
        assert_eq!(EnginePacket::decode("2").unwrap(), EnginePacket::Ping(String::new()));
        assert_eq!(EnginePacket::Pong(String::new()).encode(), "3");
        assert_eq!(EnginePacket::decode("1").unwrap(), EnginePacket::Close);
        assert_eq!(EnginePacket::decode("6").unwrap(), EnginePacket::Noop);
        assert!(EnginePacket::decode("").is_err());
        assert!(EnginePacket::decode("9").is_err());
    }

    #[test]
    fn test_polling_payload_split() {
        let body = "40{\"sid\":\"abc\"}\x1e2\x1e42[\"typing\"]";
        let packets = decode_payload(body).unwrap();
        assert_eq!(packets.len(), 3);
        assert_eq!(packets[1], EnginePacket::Ping(String::new()));
        assert_eq!(
            encode_payload(&[EnginePacket::Pong(String::new()), SocketPacket::Disconnect.into_engine()]),
            "3\x1e41"
        );
    }

    #[test]
    fn test_decode_connect_ack() {
        let packet = SocketPacket::decode(r#"0{"sid":"N0hY"}"#).unwrap();
        assert_eq!(packet, SocketPacket::Connect(Some(json!({"sid": "N0hY"}))));
    }

    #[test]
    fn test_decode_event_with_namespace_and_ack_id() {
        let packet =
            SocketPacket::decode(r#"2/chat,12["bot_response",{"message":"Bonjour"}]"#).unwrap();
        assert_eq!(
            packet,
            SocketPacket::event("bot_response", Some(json!({"message": "Bonjour"})))
        );
    }

    #[test]
    fn test_decode_event_without_data() {
        let packet = SocketPacket::decode(r#"2["typing"]"#).unwrap();
        assert_eq!(packet, SocketPacket::event("typing", None));
        assert!(SocketPacket::decode("2[]").is_err());
        assert!(SocketPacket::decode("2[42]").is_err());
    }

    #[test]
    fn test_decode_connect_error() {
        assert_eq!(
            SocketPacket::decode(r#"4{"message":"Not authorized"}"#).unwrap(),
            SocketPacket::ConnectError("Not authorized".to_string())
        );
        assert_eq!(
            SocketPacket::decode("4").unwrap(),
            SocketPacket::ConnectError("connection refused".to_string())
        );
    }

    #[test]
    fn test_encode_event() {
        let packet = SocketPacket::event("heartbeat", None);
        assert_eq!(packet.into_engine().encode(), r#"42["heartbeat"]"#);

        let packet = SocketPacket::event("user_message", Some(json!({"message": "asthme"})));
        assert_eq!(packet.encode(), r#"2["user_message",{"message":"asthme"}]"#);
    }
}
