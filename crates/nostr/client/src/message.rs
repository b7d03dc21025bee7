//! Nostr relay message types.
//!
//! This module implements the relay protocol frames as specified in NIP-01:
//! - Client to Relay: EVENT, REQ, CLOSE, AUTH
//! - Relay to Client: EVENT, OK, EOSE, CLOSED, NOTICE, AUTH

use nostr::{Event, Filter};
use serde_json::Value;
use thiserror::Error;

/// Errors that can occur when parsing relay messages.
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid message format: {0}")]
    InvalidFormat(String),

    #[error("unknown message type: {0}")]
    UnknownType(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("missing field: {0}")]
    MissingField(String),
}

/// Key under which an outbound message waits for its terminal response.
///
/// Events (published or AUTH) are answered by `OK` carrying the event id;
/// subscriptions are answered by `EOSE` or `CLOSED` carrying the
/// subscription id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AckKey {
    Event(String),
    Subscription(String),
}

impl AckKey {
    /// The bare id carried on the wire.
    pub fn id(&self) -> &str {
        match self {
            AckKey::Event(id) | AckKey::Subscription(id) => id,
        }
    }
}

/// Messages sent from client to relay.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    /// Publish an event: ["EVENT", <event JSON>]
    Event(Event),

    /// Subscribe to events: ["REQ", <subscription_id>, <filter1>, <filter2>, ...]
    Req {
        subscription_id: String,
        filters: Vec<Filter>,
    },

    /// Close a subscription: ["CLOSE", <subscription_id>]
    Close { subscription_id: String },

    /// Authentication (NIP-42): ["AUTH", <event JSON>]
    Auth(Event),
}

impl ClientMessage {
    /// Serialize to JSON array for sending to relay.
    pub fn to_json(&self) -> Result<String, MessageError> {
        let value = match self {
            ClientMessage::Event(event) => {
                serde_json::json!(["EVENT", event])
            }
            ClientMessage::Req {
                subscription_id,
                filters,
            } => {
                let mut arr: Vec<Value> = vec![
                    Value::String("REQ".to_string()),
                    Value::String(subscription_id.clone()),
                ];
                for filter in filters {
                    arr.push(serde_json::to_value(filter)?);
                }
                Value::Array(arr)
            }
            ClientMessage::Close { subscription_id } => {
                serde_json::json!(["CLOSE", subscription_id])
            }
            ClientMessage::Auth(event) => {
                serde_json::json!(["AUTH", event])
            }
        };
        Ok(value.to_string())
    }

    /// The key a terminal relay response for this message will carry.
    ///
    /// `CLOSE` has no terminal response; it is acknowledged on transmit.
    pub fn ack_key(&self) -> Option<AckKey> {
        match self {
            ClientMessage::Event(event) | ClientMessage::Auth(event) => {
                Some(AckKey::Event(event.id.clone()))
            }
            ClientMessage::Req {
                subscription_id, ..
            } => Some(AckKey::Subscription(subscription_id.clone())),
            ClientMessage::Close { .. } => None,
        }
    }

    /// Subscription id carried by REQ and CLOSE.
    pub fn subscription_id(&self) -> Option<&str> {
        match self {
            ClientMessage::Req {
                subscription_id, ..
            }
            | ClientMessage::Close { subscription_id } => Some(subscription_id),
            ClientMessage::Event(_) | ClientMessage::Auth(_) => None,
        }
    }

    /// Frame type tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Event(_) => "EVENT",
            ClientMessage::Req { .. } => "REQ",
            ClientMessage::Close { .. } => "CLOSE",
            ClientMessage::Auth(_) => "AUTH",
        }
    }
}

/// Messages sent from relay to client.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    /// Event matching a subscription: ["EVENT", <subscription_id>, <event JSON>]
    Event {
        subscription_id: String,
        event: Event,
    },

    /// Command result: ["OK", <event_id>, <true|false>, <message>]
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },

    /// End of stored events: ["EOSE", <subscription_id>]
    Eose { subscription_id: String },

    /// Subscription closed by relay: ["CLOSED", <subscription_id>, <message>]
    Closed {
        subscription_id: String,
        message: String,
    },

    /// Human-readable notice: ["NOTICE", <message>]
    Notice { message: String },

    /// Authentication challenge (NIP-42): ["AUTH", <challenge>]
    Auth { challenge: String },
}

impl RelayMessage {
    /// Parse a JSON message from the relay.
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let arr: Vec<Value> =
            serde_json::from_str(json).map_err(|e| MessageError::InvalidFormat(e.to_string()))?;

        if arr.is_empty() {
            return Err(MessageError::InvalidFormat("empty array".to_string()));
        }

        let msg_type = arr[0]
            .as_str()
            .ok_or_else(|| MessageError::InvalidFormat("first element not a string".to_string()))?;

        match msg_type {
            "EVENT" => {
                if arr.len() < 3 {
                    return Err(MessageError::MissingField(
                        "event or subscription_id".to_string(),
                    ));
                }
                let subscription_id = string_at(&arr, 1, "subscription_id")?;
                let event: Event = serde_json::from_value(arr[2].clone())?;
                Ok(RelayMessage::Event {
                    subscription_id,
                    event,
                })
            }
            "OK" => {
                if arr.len() < 3 {
                    return Err(MessageError::MissingField("OK fields".to_string()));
                }
                let event_id = string_at(&arr, 1, "event_id")?;
                let success = arr[2].as_bool().ok_or_else(|| {
                    MessageError::InvalidFormat("success not a boolean".to_string())
                })?;
                let message = arr.get(3).and_then(Value::as_str).unwrap_or("").to_string();
                Ok(RelayMessage::Ok {
                    event_id,
                    success,
                    message,
                })
            }
            "EOSE" => {
                if arr.len() < 2 {
                    return Err(MessageError::MissingField("subscription_id".to_string()));
                }
                let subscription_id = string_at(&arr, 1, "subscription_id")?;
                Ok(RelayMessage::Eose { subscription_id })
            }
            "CLOSED" => {
                if arr.len() < 2 {
                    return Err(MessageError::MissingField("CLOSED fields".to_string()));
                }
                let subscription_id = string_at(&arr, 1, "subscription_id")?;
                let message = arr.get(2).and_then(Value::as_str).unwrap_or("").to_string();
                Ok(RelayMessage::Closed {
                    subscription_id,
                    message,
                })
            }
            "NOTICE" => {
                if arr.len() < 2 {
                    return Err(MessageError::MissingField("message".to_string()));
                }
                let message = string_at(&arr, 1, "message")?;
                Ok(RelayMessage::Notice { message })
            }
            "AUTH" => {
                if arr.len() < 2 {
                    return Err(MessageError::MissingField("challenge".to_string()));
                }
                let challenge = string_at(&arr, 1, "challenge")?;
                Ok(RelayMessage::Auth { challenge })
            }
            _ => Err(MessageError::UnknownType(msg_type.to_string())),
        }
    }
}

fn string_at(arr: &[Value], index: usize, field: &str) -> Result<String, MessageError> {
    arr[index]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| MessageError::InvalidFormat(format!("{} not a string", field)))
}
