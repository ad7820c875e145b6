//! Wire frames exchanged with relays.
//!
//! Every frame is a JSON array led by a verb. Clients send `EVENT`, `REQ`,
//! `CLOSE`, `AUTH` and `COUNT`; relays answer with `EVENT`, `OK`, `EOSE`,
//! `CLOSED`, `NOTICE`, `NOTIFY`, `AUTH` and `COUNT`.

use crate::filter::RelayFilter;
use nostr::Event;
use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

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

/// Outgoing frame.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Event(Event),
    Req {
        subscription_id: String,
        filters: Vec<RelayFilter>,
    },
    Close {
        subscription_id: String,
    },
    /// NIP-42 response to a relay challenge.
    Auth(Event),
    /// NIP-45 count query.
    Count {
        subscription_id: String,
        filters: Vec<RelayFilter>,
    },
}

impl ClientMessage {
    fn verb(&self) -> &'static str {
        match self {
            ClientMessage::Event(_) => "EVENT",
            ClientMessage::Req { .. } => "REQ",
            ClientMessage::Close { .. } => "CLOSE",
            ClientMessage::Auth(_) => "AUTH",
            ClientMessage::Count { .. } => "COUNT",
        }
    }

    /// Render the frame for `for_relay`.
    ///
    /// With a relay url, per-relay filters are resolved against it and
    /// filters that do not apply to that relay are dropped. Without one,
    /// filters render their relay-agnostic view and those no relay would
    /// receive are dropped.
    pub fn to_json(&self, for_relay: Option<&str>) -> Result<String, MessageError> {
        let frame = match self {
            ClientMessage::Event(event) | ClientMessage::Auth(event) => {
                json!([self.verb(), serde_json::to_value(event)?])
            }
            ClientMessage::Close { subscription_id } => json!([self.verb(), subscription_id]),
            ClientMessage::Req {
                subscription_id,
                filters,
            }
            | ClientMessage::Count {
                subscription_id,
                filters,
            } => {
                let head = [json!(self.verb()), json!(subscription_id)];
                let rendered = filters
                    .iter()
                    .filter(|filter| match for_relay {
                        Some(url) => filter.is_valid_for(url),
                        None => filter.is_valid_anywhere(),
                    })
                    .map(|filter| filter.to_value(for_relay));
                Value::Array(head.into_iter().chain(rendered).collect())
            }
        };
        Ok(frame.to_string())
    }
}

/// Incoming frame.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    Event {
        subscription_id: String,
        event: Event,
    },
    Ok {
        event_id: String,
        success: bool,
        message: String,
    },
    Eose {
        subscription_id: String,
    },
    Closed {
        subscription_id: String,
        message: String,
    },
    Notice {
        message: String,
    },
    Notify {
        message: String,
    },
    Auth {
        challenge: String,
    },
    Count {
        subscription_id: String,
        count: u64,
    },
}

/// Positional reader over the elements that follow the verb.
struct Args<'a> {
    verb: &'a str,
    items: &'a [Value],
}

impl<'a> Args<'a> {
    fn at(&self, index: usize, name: &str) -> Result<&'a Value, MessageError> {
        self.items
            .get(index)
            .ok_or_else(|| MessageError::MissingField(format!("{} {}", self.verb, name)))
    }

    fn text(&self, index: usize, name: &str) -> Result<String, MessageError> {
        self.at(index, name)?
            .as_str()
            .map(str::to_owned)
            .ok_or_else(|| MessageError::InvalidFormat(format!("{} {} is not a string", self.verb, name)))
    }

    /// Trailing human-readable text, which relays may omit.
    fn optional_text(&self, index: usize) -> String {
        self.items
            .get(index)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned()
    }
}

impl RelayMessage {
    pub fn from_json(json: &str) -> Result<Self, MessageError> {
        let frame: Vec<Value> =
            serde_json::from_str(json).map_err(|e| MessageError::InvalidFormat(e.to_string()))?;
        let (verb, items) = frame
            .split_first()
            .ok_or_else(|| MessageError::InvalidFormat("empty array".to_string()))?;
        let verb = verb
            .as_str()
            .ok_or_else(|| MessageError::InvalidFormat("verb is not a string".to_string()))?;
        let args = Args { verb, items };

        let message = match verb {
            "EVENT" => RelayMessage::Event {
                subscription_id: args.text(0, "subscription_id")?,
                event: Event::deserialize(args.at(1, "event")?)?,
            },
            "OK" => RelayMessage::Ok {
                event_id: args.text(0, "event_id")?,
                success: args.at(1, "status")?.as_bool().ok_or_else(|| {
                    MessageError::InvalidFormat("OK status is not a boolean".to_string())
                })?,
                message: args.optional_text(2),
            },
            "EOSE" => RelayMessage::Eose {
                subscription_id: args.text(0, "subscription_id")?,
            },
            "CLOSED" => RelayMessage::Closed {
                subscription_id: args.text(0, "subscription_id")?,
                message: args.optional_text(1),
            },
            "NOTICE" => RelayMessage::Notice {
                message: args.text(0, "message")?,
            },
            "NOTIFY" => RelayMessage::Notify {
                message: args.text(0, "description")?,
            },
            "AUTH" => RelayMessage::Auth {
                challenge: args.text(0, "challenge")?,
            },
            "COUNT" => RelayMessage::Count {
                subscription_id: args.text(0, "subscription_id")?,
                count: args
                    .at(1, "result")?
                    .get("count")
                    .and_then(Value::as_u64)
                    .ok_or_else(|| MessageError::MissingField("COUNT count".to_string()))?,
            },
            other => return Err(MessageError::UnknownType(other.to_string())),
        };
        Ok(message)
    }
}
