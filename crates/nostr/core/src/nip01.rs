//! NIP-01 events.
//!
//! The engine never computes ids or checks signatures, so [`Event`] is a
//! plain value: it decodes, encodes and answers tag questions. Producing a
//! signed event from an [`EventTemplate`] is the job of an
//! [`crate::EventSigner`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub const KIND_METADATA: u16 = 0;
pub const KIND_SHORT_TEXT_NOTE: u16 = 1;
pub const KIND_CONTACTS: u16 = 3;
pub const KIND_CLIENT_AUTH: u16 = 22242;

/// A signed event as relays deliver it. Hex fields are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    /// Seconds since the Unix epoch.
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    pub fn from_json(json: &str) -> Result<Self, Nip01Error> {
        let event = serde_json::from_str::<Event>(json)?;
        if event.id.is_empty() {
            return Err(Nip01Error::InvalidEvent("missing id".to_string()));
        }
        Ok(event)
    }

    pub fn as_json(&self) -> Result<String, Nip01Error> {
        serde_json::to_string(self).map_err(Nip01Error::from)
    }

    /// Second element of every tag whose name is `name`, in tag order.
    ///
    /// Tags with only a name are skipped.
    pub fn tag_values<'a>(&'a self, name: &str) -> impl Iterator<Item = &'a str> {
        self.tags.iter().filter_map(move |tag| match tag.as_slice() {
            [tag_name, value, ..] if tag_name == name => Some(value.as_str()),
            _ => None,
        })
    }

    pub fn first_tag_value(&self, name: &str) -> Option<&str> {
        self.tag_values(name).next()
    }

    pub fn has_tag_value(&self, name: &str, value: &str) -> bool {
        self.tag_values(name).any(|candidate| candidate == value)
    }
}

/// Unsigned event content handed to a signer, which fills in pubkey, id
/// and signature.
///
/// ```
/// use nostr::EventTemplate;
///
/// let reply = EventTemplate {
///     created_at: 1_700_000_000,
///     kind: 1,
///     tags: vec![vec!["e".to_string(), "root-id".to_string()]],
///     content: "agreed".to_string(),
/// };
/// assert_eq!(reply.tags[0][0], "e");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tag(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|p| p.to_string()).collect()
    }

    fn event(id: &str, created_at: u64, tags: Vec<Vec<String>>) -> Event {
        Event {
            id: id.to_string(),
            pubkey: "author".to_string(),
            created_at,
            kind: KIND_SHORT_TEXT_NOTE,
            tags,
            content: String::new(),
            sig: "sig".to_string(),
        }
    }

    #[test]
    fn decodes_relay_json_and_encodes_it_back() {
        let json = r#"{"id":"e9","pubkey":"author","created_at":5,"kind":1,"tags":[["t","nostr"]],"content":"","sig":"sig"}"#;
        let decoded = Event::from_json(json).unwrap();
        assert_eq!(decoded, event("e9", 5, vec![tag(&["t", "nostr"])]));
        assert_eq!(decoded.as_json().unwrap(), json);
    }

    #[test]
    fn from_json_requires_an_id() {
        let json = r#"{"id":"","pubkey":"a","created_at":1,"kind":1,"tags":[],"content":"","sig":""}"#;
        assert!(matches!(Event::from_json(json), Err(Nip01Error::InvalidEvent(_))));
        assert!(matches!(
            Event::from_json(r#"{"id":"x"}"#),
            Err(Nip01Error::Serialization(_))
        ));
    }

    #[test]
    fn tag_queries_skip_name_only_tags() {
        let event = event(
            "e1",
            1,
            vec![
                tag(&["e", "root"]),
                tag(&["p", "bob", "wss://relay.example"]),
                tag(&["t"]),
                tag(&["e", "reply"]),
            ],
        );

        assert_eq!(event.tag_values("e").collect::<Vec<_>>(), vec!["root", "reply"]);
        assert_eq!(event.first_tag_value("p"), Some("bob"));
        assert_eq!(event.first_tag_value("t"), None);
        assert!(event.has_tag_value("e", "reply"));
        assert!(!event.has_tag_value("p", "wss://relay.example"));
    }

    #[test]
    fn tag_value_outlives_the_name_it_was_looked_up_by() {
        let event = event("e2", 1, vec![tag(&["challenge", "c-1"])]);
        let value = {
            let name = String::from("challenge");
            event.first_tag_value(&name)
        };
        assert_eq!(value, Some("c-1"));
    }
}
