//! NIP-42: Authentication of clients to relays.
//!
//! A relay sends `["AUTH", <challenge>]`; the client answers with a signed
//! ephemeral event of kind 22242 carrying `relay` and `challenge` tags.

use crate::nip01::{Event, EventTemplate, KIND_CLIENT_AUTH};

/// Kind of the client authentication event.
pub const AUTH_KIND: u16 = KIND_CLIENT_AUTH;

/// Prefix relays put on OK/CLOSED messages that require authentication.
pub const AUTH_REQUIRED_PREFIX: &str = "auth-required";

/// Tag carrying the relay URL.
pub const RELAY_TAG: &str = "relay";

/// Tag carrying the challenge string.
pub const CHALLENGE_TAG: &str = "challenge";

/// Tags for an authentication event.
pub fn create_auth_event_tags(relay_url: &str, challenge: &str) -> Vec<Vec<String>> {
    vec![
        vec![RELAY_TAG.to_string(), relay_url.to_string()],
        vec![CHALLENGE_TAG.to_string(), challenge.to_string()],
    ]
}

/// Unsigned template answering `challenge` on `relay_url`.
pub fn auth_template(relay_url: &str, challenge: &str, created_at: u64) -> EventTemplate {
    EventTemplate {
        created_at,
        kind: AUTH_KIND,
        tags: create_auth_event_tags(relay_url, challenge),
        content: String::new(),
    }
}

/// Whether the event is a client authentication event.
pub fn is_auth_event(event: &Event) -> bool {
    event.kind == AUTH_KIND
}

/// Challenge answered by an authentication event.
pub fn get_challenge(event: &Event) -> Option<&str> {
    event.first_tag_value(CHALLENGE_TAG)
}

/// Relay an authentication event was created for.
pub fn get_relay_url(event: &Event) -> Option<&str> {
    event.first_tag_value(RELAY_TAG)
}

/// Whether a relay message asks the client to authenticate first.
pub fn is_auth_required_error(message: &str) -> bool {
    message.starts_with(AUTH_REQUIRED_PREFIX)
}
