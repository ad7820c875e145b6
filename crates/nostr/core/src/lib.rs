//! Nostr protocol types for OpenAgents.
//!
//! This crate provides:
//! - NIP-01: Event structure, JSON encoding, tag lookups and kind constants
//! - NIP-42: Authentication of clients to relays
//! - The [`EventSigner`] capability used to sign event templates
//!
//! Signature cryptography is delegated to the signer implementation.

mod nip01;
mod nip42;
mod signer;

// NIP-01: Basic protocol
pub use nip01::{
    Event, EventTemplate, KIND_CLIENT_AUTH, KIND_CONTACTS, KIND_METADATA, KIND_SHORT_TEXT_NOTE,
    Nip01Error,
};

// NIP-42: Authentication of Clients to Relays
pub use nip42::{
    AUTH_KIND, AUTH_REQUIRED_PREFIX, CHALLENGE_TAG, RELAY_TAG, auth_template,
    create_auth_event_tags, get_challenge, get_relay_url, is_auth_event, is_auth_required_error,
};

// Signing capability
pub use signer::{EventSigner, SignerError};
