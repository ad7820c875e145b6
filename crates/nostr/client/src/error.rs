//! Errors returned to callers and errors reported to relay listeners.

use crate::message::MessageError;
use thiserror::Error;

/// Failures returned by client, pool and relay operations.
#[derive(Error, Debug)]
pub enum ClientError {
    /// A socket could not be created for a relay.
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Message error: {0}")]
    Message(#[from] MessageError),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Unknown relay: {0}")]
    UnknownRelay(String),

    #[error("Subscription already exists: {0}")]
    DuplicateSubscription(String),

    #[error("Unknown subscription: {0}")]
    UnknownSubscription(String),

    #[error("Signer error: {0}")]
    Signer(#[from] nostr::SignerError),

    /// The owning [`crate::NostrClient`] was closed.
    #[error("Client is closed")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ClientError>;

/// Non-fatal problems surfaced to relay listeners.
///
/// None of these close the socket except [`RelayError::Socket`], which is
/// reported after the connection has already dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    /// Relay sent a NOTICE
    #[error("Relay sent notice: {0}")]
    Notice(String),

    /// Frame with an unknown first element
    #[error("Unsupported message: {0}")]
    Unsupported(String),

    /// Frame that could not be parsed
    #[error("Malformed message: {0}")]
    Malformed(String),

    /// Transport failure
    #[error("WebSocket failure: {0}")]
    Socket(String),

    /// Tried to write while no socket was open
    #[error("Failed to send {0}. Relay is not connected.")]
    NotConnected(String),
}
