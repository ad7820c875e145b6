//! Signing capability.
//!
//! Key handling lives outside this crate. Callers hand an [`EventSigner`]
//! to whatever needs to turn an [`EventTemplate`] into a signed [`Event`].

use crate::nip01::{Event, EventTemplate};
use thiserror::Error;

/// Errors reported by a signer.
#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing rejected: {0}")]
    Rejected(String),

    #[error("signer unavailable: {0}")]
    Unavailable(String),
}

/// Something that can sign event templates on behalf of one pubkey.
pub trait EventSigner: Send + Sync {
    /// Hex public key of the signing identity.
    fn pubkey(&self) -> String;

    /// Sign a template, producing an event with id and signature filled in.
    fn sign(&self, template: EventTemplate) -> Result<Event, SignerError>;
}
