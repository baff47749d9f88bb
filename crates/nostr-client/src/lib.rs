//! Nostr client primitives
//!
//! This crate provides the protocol vocabulary shared by the moderation
//! engine and its hosts: identifier types, the signed event model, relay
//! filters, and the transport and signer collaborator traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod event;
pub mod relay;
pub mod signer;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use event::{kind, Event, Revision, Tag, UnsignedEvent};
pub use relay::{
    Filter, PublishOutcome, RelayError, RelayTransport, Subscription, SubscriptionCallbacks,
};
pub use signer::{Signer, SignerError};
pub use types::{EventId, PubKey};

/// Result type for Nostr client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for Nostr client operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Value is neither 64-char hex nor a valid npub
    #[error("Invalid public key: {0}")]
    InvalidPubKey(String),

    /// Value is not a 64-char hex event id
    #[error("Invalid event id: {0}")]
    InvalidEventId(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_types() {
        let err = Error::InvalidPubKey("nope".to_string());
        assert!(err.to_string().contains("Invalid public key"));

        let err = Error::InvalidEventId("zz".to_string());
        assert!(err.to_string().contains("zz"));
    }
}
