//! Event signing seam
//!
//! Signing lives outside the engine (browser extensions, remote signers,
//! local keys). Implementations only need to turn an [`UnsignedEvent`] into
//! a signed [`Event`] or explain why they could not.

use crate::event::{Event, UnsignedEvent};
use crate::types::PubKey;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur while signing
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignerError {
    /// No signer is connected
    #[error("Signer unavailable")]
    Unavailable,

    /// The signer refused or failed to sign
    #[error("Signature rejected: {0}")]
    Rejected(String),

    /// The signer denied the required permissions
    #[error("Signer permission denied: {0}")]
    PermissionDenied(String),
}

/// Produces signatures for one identity
#[async_trait]
pub trait Signer: Send + Sync {
    /// Key this signer signs for
    fn pubkey(&self) -> PubKey;

    /// Sign an event body
    async fn sign_event(&self, event: UnsignedEvent) -> Result<Event, SignerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signer_error_display() {
        assert_eq!(SignerError::Unavailable.to_string(), "Signer unavailable");
        assert!(SignerError::Rejected("user cancelled".into())
            .to_string()
            .contains("user cancelled"));
        assert!(SignerError::PermissionDenied("sign_event".into())
            .to_string()
            .contains("permission"));
    }
}
