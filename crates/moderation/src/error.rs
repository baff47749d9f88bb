//! Write-path errors
//!
//! Read paths never fail: transport errors degrade to empty results and
//! malformed events are dropped at ingestion. Only operations that sign and
//! publish on the viewer's behalf report errors.

use nostr_client::SignerError;
use thiserror::Error;

/// Errors that can occur while publishing on the viewer's behalf
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModerationError {
    /// No viewer is logged in
    #[error("Viewer not logged in")]
    NotLoggedIn,

    /// The target key or event id is malformed
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    /// The viewer tried to act on themselves
    #[error("Cannot target the viewer's own key")]
    SelfTarget,

    /// No signer is connected
    #[error("Signer unavailable")]
    SignerUnavailable,

    /// The signer refused or failed to sign
    #[error("Signature failed: {0}")]
    SignatureFailed(String),

    /// The signer denied the required permission
    #[error("Signer permission denied: {0}")]
    PermissionDenied(String),

    /// No write relays are configured
    #[error("No write relays configured")]
    NoWriteRelays,

    /// No relay accepted the event
    #[error("Publish rejected: {accepted} of {attempted} relays accepted")]
    PublishRejected {
        /// Accepting relays (always zero)
        accepted: usize,
        /// Relays tried
        attempted: usize,
    },

    /// The report category is empty
    #[error("Invalid report category: {0:?}")]
    InvalidCategory(String),
}

/// Result type for write-path operations
pub type Result<T> = std::result::Result<T, ModerationError>;

impl From<SignerError> for ModerationError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Unavailable => ModerationError::SignerUnavailable,
            SignerError::Rejected(reason) => ModerationError::SignatureFailed(reason),
            SignerError::PermissionDenied(reason) => ModerationError::PermissionDenied(reason),
        }
    }
}
