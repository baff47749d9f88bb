//! Trust-weighted moderation for Nostr clients
//!
//! Facade over the workspace crates: [`nostr_client`] carries the protocol
//! types and collaborator traits, [`moderation`] the aggregation engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use moderation;
pub use nostr_client;

pub use moderation::{
    ModerationConfig, ModerationError, ModerationEvent, ModerationService, ReportSummary,
};
pub use nostr_client::{Event, EventId, PubKey, RelayTransport, Signer};
