//! Trust-weighted moderation for Nostr clients
//!
//! This crate aggregates reports (kind 1984) and mute lists (kind 10000)
//! from the viewer's trusted contacts into per-event summaries, honouring
//! admin whitelist/blacklist snapshots and the viewer's personal block list.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod access;
pub mod assess;
pub mod blocks;
pub mod config;
pub mod error;
pub mod events;
pub mod mutes;
pub mod parse;
pub mod queue;
pub mod reports;
pub mod service;
pub mod subscriptions;
pub mod trust;

pub use access::{AccessControl, AccessSnapshot, AccessStatus, StaticAccessLists};
pub use assess::{AssessmentReason, ContentAssessment, ModerationAction};
pub use blocks::{BlockAction, BlockChange, BlockListError, InMemoryBlockList, UserBlockList};
pub use config::{ConfigError, ModerationConfig};
pub use error::{ModerationError, Result};
pub use events::ModerationEvent;
pub use mutes::TrustedMuteCounts;
pub use reports::{
    CategoryTally, ReportSummary, ThresholdAction, ThresholdCrossing, TrustedReporter,
};
pub use service::{ModerationService, MuteUpdate, PublishReceipt, ReportRequest};
pub use trust::ContactEntry;
