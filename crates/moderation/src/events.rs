//! Change stream
//!
//! UI layers subscribe to these notifications to invalidate caches instead of
//! polling the engine.

use crate::blocks::BlockAction;
use crate::reports::{ReportSummary, ThresholdCrossing};
use nostr_client::{EventId, PubKey};
use serde::{Deserialize, Serialize};

/// Notification broadcast by [`ModerationService`](crate::service::ModerationService)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ModerationEvent {
    /// The trusted set was rebuilt
    Contacts {
        /// Size of the trusted set
        size: usize,
    },
    /// The trusted mute index changed
    TrustedMutes {
        /// Authors with at least one trusted muter
        total: usize,
        /// Owner whose list changed, `None` for bulk changes
        owner: Option<PubKey>,
    },
    /// A report summary was recomputed or dropped
    Summary {
        /// Reported event
        target: EventId,
        /// New summary, `None` once the target has no votes
        summary: Option<ReportSummary>,
    },
    /// The personal block list changed and summaries were recomputed
    UserBlocks {
        /// Kind of change
        action: BlockAction,
        /// Affected key
        target: Option<PubKey>,
    },
    /// An autoplay or blur threshold was crossed
    Threshold(ThresholdCrossing),
    /// Trust started or stopped coming from seeds alone
    TrustedSeedOnly {
        /// Current flag
        seed_only: bool,
    },
}

impl ModerationEvent {
    /// Short name of the notification
    pub fn name(&self) -> &'static str {
        match self {
            ModerationEvent::Contacts { .. } => "contacts",
            ModerationEvent::TrustedMutes { .. } => "trusted-mutes",
            ModerationEvent::Summary { .. } => "summary",
            ModerationEvent::UserBlocks { .. } => "user-blocks",
            ModerationEvent::Threshold(_) => "threshold",
            ModerationEvent::TrustedSeedOnly { .. } => "trusted-seed-only",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reports::ThresholdAction;
    use nostr_client::test_utils::event_ids;

    #[test]
    fn test_event_names() {
        assert_eq!(ModerationEvent::Contacts { size: 1 }.name(), "contacts");
        assert_eq!(
            ModerationEvent::UserBlocks { action: BlockAction::Sync, target: None }.name(),
            "user-blocks"
        );
    }

    #[test]
    fn test_event_serialization_is_tagged() {
        let event = ModerationEvent::Threshold(ThresholdCrossing {
            target: event_ids::video(1),
            category: "spam".into(),
            trusted_count: 1,
            action: ThresholdAction::AutoplayBlockEnabled,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "threshold");
        assert_eq!(json["action"], "autoplay-block-enabled");
    }
}
