//! Content assessment
//!
//! Folds every moderation signal for one piece of content into a single
//! action the UI can apply directly.

use crate::config::ModerationConfig;
use serde::{Deserialize, Serialize};

/// Action to take on a piece of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationAction {
    /// Show content normally
    #[default]
    Show,
    /// Blur media behind a click-through
    Blur,
    /// Hide behind a click-through
    Hide,
    /// Completely remove from view
    Remove,
}

impl ModerationAction {
    /// Whether content is visible without user action
    pub fn is_visible(&self) -> bool {
        matches!(self, ModerationAction::Show)
    }

    /// Whether media should be blurred
    pub fn blur_media(&self) -> bool {
        matches!(self, ModerationAction::Blur | ModerationAction::Hide)
    }

    /// The more restrictive of two actions
    pub fn more_restrictive(self, other: ModerationAction) -> ModerationAction {
        if self.priority() >= other.priority() {
            self
        } else {
            other
        }
    }

    fn priority(&self) -> u8 {
        match self {
            ModerationAction::Show => 0,
            ModerationAction::Blur => 1,
            ModerationAction::Hide => 2,
            ModerationAction::Remove => 3,
        }
    }
}

/// Why an action was chosen
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum AssessmentReason {
    /// Author is on the admin blacklist
    AdminBlacklisted,
    /// Author is on the viewer's block list
    BlockedAuthor,
    /// Author is on the viewer's mute list
    ViewerMuted,
    /// Trusted contacts reported the content
    TrustedReports {
        /// Most-reported category
        category: String,
        /// Trusted votes for it
        count: u32,
    },
    /// Trusted contacts mute the author
    TrustedMuters {
        /// Number of trusted muters
        count: usize,
    },
}

impl AssessmentReason {
    /// Human-readable description
    pub fn description(&self) -> String {
        match self {
            AssessmentReason::AdminBlacklisted => "Author blocked by moderators".to_string(),
            AssessmentReason::BlockedAuthor => "From blocked account".to_string(),
            AssessmentReason::ViewerMuted => "From muted account".to_string(),
            AssessmentReason::TrustedReports { category, count } => {
                format!("Reported as {} by {} trusted contacts", category, count)
            }
            AssessmentReason::TrustedMuters { count } => {
                format!("Muted by {} trusted contacts", count)
            }
        }
    }
}

/// Moderation signals gathered for one piece of content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssessmentInputs {
    /// Author is admin-blacklisted
    pub blacklisted: bool,
    /// Author is personally blocked
    pub blocked: bool,
    /// Viewer mutes the author
    pub viewer_muted: bool,
    /// Most-reported category and its trusted votes
    pub top_report: Option<(String, u32)>,
    /// Trusted muters other than the viewer
    pub trusted_muters: usize,
}

/// Outcome of an assessment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentAssessment {
    /// Action to take
    pub action: ModerationAction,
    /// Every signal that contributed
    pub reasons: Vec<AssessmentReason>,
    /// Whether autoplay must stay off
    pub autoplay_blocked: bool,
}

impl ContentAssessment {
    fn add(&mut self, action: ModerationAction, reason: AssessmentReason) {
        self.action = self.action.more_restrictive(action);
        self.reasons.push(reason);
    }
}

/// Combine signals using the configured thresholds
pub fn assess(inputs: &AssessmentInputs, config: &ModerationConfig) -> ContentAssessment {
    let mut result = ContentAssessment::default();

    if inputs.blacklisted {
        result.add(ModerationAction::Remove, AssessmentReason::AdminBlacklisted);
    }
    if inputs.blocked {
        result.add(ModerationAction::Remove, AssessmentReason::BlockedAuthor);
    }
    if inputs.viewer_muted {
        result.add(ModerationAction::Hide, AssessmentReason::ViewerMuted);
    }

    if let Some((category, count)) = &inputs.top_report {
        let count = *count;
        let action = if ModerationConfig::reaches(config.trusted_report_hide_threshold, count) {
            Some(ModerationAction::Hide)
        } else if ModerationConfig::reaches(config.blur_threshold, count) {
            Some(ModerationAction::Blur)
        } else {
            None
        };
        if let Some(action) = action {
            result.add(
                action,
                AssessmentReason::TrustedReports { category: category.clone(), count },
            );
        }
        result.autoplay_blocked =
            ModerationConfig::reaches(config.autoplay_block_threshold, count);
    }

    if ModerationConfig::reaches(config.trusted_mute_hide_threshold, inputs.trusted_muters as u32)
    {
        result.add(
            ModerationAction::Hide,
            AssessmentReason::TrustedMuters { count: inputs.trusted_muters },
        );
    }

    if result.action != ModerationAction::Show {
        result.autoplay_blocked = true;
    }
    result
}
