//! Report aggregation
//!
//! Reports are stored as one vote per `(target, reporter, category)`; a newer
//! report from the same reporter replaces the older one. Summaries are never
//! patched in place. Every recomputation re-derives all tallies for a target
//! from the stored votes, because a reporter's weight class (blocked,
//! blacklisted, trusted, plain) can flip at any time.
//!
//! Recomputation also drives the autoplay and blur side effects. They follow
//! the trusted vote count of the single most-reported category of a target
//! and fire only when that count crosses a threshold.

use crate::access::AccessSnapshot;
use crate::blocks::UserBlockList;
use crate::config::ModerationConfig;
use crate::parse::Report;
use nostr_client::{EventId, PubKey, Revision};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// Per-category tally
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CategoryTally {
    /// Votes from trusted or whitelisted reporters
    pub trusted: u32,
    /// Votes from reporters that are neither blocked nor blacklisted
    pub total: u32,
    /// Newest `created_at` among counted votes
    pub latest: u64,
}

/// Trust-weighted view of the reports on one target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Reported event
    pub target: EventId,
    /// Trusted votes across all categories
    pub total_trusted: u32,
    /// Tallies per category
    pub categories: BTreeMap<String, CategoryTally>,
    /// Wall-clock time of the recomputation (unix millis, 0 if never computed)
    pub updated_at: i64,
}

impl ReportSummary {
    /// Zeroed summary for a target nobody reported
    pub fn empty(target: EventId) -> Self {
        Self { target, total_trusted: 0, categories: BTreeMap::new(), updated_at: 0 }
    }

    /// Tally for one category
    pub fn category(&self, category: &str) -> Option<&CategoryTally> {
        self.categories.get(category)
    }

    /// Most-reported category
    ///
    /// Most trusted votes wins, then most total votes, then the
    /// lexicographically smallest name.
    pub fn top_category(&self) -> Option<(&str, &CategoryTally)> {
        let mut best: Option<(&str, &CategoryTally)> = None;
        for (name, tally) in &self.categories {
            let better = match best {
                None => true,
                Some((_, current)) => {
                    (tally.trusted, tally.total) > (current.trusted, current.total)
                }
            };
            if better {
                best = Some((name.as_str(), tally));
            }
        }
        best
    }
}

/// Trusted reporter of a target
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedReporter {
    /// Reporter key
    pub pubkey: PubKey,
    /// Newest relevant vote
    pub latest: u64,
}

/// Threshold side effect
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ThresholdAction {
    /// Autoplay must stop
    AutoplayBlockEnabled,
    /// Autoplay may resume
    AutoplayBlockCleared,
    /// Media must be blurred
    BlurEnabled,
    /// Media may be shown
    BlurCleared,
}

/// One threshold crossing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdCrossing {
    /// Reported event
    pub target: EventId,
    /// Category whose trusted count crossed
    pub category: String,
    /// Trusted count after the recomputation
    pub trusted_count: u32,
    /// Which side effect flipped
    pub action: ThresholdAction,
}

/// Result of recomputing one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recomputed {
    /// Reported event
    pub target: EventId,
    /// New summary, `None` when the target no longer has votes
    pub summary: Option<ReportSummary>,
    /// Threshold crossings caused by the recomputation
    pub crossings: Vec<ThresholdCrossing>,
}

/// Everything needed to weigh a reporter
pub struct VoteContext<'a> {
    /// Admin lists
    pub access: &'a AccessSnapshot,
    /// Current trusted set
    pub trusted: &'a BTreeSet<PubKey>,
    /// Personal block list
    pub blocks: &'a dyn UserBlockList,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Weight {
    Excluded,
    Counted,
    Trusted,
}

impl VoteContext<'_> {
    fn weigh(&self, reporter: &PubKey) -> Weight {
        if self.blocks.is_blocked(reporter) || self.access.is_blacklisted(reporter) {
            Weight::Excluded
        } else if self.access.is_whitelisted(reporter) || self.trusted.contains(reporter) {
            Weight::Trusted
        } else {
            Weight::Counted
        }
    }
}

type Votes = HashMap<PubKey, HashMap<String, Revision>>;

/// Vote storage and cached summaries for every watched target
#[derive(Debug, Default)]
pub struct ReportBook {
    autoplay_threshold: u32,
    blur_threshold: u32,
    votes: HashMap<EventId, Votes>,
    summaries: HashMap<EventId, ReportSummary>,
    top: HashMap<EventId, (String, u32)>,
}

impl ReportBook {
    /// Create an empty book using the configured thresholds
    pub fn new(config: &ModerationConfig) -> Self {
        Self {
            autoplay_threshold: config.autoplay_block_threshold,
            blur_threshold: config.blur_threshold,
            ..Self::default()
        }
    }

    /// Store a vote if it is newer than the reporter's previous vote
    ///
    /// Returns `true` when the stored votes changed.
    pub fn upsert(&mut self, report: Report) -> bool {
        let slot = self
            .votes
            .entry(report.target)
            .or_default()
            .entry(report.reporter)
            .or_default();
        let newer = slot
            .get(&report.category)
            .map_or(true, |existing| report.revision.supersedes(existing));
        if newer {
            slot.insert(report.category, report.revision);
        }
        newer
    }

    #[cfg(test)]
    fn has_votes(&self, target: &EventId) -> bool {
        self.votes.get(target).is_some_and(|votes| !votes.is_empty())
    }

    /// Targets with stored votes or summaries
    pub fn targets(&self) -> Vec<EventId> {
        let mut targets: BTreeSet<EventId> = self.votes.keys().cloned().collect();
        targets.extend(self.summaries.keys().cloned());
        targets.into_iter().collect()
    }

    /// Cached summary, zeroed if unknown
    pub fn summary(&self, target: &EventId) -> ReportSummary {
        self.summaries
            .get(target)
            .cloned()
            .unwrap_or_else(|| ReportSummary::empty(target.clone()))
    }

    /// Trusted votes for one category from the cached summary
    pub fn trusted_count(&self, target: &EventId, category: &str) -> u32 {
        self.summaries
            .get(target)
            .and_then(|summary| summary.category(category))
            .map_or(0, |tally| tally.trusted)
    }

    /// Trusted reporters, newest first
    ///
    /// Without a category each reporter appears once with their newest vote.
    pub fn trusted_reporters(
        &self,
        target: &EventId,
        category: Option<&str>,
        ctx: &VoteContext<'_>,
    ) -> Vec<TrustedReporter> {
        let Some(votes) = self.votes.get(target) else {
            return Vec::new();
        };
        let mut reporters: Vec<TrustedReporter> = votes
            .iter()
            .filter(|(reporter, _)| ctx.weigh(reporter) == Weight::Trusted)
            .filter_map(|(reporter, by_category)| {
                let latest = match category {
                    Some(category) => by_category.get(category)?.created_at,
                    None => by_category.values().map(|rev| rev.created_at).max()?,
                };
                Some(TrustedReporter { pubkey: reporter.clone(), latest })
            })
            .collect();
        reporters.sort_by(|a, b| b.latest.cmp(&a.latest).then_with(|| a.pubkey.cmp(&b.pubkey)));
        reporters
    }

    /// Rebuild the summary of one target from its votes
    pub fn recompute(&mut self, target: &EventId, ctx: &VoteContext<'_>) -> Recomputed {
        let Some(votes) = self.votes.get(target).filter(|votes| !votes.is_empty()) else {
            self.summaries.remove(target);
            let crossings = self.track_top(target, None);
            return Recomputed { target: target.clone(), summary: None, crossings };
        };

        let mut categories: BTreeMap<String, CategoryTally> = BTreeMap::new();
        let mut total_trusted = 0;
        for (reporter, by_category) in votes {
            let weight = ctx.weigh(reporter);
            if weight == Weight::Excluded {
                continue;
            }
            for (category, revision) in by_category {
                let tally = categories.entry(category.clone()).or_default();
                tally.total += 1;
                tally.latest = tally.latest.max(revision.created_at);
                if weight == Weight::Trusted {
                    tally.trusted += 1;
                    total_trusted += 1;
                }
            }
        }

        let summary = ReportSummary {
            target: target.clone(),
            total_trusted,
            categories,
            updated_at: chrono::Utc::now().timestamp_millis(),
        };
        let top = summary
            .top_category()
            .map(|(category, tally)| (category.to_string(), tally.trusted));
        let crossings = self.track_top(target, top);
        self.summaries.insert(target.clone(), summary.clone());
        Recomputed { target: target.clone(), summary: Some(summary), crossings }
    }

    /// Rebuild every summary
    pub fn recompute_all(&mut self, ctx: &VoteContext<'_>) -> Vec<Recomputed> {
        self.targets()
            .iter()
            .map(|target| self.recompute(target, ctx))
            .collect()
    }

    /// Forget a target; clears any active side effects
    pub fn remove_target(&mut self, target: &EventId) -> Vec<ThresholdCrossing> {
        self.votes.remove(target);
        self.summaries.remove(target);
        self.track_top(target, None)
    }

    fn track_top(
        &mut self,
        target: &EventId,
        next: Option<(String, u32)>,
    ) -> Vec<ThresholdCrossing> {
        let previous = match &next {
            Some(top) => self.top.insert(target.clone(), top.clone()),
            None => self.top.remove(target),
        };
        let previous_count = previous.as_ref().map_or(0, |(_, count)| *count);
        let next_count = next.as_ref().map_or(0, |(_, count)| *count);
        let category = next
            .filter(|(_, count)| *count > 0)
            .or(previous)
            .map(|(category, _)| category)
            .unwrap_or_default();

        let mut crossings = Vec::new();
        let checks = [
            (
                self.autoplay_threshold,
                ThresholdAction::AutoplayBlockEnabled,
                ThresholdAction::AutoplayBlockCleared,
            ),
            (self.blur_threshold, ThresholdAction::BlurEnabled, ThresholdAction::BlurCleared),
        ];
        for (threshold, enabled, cleared) in checks {
            let was = ModerationConfig::reaches(threshold, previous_count);
            let now = ModerationConfig::reaches(threshold, next_count);
            if was == now {
                continue;
            }
            let action = if now { enabled } else { cleared };
            tracing::info!(
                event_id = %target,
                category = %category,
                trusted = next_count,
                action = ?action,
                "moderation threshold crossed"
            );
            crossings.push(ThresholdCrossing {
                target: target.clone(),
                category: category.clone(),
                trusted_count: next_count,
                action,
            });
        }
        crossings
    }
}
