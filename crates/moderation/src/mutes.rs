//! Mute aggregation
//!
//! Each trusted owner publishes one replaceable mute list. The index keeps
//! the newest list per owner and a reverse map from muted author to the
//! owners muting them. An author has a reverse entry exactly when at least
//! one owner currently mutes them.
//!
//! Mute lists older than the configured window stop counting. Expired muters
//! are pruned lazily when the reverse map is read.

use crate::parse::MuteList;
use nostr_client::{PubKey, Revision};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Outcome of offering a mute list to the index
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MuteIngest {
    /// The list replaced the owner's previous list
    Applied {
        /// Authors newly muted by the owner
        added: Vec<PubKey>,
        /// Authors no longer muted by the owner
        removed: Vec<PubKey>,
    },
    /// The owner already has this list or a newer one
    Stale,
}

/// Trusted mute totals for one author
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedMuteCounts {
    /// Number of trusted muters
    pub total: usize,
    /// Muters per category, for entries that carry one
    pub categories: BTreeMap<String, usize>,
}

#[derive(Debug, Clone)]
struct OwnerList {
    entries: BTreeMap<PubKey, Option<String>>,
    revision: Revision,
}

/// Newest mute list per owner plus the author → muters reverse index
#[derive(Debug, Default)]
pub struct MuteIndex {
    window_secs: Option<u64>,
    lists: HashMap<PubKey, OwnerList>,
    muted_by: HashMap<PubKey, BTreeMap<PubKey, u64>>,
}

impl MuteIndex {
    /// Create an empty index; lists older than `window_secs` stop counting
    pub fn new(window_secs: Option<u64>) -> Self {
        Self { window_secs, ..Self::default() }
    }

    /// Replace an owner's list if the offered one is strictly newer
    pub fn ingest(&mut self, list: MuteList, now: u64) -> MuteIngest {
        if let Some(current) = self.lists.get(&list.owner) {
            if !list.revision.supersedes(&current.revision) {
                return MuteIngest::Stale;
            }
        }

        let previous = self
            .lists
            .get(&list.owner)
            .map(|current| current.entries.clone())
            .unwrap_or_default();
        let removed: Vec<PubKey> =
            previous.keys().filter(|author| !list.entries.contains_key(*author)).cloned().collect();
        let added: Vec<PubKey> =
            list.entries.keys().filter(|author| !previous.contains_key(*author)).cloned().collect();

        for author in &removed {
            self.drop_muter(author, &list.owner);
        }
        let created_at = list.revision.created_at;
        if !self.is_expired(created_at, now) {
            for author in list.entries.keys() {
                self.muted_by
                    .entry(author.clone())
                    .or_default()
                    .insert(list.owner.clone(), created_at);
            }
        } else {
            for author in list.entries.keys() {
                self.drop_muter(author, &list.owner);
            }
        }

        self.lists
            .insert(list.owner, OwnerList { entries: list.entries, revision: list.revision });
        MuteIngest::Applied { added, removed }
    }

    /// Remove everything an owner contributed
    ///
    /// Returns `true` when the owner had a list.
    pub fn purge_owner(&mut self, owner: &PubKey) -> bool {
        let Some(list) = self.lists.remove(owner) else {
            return false;
        };
        for author in list.entries.keys() {
            self.drop_muter(author, owner);
        }
        true
    }

    /// Trusted owners muting `author`, sorted
    pub fn muters_of(&mut self, author: &PubKey, now: u64) -> Vec<PubKey> {
        self.prune(author, now);
        self.muted_by
            .get(author)
            .map(|muters| muters.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether any trusted owner mutes `author`
    pub fn is_muted(&mut self, author: &PubKey, now: u64) -> bool {
        self.prune(author, now);
        self.muted_by.contains_key(author)
    }

    /// Muter totals and per-category counts for `author`
    pub fn counts(&mut self, author: &PubKey, now: u64) -> TrustedMuteCounts {
        self.prune(author, now);
        let mut counts = TrustedMuteCounts::default();
        let Some(muters) = self.muted_by.get(author) else {
            return counts;
        };
        counts.total = muters.len();
        for owner in muters.keys() {
            let category = self
                .lists
                .get(owner)
                .and_then(|list| list.entries.get(author))
                .and_then(Clone::clone);
            if let Some(category) = category {
                *counts.categories.entry(category).or_default() += 1;
            }
        }
        counts
    }

    /// Whether `owner`'s own list names `author`, regardless of age
    pub fn owner_mutes(&self, owner: &PubKey, author: &PubKey) -> bool {
        self.lists.get(owner).is_some_and(|list| list.entries.contains_key(author))
    }

    /// Authors on `owner`'s list
    pub fn list_of(&self, owner: &PubKey) -> Vec<PubKey> {
        self.lists
            .get(owner)
            .map(|list| list.entries.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Position of `owner`'s stored list
    pub fn revision_of(&self, owner: &PubKey) -> Option<&Revision> {
        self.lists.get(owner).map(|list| &list.revision)
    }

    /// Number of authors with at least one muter
    pub fn muted_author_count(&self) -> usize {
        self.muted_by.len()
    }

    /// Whether a reverse entry exists for `author` (expired muters included)
    pub fn has_entry(&self, author: &PubKey) -> bool {
        self.muted_by.contains_key(author)
    }

    fn is_expired(&self, created_at: u64, now: u64) -> bool {
        self.window_secs
            .is_some_and(|window| created_at < now.saturating_sub(window))
    }

    fn prune(&mut self, author: &PubKey, now: u64) {
        let Some(window) = self.window_secs else {
            return;
        };
        let cutoff = now.saturating_sub(window);
        let emptied = match self.muted_by.get_mut(author) {
            Some(muters) => {
                muters.retain(|_, created_at| *created_at >= cutoff);
                muters.is_empty()
            }
            None => false,
        };
        if emptied {
            tracing::trace!(author = %author, "expired trusted mutes pruned");
            self.muted_by.remove(author);
        }
    }

    fn drop_muter(&mut self, author: &PubKey, owner: &PubKey) {
        let emptied = match self.muted_by.get_mut(author) {
            Some(muters) => {
                muters.remove(owner);
                muters.is_empty()
            }
            None => false,
        };
        if emptied {
            self.muted_by.remove(author);
        }
    }
}
