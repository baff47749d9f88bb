//! Trust graph
//!
//! The trusted set is the viewer, every key in the viewer's newest contact
//! list, and the operator's trusted seeds. It is rebuilt wholesale whenever
//! any of those inputs change and every rebuild reports what entered and
//! left the set so callers can reconcile per-member subscriptions.

use crate::access::AccessSnapshot;
use crate::parse::ContactList;
use nostr_client::{PubKey, Revision};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Membership change produced by a rebuild
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrustDelta {
    /// Keys that entered the trusted set
    pub added: Vec<PubKey>,
    /// Keys that left the trusted set
    pub removed: Vec<PubKey>,
}

#[cfg(test)]
impl TrustDelta {
    fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Viewer contact entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactEntry {
    /// Hex key
    pub pubkey: PubKey,
    /// Bech32 key
    pub npub: Option<String>,
}

/// Viewer identity, contacts and trusted seeds
#[derive(Debug, Clone, Default)]
pub struct TrustGraph {
    viewer: Option<PubKey>,
    contacts: BTreeSet<PubKey>,
    contact_revision: Option<Revision>,
    seeds: BTreeSet<PubKey>,
    trusted: BTreeSet<PubKey>,
}

impl TrustGraph {
    /// Create an empty graph with no viewer
    pub fn new() -> Self {
        Self::default()
    }

    /// Current viewer
    pub fn viewer(&self) -> Option<&PubKey> {
        self.viewer.as_ref()
    }

    /// Switch viewer, dropping every per-viewer input
    pub fn set_viewer(&mut self, viewer: Option<PubKey>) -> TrustDelta {
        self.viewer = viewer;
        self.contacts.clear();
        self.contact_revision = None;
        self.rebuild()
    }

    /// Adopt a contact list
    ///
    /// Returns `None` when the list belongs to someone other than the viewer
    /// or does not supersede the list already adopted.
    pub fn apply_contacts(&mut self, list: ContactList) -> Option<TrustDelta> {
        if self.viewer.as_ref() != Some(&list.author) {
            return None;
        }
        if let Some(current) = &self.contact_revision {
            if !list.revision.supersedes(current) {
                return None;
            }
        }
        self.contacts = list.contacts;
        self.contact_revision = Some(list.revision);
        Some(self.rebuild())
    }

    /// Replace the trusted seeds; blacklisted seeds are dropped
    pub fn set_seeds(
        &mut self,
        seeds: impl IntoIterator<Item = PubKey>,
        access: &AccessSnapshot,
    ) -> TrustDelta {
        self.seeds = seeds.into_iter().filter(|seed| !access.is_blacklisted(seed)).collect();
        self.rebuild()
    }

    /// Whether a key is in the trusted set
    pub fn is_trusted(&self, key: &PubKey) -> bool {
        self.trusted.contains(key)
    }

    /// The trusted set
    pub fn trusted(&self) -> &BTreeSet<PubKey> {
        &self.trusted
    }

    #[cfg(test)]
    fn contacts(&self) -> &BTreeSet<PubKey> {
        &self.contacts
    }

    /// Position of the adopted contact list
    pub fn contact_revision(&self) -> Option<&Revision> {
        self.contact_revision.as_ref()
    }

    /// Whether trust (excluding the viewer) comes from seeds alone
    pub fn is_seed_only(&self) -> bool {
        !self.seeds.is_empty()
            && self
                .trusted
                .iter()
                .filter(|key| Some(*key) != self.viewer.as_ref())
                .all(|key| self.seeds.contains(key))
    }

    /// Contacts as display entries, optionally including the viewer
    pub fn contact_entries(&self, include_viewer: bool) -> Vec<ContactEntry> {
        let mut keys: Vec<&PubKey> = self.contacts.iter().collect();
        if include_viewer {
            if let Some(viewer) = &self.viewer {
                if !self.contacts.contains(viewer) {
                    keys.insert(0, viewer);
                }
            }
        } else {
            keys.retain(|key| Some(*key) != self.viewer.as_ref());
        }
        keys.into_iter()
            .map(|key| ContactEntry { pubkey: key.clone(), npub: key.to_npub() })
            .collect()
    }

    fn rebuild(&mut self) -> TrustDelta {
        let mut next: BTreeSet<PubKey> = self.contacts.union(&self.seeds).cloned().collect();
        if let Some(viewer) = &self.viewer {
            next.insert(viewer.clone());
        }
        let delta = TrustDelta {
            added: next.difference(&self.trusted).cloned().collect(),
            removed: self.trusted.difference(&next).cloned().collect(),
        };
        self.trusted = next;
        delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse;
    use nostr_client::test_utils::{events, pubkeys};

    fn contacts(author: &PubKey, keys: &[PubKey], at: u64) -> ContactList {
        parse::contact_list(&events::contact_list(author, keys, at)).unwrap()
    }

    #[test]
    fn test_viewer_is_always_trusted() {
        let mut graph = TrustGraph::new();
        let delta = graph.set_viewer(Some(pubkeys::viewer()));
        assert_eq!(delta.added, vec![pubkeys::viewer()]);
        assert!(graph.is_trusted(&pubkeys::viewer()));

        let delta = graph.apply_contacts(contacts(&pubkeys::viewer(), &[], 10)).unwrap();
        assert!(delta.is_empty());
        assert!(graph.is_trusted(&pubkeys::viewer()));
    }

    #[test]
    fn test_contact_list_replaces_wholesale() {
        let viewer = pubkeys::viewer();
        let mut graph = TrustGraph::new();
        graph.set_viewer(Some(viewer.clone()));

        let delta = graph
            .apply_contacts(contacts(&viewer, &[pubkeys::alice(), pubkeys::bob()], 10))
            .unwrap();
        assert_eq!(delta.added.len(), 2);

        let delta = graph
            .apply_contacts(contacts(&viewer, &[pubkeys::bob(), pubkeys::carol()], 20))
            .unwrap();
        assert_eq!(delta.added, vec![pubkeys::carol()]);
        assert_eq!(delta.removed, vec![pubkeys::alice()]);
        assert_eq!(graph.trusted().len(), 3);
    }

    #[test]
    fn test_stale_and_foreign_lists_ignored() {
        let viewer = pubkeys::viewer();
        let mut graph = TrustGraph::new();
        graph.set_viewer(Some(viewer.clone()));
        graph.apply_contacts(contacts(&viewer, &[pubkeys::alice()], 20)).unwrap();

        assert!(graph.apply_contacts(contacts(&viewer, &[pubkeys::bob()], 10)).is_none());
        assert!(graph
            .apply_contacts(contacts(&pubkeys::alice(), &[pubkeys::bob()], 30))
            .is_none());
        assert!(graph.is_trusted(&pubkeys::alice()));
        assert!(!graph.is_trusted(&pubkeys::bob()));
    }

    #[test]
    fn test_equal_timestamp_greater_id_wins() {
        let viewer = pubkeys::viewer();
        let mut graph = TrustGraph::new();
        graph.set_viewer(Some(viewer.clone()));

        let a = contacts(&viewer, &[pubkeys::alice()], 50);
        let b = contacts(&viewer, &[pubkeys::bob()], 50);
        let (low, high) = if a.revision < b.revision { (a, b) } else { (b, a) };
        let winner: Vec<PubKey> = high.contacts.iter().cloned().collect();

        graph.apply_contacts(high).unwrap();
        assert!(graph.apply_contacts(low).is_none());
        assert_eq!(graph.contacts().iter().cloned().collect::<Vec<_>>(), winner);
    }

    #[test]
    fn test_seeds_merge_and_blacklist() {
        let mut graph = TrustGraph::new();
        let access = AccessSnapshot::from_lists(Vec::<String>::new(), [pubkeys::stranger().as_str()]);

        let delta = graph.set_seeds([pubkeys::alice(), pubkeys::stranger()], &access);
        assert_eq!(delta.added, vec![pubkeys::alice()]);
        assert!(graph.is_seed_only());

        graph.set_viewer(Some(pubkeys::viewer()));
        assert!(graph.is_seed_only());

        graph.apply_contacts(contacts(&pubkeys::viewer(), &[pubkeys::bob()], 1)).unwrap();
        assert!(!graph.is_seed_only());
        assert!(graph.is_trusted(&pubkeys::alice()));
    }

    #[test]
    fn test_set_viewer_clears_contacts() {
        let mut graph = TrustGraph::new();
        graph.set_viewer(Some(pubkeys::viewer()));
        graph.apply_contacts(contacts(&pubkeys::viewer(), &[pubkeys::alice()], 1)).unwrap();

        let delta = graph.set_viewer(None);
        assert_eq!(delta.removed.len(), 2);
        assert!(graph.trusted().is_empty());
        assert!(graph.contact_revision().is_none());
    }

    #[test]
    fn test_contact_entries() {
        let viewer = pubkeys::viewer();
        let mut graph = TrustGraph::new();
        graph.set_viewer(Some(viewer.clone()));
        graph.apply_contacts(contacts(&viewer, &[pubkeys::alice()], 1)).unwrap();

        let without = graph.contact_entries(false);
        assert_eq!(without.len(), 1);
        assert!(without[0].npub.as_deref().unwrap().starts_with("npub1"));

        let with = graph.contact_entries(true);
        assert_eq!(with[0].pubkey, viewer);
        assert_eq!(with.len(), 2);
    }
}
