//! Keyed registry of live subscriptions
//!
//! Every key (a trusted owner, a watched target) gets at most one entry.
//! An entry is reserved with a token before its backfill starts and the live
//! handle is attached once the backfill completes. Results for a token that
//! is no longer current are discarded, so a key removed (or removed and
//! re-added) while its backfill is in flight never resurrects a stale
//! subscription.

use nostr_client::Subscription;
use std::collections::{BTreeMap, BTreeSet};

/// Identifies one reservation of a key
pub type Token = u64;

#[derive(Debug)]
struct Entry {
    token: Token,
    handle: Option<Subscription>,
}

/// Result of reconciling the registry against a wanted key set
#[derive(Debug)]
pub struct Reconciled<K> {
    /// Newly reserved keys with their tokens
    pub added: Vec<(K, Token)>,
    /// Keys whose entries were dropped
    pub removed: Vec<K>,
}

/// Map of key → live subscription
#[derive(Debug)]
pub struct SubscriptionRegistry<K> {
    entries: BTreeMap<K, Entry>,
    next_token: Token,
}

impl<K: Ord + Clone> SubscriptionRegistry<K> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self { entries: BTreeMap::new(), next_token: 0 }
    }

    /// Reserve a key; `None` if it already has an entry
    pub fn reserve(&mut self, key: K) -> Option<Token> {
        if self.entries.contains_key(&key) {
            return None;
        }
        self.next_token += 1;
        let token = self.next_token;
        self.entries.insert(key, Entry { token, handle: None });
        Some(token)
    }

    /// Whether `token` is the current reservation of `key`
    pub fn is_current(&self, key: &K, token: Token) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.token == token)
    }

    /// Attach a live handle to a current reservation
    ///
    /// A handle for a stale token is handed back so the caller can close it
    /// outside any lock.
    pub fn attach(&mut self, key: &K, token: Token, handle: Subscription) -> Option<Subscription> {
        match self.entries.get_mut(key) {
            Some(entry) if entry.token == token && entry.handle.is_none() => {
                entry.handle = Some(handle);
                None
            }
            _ => Some(handle),
        }
    }

    /// Remove a key, returning its handle (if any) for disposal
    pub fn remove(&mut self, key: &K) -> Option<Option<Subscription>> {
        self.entries.remove(key).map(|entry| entry.handle)
    }

    /// Make the key set equal `wanted`
    ///
    /// Removed handles are returned through `closed` so they can be disposed
    /// of after the caller releases its locks.
    pub fn reconcile(
        &mut self,
        wanted: &BTreeSet<K>,
        closed: &mut Vec<Subscription>,
    ) -> Reconciled<K> {
        let removed: Vec<K> =
            self.entries.keys().filter(|key| !wanted.contains(*key)).cloned().collect();
        for key in &removed {
            if let Some(Some(handle)) = self.remove(key) {
                closed.push(handle);
            }
        }
        let added = wanted
            .iter()
            .filter_map(|key| self.reserve(key.clone()).map(|token| (key.clone(), token)))
            .collect();
        Reconciled { added, removed }
    }

    #[cfg(test)]
    fn drain(&mut self) -> Vec<Subscription> {
        std::mem::take(&mut self.entries)
            .into_values()
            .filter_map(|entry| entry.handle)
            .collect()
    }

    /// Whether a key has an entry
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    #[cfg(test)]
    fn is_live(&self, key: &K) -> bool {
        self.entries.get(key).is_some_and(|entry| entry.handle.is_some())
    }

    /// Registered keys in order
    pub fn keys(&self) -> Vec<K> {
        self.entries.keys().cloned().collect()
    }

    #[cfg(test)]
    fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Ord + Clone> Default for SubscriptionRegistry<K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn handle(closed: &Arc<AtomicUsize>) -> Subscription {
        let closed = Arc::clone(closed);
        Subscription::new("test", move || {
            closed.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_reserve_is_exclusive() {
        let mut registry = SubscriptionRegistry::new();
        let token = registry.reserve("a").unwrap();
        assert!(registry.reserve("a").is_none());
        assert!(registry.is_current(&"a", token));
        assert!(!registry.is_live(&"a"));
    }

    #[test]
    fn test_reconcile_is_set_difference() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut registry = SubscriptionRegistry::new();
        let token = registry.reserve("a").unwrap();
        assert!(registry.attach(&"a", token, handle(&closed)).is_none());
        registry.reserve("b");

        let wanted: BTreeSet<&str> = ["b", "c"].into_iter().collect();
        let mut to_close = Vec::new();
        let result = registry.reconcile(&wanted, &mut to_close);

        assert_eq!(result.removed, vec!["a"]);
        assert_eq!(result.added.len(), 1);
        assert_eq!(result.added[0].0, "c");
        assert_eq!(registry.keys(), vec!["b", "c"]);

        assert_eq!(closed.load(Ordering::SeqCst), 0);
        drop(to_close);
        assert_eq!(closed.load(Ordering::SeqCst), 1);

        let again = registry.reconcile(&wanted, &mut Vec::new());
        assert!(again.added.is_empty() && again.removed.is_empty());
    }

    #[test]
    fn test_stale_token_handle_is_returned() {
        let closed = Arc::new(AtomicUsize::new(0));
        let mut registry = SubscriptionRegistry::new();
        let old = registry.reserve("a").unwrap();
        registry.remove(&"a");
        let new = registry.reserve("a").unwrap();
        assert_ne!(old, new);

        let rejected = registry.attach(&"a", old, handle(&closed));
        assert!(rejected.is_some());
        drop(rejected);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(!registry.is_live(&"a"));

        assert!(registry.attach(&"a", new, handle(&closed)).is_none());
        assert!(registry.is_live(&"a"));
        assert_eq!(registry.drain().len(), 1);
        assert!(registry.is_empty());
    }
}
