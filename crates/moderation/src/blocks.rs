//! Personal block list seam
//!
//! The viewer's own block list is owned elsewhere (it is persisted and
//! published by the host application). The engine only asks whether a key is
//! blocked and listens for changes so it can recompute every summary.

use async_trait::async_trait;
use nostr_client::PubKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::broadcast;

/// Errors reported by a block list
#[derive(Debug, Error)]
pub enum BlockListError {
    /// The list for a viewer could not be loaded
    #[error("Failed to load block list for {viewer}: {reason}")]
    LoadFailed {
        /// Viewer whose list was requested
        viewer: String,
        /// Underlying failure
        reason: String,
    },
}

/// Result type for block list operations
pub type Result<T> = std::result::Result<T, BlockListError>;

/// What changed in the block list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockAction {
    /// A key was blocked
    Block,
    /// A key was unblocked
    Unblock,
    /// The list was reloaded wholesale
    Sync,
}

/// Block list change notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockChange {
    /// Kind of change
    pub action: BlockAction,
    /// Affected key; `None` for wholesale reloads
    pub target: Option<PubKey>,
}

/// The viewer's personal block list
#[async_trait]
pub trait UserBlockList: Send + Sync {
    /// Whether a key is currently blocked
    fn is_blocked(&self, key: &PubKey) -> bool;

    /// Make sure the list for `viewer` is resident
    async fn ensure_loaded(&self, viewer: &PubKey) -> Result<()>;

    /// Change notifications
    fn subscribe(&self) -> broadcast::Receiver<BlockChange>;

    /// Number of change notifications sent so far
    ///
    /// Bumped before each notification goes out, so a caller that observed a
    /// change also observes its revision.
    fn revision(&self) -> u64;
}

/// In-memory block list
pub struct InMemoryBlockList {
    blocked: RwLock<HashSet<PubKey>>,
    loaded_for: RwLock<Option<PubKey>>,
    changes_tx: broadcast::Sender<BlockChange>,
    revision: AtomicU64,
}

impl InMemoryBlockList {
    /// Create an empty block list
    pub fn new() -> Self {
        let (changes_tx, _) = broadcast::channel(64);
        Self {
            blocked: RwLock::new(HashSet::new()),
            loaded_for: RwLock::new(None),
            changes_tx,
            revision: AtomicU64::new(0),
        }
    }

    fn notify(&self, change: BlockChange) {
        self.revision.fetch_add(1, Ordering::SeqCst);
        let _ = self.changes_tx.send(change);
    }

    /// Block a key; returns `false` if it was already blocked
    pub fn block(&self, key: PubKey) -> bool {
        let inserted = self.blocked.write().insert(key.clone());
        if inserted {
            self.notify(BlockChange { action: BlockAction::Block, target: Some(key) });
        }
        inserted
    }

    /// Unblock a key; returns `false` if it was not blocked
    pub fn unblock(&self, key: &PubKey) -> bool {
        let removed = self.blocked.write().remove(key);
        if removed {
            self.notify(BlockChange { action: BlockAction::Unblock, target: Some(key.clone()) });
        }
        removed
    }

    /// Replace the whole list
    pub fn replace(&self, keys: impl IntoIterator<Item = PubKey>) {
        *self.blocked.write() = keys.into_iter().collect();
        self.notify(BlockChange { action: BlockAction::Sync, target: None });
    }

    /// Currently blocked keys
    pub fn blocked(&self) -> Vec<PubKey> {
        let mut keys: Vec<PubKey> = self.blocked.read().iter().cloned().collect();
        keys.sort();
        keys
    }

    /// Viewer the list was last loaded for
    pub fn loaded_for(&self) -> Option<PubKey> {
        self.loaded_for.read().clone()
    }
}

impl Default for InMemoryBlockList {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserBlockList for InMemoryBlockList {
    fn is_blocked(&self, key: &PubKey) -> bool {
        self.blocked.read().contains(key)
    }

    async fn ensure_loaded(&self, viewer: &PubKey) -> Result<()> {
        *self.loaded_for.write() = Some(viewer.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<BlockChange> {
        self.changes_tx.subscribe()
    }

    fn revision(&self) -> u64 {
        self.revision.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr_client::test_utils::pubkeys;

    #[tokio::test]
    async fn test_block_and_unblock_broadcast() {
        let list = InMemoryBlockList::new();
        let mut rx = list.subscribe();
        let alice = pubkeys::alice();

        assert!(list.block(alice.clone()));
        assert!(!list.block(alice.clone()));
        assert!(list.is_blocked(&alice));

        let change = rx.recv().await.unwrap();
        assert_eq!(change.action, BlockAction::Block);
        assert_eq!(change.target.as_ref(), Some(&alice));

        assert!(list.unblock(&alice));
        assert!(!list.unblock(&alice));
        assert_eq!(rx.recv().await.unwrap().action, BlockAction::Unblock);
        assert!(!list.is_blocked(&alice));
    }

    #[tokio::test]
    async fn test_revision_counts_sent_changes() {
        let list = InMemoryBlockList::new();
        assert_eq!(list.revision(), 0);

        list.block(pubkeys::alice());
        list.block(pubkeys::alice());
        assert_eq!(list.revision(), 1);

        list.unblock(&pubkeys::alice());
        list.unblock(&pubkeys::alice());
        list.replace([pubkeys::bob()]);
        assert_eq!(list.revision(), 3);
    }

    #[tokio::test]
    async fn test_replace_emits_sync() {
        let list = InMemoryBlockList::new();
        let mut rx = list.subscribe();
        list.replace([pubkeys::bob(), pubkeys::carol()]);

        let change = rx.recv().await.unwrap();
        assert_eq!(change, BlockChange { action: BlockAction::Sync, target: None });
        assert_eq!(list.blocked().len(), 2);
    }

    #[tokio::test]
    async fn test_ensure_loaded_records_viewer() {
        let list = InMemoryBlockList::default();
        list.ensure_loaded(&pubkeys::viewer()).await.unwrap();
        assert_eq!(list.loaded_for(), Some(pubkeys::viewer()));
    }
}
