//! Relay transport seam
//!
//! The moderation engine never talks to sockets itself. It consumes a
//! [`RelayTransport`] that can run one-shot backfill queries, open live
//! subscriptions and publish signed events. Each live subscription is an
//! owned [`Subscription`] handle; dropping it unsubscribes.

use crate::event::Event;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors reported by a relay transport
#[derive(Debug, Error)]
pub enum RelayError {
    /// Relay could not be reached
    #[error("Relay unreachable: {0}")]
    Unreachable(String),

    /// Query or publish timed out
    #[error("Relay timeout: {0}")]
    Timeout(String),

    /// Relay refused the request
    #[error("Relay rejected request: {0}")]
    Rejected(String),

    /// Connection pool has been shut down
    #[error("Transport closed")]
    Closed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Subscription filter (NIP-01 `REQ` filter)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    /// Author keys (hex)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authors: Vec<String>,
    /// Event kinds
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub kinds: Vec<u32>,
    /// Referenced event ids (`#e`)
    #[serde(rename = "#e", default, skip_serializing_if = "Vec::is_empty")]
    pub event_refs: Vec<String>,
    /// Referenced keys (`#p`)
    #[serde(rename = "#p", default, skip_serializing_if = "Vec::is_empty")]
    pub pubkey_refs: Vec<String>,
    /// Lower bound on `created_at`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
    /// Maximum number of stored events to return
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl Filter {
    /// Create an empty filter
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a kind
    pub fn kind(mut self, kind: u32) -> Self {
        self.kinds.push(kind);
        self
    }

    /// Add an author
    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.authors.push(author.into());
        self
    }

    /// Add a referenced event id
    pub fn event_ref(mut self, id: impl Into<String>) -> Self {
        self.event_refs.push(id.into());
        self
    }

    /// Add a referenced key
    pub fn pubkey_ref(mut self, key: impl Into<String>) -> Self {
        self.pubkey_refs.push(key.into());
        self
    }

    /// Set the lower time bound
    pub fn since(mut self, since: u64) -> Self {
        self.since = Some(since);
        self
    }

    /// Set the result limit
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether an event satisfies every populated constraint
    ///
    /// `limit` only bounds stored results and is not checked here.
    pub fn matches(&self, event: &Event) -> bool {
        if !self.kinds.is_empty() && !self.kinds.contains(&event.kind) {
            return false;
        }
        if !self.authors.is_empty()
            && !self.authors.iter().any(|a| a.eq_ignore_ascii_case(&event.pubkey))
        {
            return false;
        }
        if let Some(since) = self.since {
            if event.created_at < since {
                return false;
            }
        }
        if !self.event_refs.is_empty() && !references(event, "e", &self.event_refs) {
            return false;
        }
        if !self.pubkey_refs.is_empty() && !references(event, "p", &self.pubkey_refs) {
            return false;
        }
        true
    }
}

fn references(event: &Event, name: &str, wanted: &[String]) -> bool {
    event
        .tags_named(name)
        .filter_map(|tag| tag.value())
        .any(|value| wanted.iter().any(|w| w.eq_ignore_ascii_case(value)))
}

/// Per-relay result of a publish attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishOutcome {
    /// Relay URL
    pub relay: String,
    /// Whether the relay acknowledged with `OK true`
    pub accepted: bool,
    /// Relay-supplied rejection message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl PublishOutcome {
    /// Accepted outcome
    pub fn accepted(relay: impl Into<String>) -> Self {
        Self { relay: relay.into(), accepted: true, error: None }
    }

    /// Rejected outcome
    pub fn rejected(relay: impl Into<String>, error: impl Into<String>) -> Self {
        Self { relay: relay.into(), accepted: false, error: Some(error.into()) }
    }

    /// Number of accepting relays in a batch
    pub fn count_accepted(outcomes: &[PublishOutcome]) -> usize {
        outcomes.iter().filter(|o| o.accepted).count()
    }
}

/// Callback invoked for each event delivered on a subscription
pub type EventCallback = Arc<dyn Fn(Event) + Send + Sync>;

/// Callback invoked once stored events have been delivered (EOSE)
pub type EndOfStoredCallback = Arc<dyn Fn() + Send + Sync>;

/// Handlers attached to a live subscription
#[derive(Clone)]
pub struct SubscriptionCallbacks {
    /// Called for every event
    pub on_event: EventCallback,
    /// Called on end-of-stored-events
    pub on_end_of_stored: Option<EndOfStoredCallback>,
}

impl SubscriptionCallbacks {
    /// Create callbacks with an event handler only
    pub fn new(on_event: impl Fn(Event) + Send + Sync + 'static) -> Self {
        Self { on_event: Arc::new(on_event), on_end_of_stored: None }
    }

    /// Attach an end-of-stored-events handler
    pub fn with_end_of_stored(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_end_of_stored = Some(Arc::new(handler));
        self
    }
}

impl fmt::Debug for SubscriptionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionCallbacks")
            .field("on_end_of_stored", &self.on_end_of_stored.is_some())
            .finish_non_exhaustive()
    }
}

/// Owned live subscription
///
/// The handle exposes a single dispose capability. Calling
/// [`Subscription::unsubscribe`] or dropping the handle closes it exactly once.
pub struct Subscription {
    id: String,
    dispose: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    /// Wrap a transport-specific teardown
    pub fn new(id: impl Into<String>, dispose: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self { id: id.into(), dispose: Some(Box::new(dispose)) }
    }

    /// Transport-assigned subscription id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Close the subscription
    pub fn unsubscribe(mut self) {
        self.close();
    }

    fn close(&mut self) {
        if let Some(dispose) = self.dispose.take() {
            dispose();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("open", &self.dispose.is_some())
            .finish()
    }
}

/// Relay pool consumed by the moderation engine
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Relays used for queries and subscriptions
    fn read_relays(&self) -> Vec<String>;

    /// Relays used for publishing
    fn write_relays(&self) -> Vec<String>;

    /// One-shot backfill: stored events matching any filter
    async fn query_once(&self, relays: &[String], filters: &[Filter]) -> Result<Vec<Event>>;

    /// Open a live subscription
    fn subscribe(
        &self,
        relays: &[String],
        filters: &[Filter],
        callbacks: SubscriptionCallbacks,
    ) -> Result<Subscription>;

    /// Publish a signed event, returning one outcome per relay
    async fn publish(&self, relays: &[String], event: &Event) -> Result<Vec<PublishOutcome>>;
}
