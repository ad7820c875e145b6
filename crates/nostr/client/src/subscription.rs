//! Subscription management across relays.
//!
//! The [`SubscriptionRegistry`] is the single source of truth for which
//! subscriptions are live. Relays pull from it whenever they become ready
//! or authenticate; the registry pushes to relays when filters change.

use crate::clock::Clock;
use crate::error::{ClientError, Result};
use crate::filter::{Filter, RelayFilter};
use crate::relay::RelayConnection;
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

/// Generate a unique subscription ID.
pub fn generate_subscription_id() -> String {
    Uuid::new_v4().to_string()[..8].to_string()
}

/// Builder for creating subscription filters.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionBuilder {
    filters: Vec<RelayFilter>,
}

impl SubscriptionBuilder {
    /// Create a new subscription builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a filter to the subscription.
    pub fn filter(mut self, filter: impl Into<RelayFilter>) -> Self {
        self.filters.push(filter.into());
        self
    }

    /// Add a filter for specific event kinds.
    pub fn kinds(self, kinds: impl IntoIterator<Item = u16>) -> Self {
        self.filter(Filter::new().kinds(kinds))
    }

    /// Add a filter for events from specific authors.
    pub fn authors(self, authors: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filter(Filter::new().authors(authors))
    }

    /// Add a filter for specific event IDs.
    pub fn ids(self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.filter(Filter::new().ids(ids))
    }

    /// Add a filter for replies to an event.
    pub fn replies_to(self, event_id: impl Into<String>) -> Self {
        self.filter(Filter::new().kinds([nostr::KIND_SHORT_TEXT_NOTE]).event_refs([event_id]))
    }

    /// Build the filters.
    pub fn build(self) -> Vec<RelayFilter> {
        self.filters
    }
}

/// A live subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscription {
    pub id: String,
    pub filters: Vec<RelayFilter>,
    /// Relays that have finished sending stored events
    pub after_eose: HashMap<String, bool>,
    /// Unix time the subscription was created
    pub created_at: u64,
}

impl Subscription {
    pub fn is_after_eose(&self, relay_url: &str) -> bool {
        self.after_eose.get(relay_url).copied().unwrap_or(false)
    }
}

/// Live subscriptions plus the relays they are broadcast to.
pub struct SubscriptionRegistry {
    subscriptions: RwLock<IndexMap<String, Subscription>>,
    relays: RwLock<Vec<Weak<RelayConnection>>>,
    clock: Arc<dyn Clock>,
}

impl SubscriptionRegistry {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            subscriptions: RwLock::new(IndexMap::new()),
            relays: RwLock::new(Vec::new()),
            clock,
        }
    }

    /// Register a relay for broadcasts. The registry only holds it weakly.
    pub fn attach(&self, relay: &Arc<RelayConnection>) {
        let mut relays = self.relays.write();
        relays.retain(|r| r.strong_count() > 0);
        if !relays
            .iter()
            .any(|r| r.upgrade().is_some_and(|r| Arc::ptr_eq(&r, relay)))
        {
            relays.push(Arc::downgrade(relay));
        }
    }

    /// Stop broadcasting to the relay at `url`.
    pub fn detach(&self, url: &str) {
        self.relays
            .write()
            .retain(|r| r.upgrade().is_some_and(|r| r.url() != url));
    }

    /// Relays still alive.
    pub fn relays(&self) -> Vec<Arc<RelayConnection>> {
        self.relays.read().iter().filter_map(Weak::upgrade).collect()
    }

    /// Create a subscription with a random id and send it to every relay.
    pub fn new_subscription(&self, filters: Vec<RelayFilter>) -> String {
        loop {
            let id = generate_subscription_id();
            if self.subscribe_with_id(&id, filters.clone()).is_ok() {
                return id;
            }
        }
    }

    /// Create a subscription with a caller-chosen id and send it to every relay.
    pub fn subscribe_with_id(&self, id: &str, filters: Vec<RelayFilter>) -> Result<()> {
        {
            let mut subscriptions = self.subscriptions.write();
            if subscriptions.contains_key(id) {
                return Err(ClientError::DuplicateSubscription(id.to_string()));
            }
            subscriptions.insert(
                id.to_string(),
                Subscription {
                    id: id.to_string(),
                    filters: filters.clone(),
                    after_eose: HashMap::new(),
                    created_at: self.clock.now(),
                },
            );
        }

        debug!(subscription_id = %id, filters = filters.len(), "subscription created");
        for relay in self.relays() {
            relay.send_filter(id, &filters);
        }
        Ok(())
    }

    /// Replace a subscription's filters and re-send all filters to all relays.
    pub fn update_filters(&self, id: &str, filters: Vec<RelayFilter>) -> Result<()> {
        {
            let mut subscriptions = self.subscriptions.write();
            let subscription = subscriptions
                .get_mut(id)
                .ok_or_else(|| ClientError::UnknownSubscription(id.to_string()))?;
            subscription.filters = filters;
        }
        self.renew_filters();
        Ok(())
    }

    /// Remove a subscription and CLOSE it on every relay.
    ///
    /// Returns false if no such subscription was live.
    pub fn dismiss_subscription(&self, id: &str) -> bool {
        if self.subscriptions.write().shift_remove(id).is_none() {
            return false;
        }
        debug!(subscription_id = %id, "subscription dismissed");
        for relay in self.relays() {
            relay.close(id);
        }
        true
    }

    /// Ask every relay to re-send every live subscription.
    pub fn renew_filters(&self) {
        for relay in self.relays() {
            relay.renew_filters();
        }
    }

    pub fn subscription(&self, id: &str) -> Option<Subscription> {
        self.subscriptions.read().get(id).cloned()
    }

    /// Snapshot of live subscriptions in creation order.
    pub fn all_subscriptions(&self) -> Vec<Subscription> {
        self.subscriptions.read().values().cloned().collect()
    }

    pub fn is_active(&self, id: &str) -> bool {
        self.subscriptions.read().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.subscriptions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.read().is_empty()
    }

    /// Record EOSE for `id` on `relay_url`.
    pub fn mark_eose(&self, id: &str, relay_url: &str) {
        if let Some(subscription) = self.subscriptions.write().get_mut(id) {
            subscription.after_eose.insert(relay_url.to_string(), true);
        }
    }

    /// Forget EOSE for `id` on `relay_url` (a fresh REQ was sent).
    pub fn clear_eose(&self, id: &str, relay_url: &str) {
        if let Some(subscription) = self.subscriptions.write().get_mut(id) {
            subscription.after_eose.insert(relay_url.to_string(), false);
        }
    }

    pub fn is_after_eose(&self, id: &str, relay_url: &str) -> bool {
        self.subscriptions
            .read()
            .get(id)
            .is_some_and(|s| s.is_after_eose(relay_url))
    }

    /// Whether every relay in `relay_urls` has sent EOSE for `id`.
    pub fn is_after_eose_everywhere<'a>(&self, id: &str, relay_urls: impl IntoIterator<Item = &'a str>) -> bool {
        let subscriptions = self.subscriptions.read();
        let Some(subscription) = subscriptions.get(id) else {
            return false;
        };
        relay_urls.into_iter().all(|url| subscription.is_after_eose(url))
    }

    /// Forget EOSE for every subscription on `relay_url`.
    pub fn reset_eose_for(&self, relay_url: &str) {
        for subscription in self.subscriptions.write().values_mut() {
            subscription.after_eose.remove(relay_url);
        }
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("subscriptions", &self.len())
            .field("relays", &self.relays.read().len())
            .finish()
    }
}
