//! Owner handle for one relay-client instance.

use crate::cache::ConcurrentEventCache;
use crate::clock::{Clock, SystemClock};
use crate::config::ClientConfig;
use crate::error::{ClientError, Result};
use crate::filter::RelayFilter;
use crate::pool::{ClientEvent, RelayPool};
use crate::relay::{RelayConnection, RelayListener};
use crate::socket::{TungsteniteSocketBuilder, WebSocketBuilder};
use crate::subscription::{Subscription, SubscriptionRegistry};
use nostr::{Event, EventSigner, auth_template, is_auth_event, is_auth_required_error};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::{Instant, timeout, timeout_at};
use tracing::{debug, info, warn};

/// Stores every received event in the shared cache.
struct CacheListener {
    cache: Arc<ConcurrentEventCache<String, Event>>,
}

impl RelayListener for CacheListener {
    fn on_event(&self, _relay: &RelayConnection, _subscription_id: &str, event: &Event, _after_eose: bool) {
        self.cache.get_or_create(event.id.clone(), |_| event.clone());
    }
}

/// One relay's answer to a published event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfirmation {
    pub relay_url: String,
    pub event_id: String,
    pub accepted: bool,
    pub message: String,
}

/// A relay client: registry, pool and cache with an explicit lifecycle.
///
/// Nothing is global. Several clients can run side by side, each with its
/// own relays and cache.
pub struct NostrClient {
    config: ClientConfig,
    clock: Arc<dyn Clock>,
    registry: Arc<SubscriptionRegistry>,
    pool: RelayPool,
    cache: Arc<ConcurrentEventCache<String, Event>>,
    closed: AtomicBool,
}

impl NostrClient {
    /// Wire a client. No relay is contacted until [`open`](Self::open).
    pub fn new(
        config: ClientConfig,
        socket_builder: Arc<dyn WebSocketBuilder>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(SubscriptionRegistry::new(Arc::clone(&clock)));
        let pool = RelayPool::new(
            config.relay_config(),
            socket_builder,
            Arc::clone(&clock),
            Arc::clone(&registry),
            config.event_channel_capacity,
        );
        let cache = Arc::new(ConcurrentEventCache::new());
        // The cache must hold an event before the broadcast announces it.
        if config.cache_events {
            pool.add_listener_first(Arc::new(CacheListener {
                cache: Arc::clone(&cache),
            }));
        }

        Ok(Self {
            config,
            clock,
            registry,
            pool,
            cache,
            closed: AtomicBool::new(false),
        })
    }

    /// Client on real sockets and the system clock.
    pub fn with_config(config: ClientConfig) -> Result<Self> {
        let builder = TungsteniteSocketBuilder::new(config.connect_timeout());
        Self::new(config, Arc::new(builder), Arc::new(SystemClock))
    }

    /// Add the configured relays and connect them.
    pub fn open(&self) -> Result<()> {
        self.ensure_open()?;
        info!(relays = self.config.relays.len(), "opening client");
        self.pool
            .add_all_relays(self.config.relays.iter().map(String::as_str))?;
        self.pool.connect_all();
        Ok(())
    }

    /// Disconnect every relay. Later calls fail with [`ClientError::Closed`].
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("closing client");
        self.pool.disconnect_all();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Add one more relay and connect it.
    pub fn add_relay(&self, url: &str) -> Result<Arc<RelayConnection>> {
        self.ensure_open()?;
        let relay = self.pool.add_relay(url)?;
        relay.connect_if_disconnected();
        Ok(relay)
    }

    pub fn remove_relay(&self, url: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.pool.remove_relay(url))
    }

    /// Start a subscription on every relay. Returns its id.
    pub fn subscribe(&self, filters: Vec<RelayFilter>) -> Result<String> {
        self.ensure_open()?;
        Ok(self.registry.new_subscription(filters))
    }

    pub fn subscribe_with_id(&self, id: &str, filters: Vec<RelayFilter>) -> Result<()> {
        self.ensure_open()?;
        self.registry.subscribe_with_id(id, filters)
    }

    pub fn update_filters(&self, id: &str, filters: Vec<RelayFilter>) -> Result<()> {
        self.ensure_open()?;
        self.registry.update_filters(id, filters)
    }

    /// Returns false if `id` was not live.
    pub fn dismiss_subscription(&self, id: &str) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.registry.dismiss_subscription(id))
    }

    pub fn subscriptions(&self) -> Vec<Subscription> {
        self.registry.all_subscriptions()
    }

    /// Ask every relay for a count of matching events (NIP-45).
    pub fn count(&self, filters: Vec<RelayFilter>) -> Result<String> {
        self.ensure_open()?;
        let id = crate::subscription::generate_subscription_id();
        self.pool.send_count(&id, &filters);
        Ok(id)
    }

    /// Queue a signed event on every relay.
    pub fn send(&self, event: Event) -> Result<()> {
        self.ensure_open()?;
        debug!(event_id = %event.id, "sending event");
        self.pool.send(&event);
        Ok(())
    }

    /// Send `event` to every relay and collect their OK answers.
    ///
    /// Waits until every writable relay that was available at send time has
    /// answered or dropped its socket, or until `wait` runs out. An
    /// `auth-required` rejection is recorded and the relay stays pending until
    /// the retried send is answered. On timeout the answers gathered so far
    /// are returned.
    pub async fn send_and_wait(&self, event: Event, wait: Duration) -> Result<Vec<PublishConfirmation>> {
        self.ensure_open()?;
        let mut rx = self.pool.subscribe();
        let auth = is_auth_event(&event);
        let mut pending: HashSet<String> = self
            .pool
            .available_relays()
            .into_iter()
            .filter(|url| self.pool.relay(url).is_some_and(|relay| auth || relay.write()))
            .collect();
        self.pool.send(&event);

        let deadline = Instant::now() + wait;
        let mut confirmations = Vec::new();
        while !pending.is_empty() {
            let Ok(received) = timeout_at(deadline, rx.recv()).await else {
                debug!(event_id = %event.id, pending = pending.len(), "gave up waiting for OK");
                break;
            };
            match received {
                Ok(ClientEvent::SendResponse {
                    relay_url,
                    event_id,
                    success,
                    message,
                }) if event_id == event.id => {
                    if success || !is_auth_required_error(&message) {
                        pending.remove(&relay_url);
                    }
                    confirmations.push(PublishConfirmation {
                        relay_url,
                        event_id,
                        accepted: success,
                        message,
                    });
                }
                Ok(ClientEvent::Disconnected { relay_url }) => {
                    pending.remove(&relay_url);
                }
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event channel lagged while waiting for OK");
                }
                Err(RecvError::Closed) => break,
            }
        }
        Ok(confirmations)
    }

    /// Subscribe, return the first matching event, and close the subscription.
    ///
    /// Returns `None` if nothing arrives within `wait`.
    pub async fn fetch_first_event(&self, filters: Vec<RelayFilter>, wait: Duration) -> Result<Option<Event>> {
        self.ensure_open()?;
        let mut rx = self.pool.subscribe();
        let id = self.registry.new_subscription(filters);

        let first = timeout(wait, async {
            loop {
                match rx.recv().await {
                    Ok(ClientEvent::Event {
                        subscription_id,
                        event,
                        ..
                    }) if subscription_id == id => return Some(event),
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, subscription_id = %id, "event channel lagged");
                    }
                    Err(RecvError::Closed) => return None,
                }
            }
        })
        .await
        .ok()
        .flatten();

        self.registry.dismiss_subscription(&id);
        Ok(first)
    }

    /// Queue a signed event on the listed relays.
    pub fn send_to(&self, event: Event, relay_urls: &[String]) -> Result<()> {
        self.ensure_open()?;
        self.pool.send_to(&event, relay_urls)
    }

    /// Answer an AUTH challenge from `relay_url`, returning the signed event.
    pub fn authenticate(&self, relay_url: &str, challenge: &str, signer: &dyn EventSigner) -> Result<Event> {
        self.ensure_open()?;
        let relay = self
            .pool
            .relay(relay_url)
            .ok_or_else(|| ClientError::UnknownRelay(relay_url.to_string()))?;
        let event = signer.sign(auth_template(relay_url, challenge, self.clock.now()))?;
        relay.send(event.clone());
        Ok(event)
    }

    /// New receiver for client events.
    pub fn events(&self) -> broadcast::Receiver<ClientEvent> {
        self.pool.subscribe()
    }

    /// Events received so far, keyed by id.
    pub fn cache(&self) -> Arc<ConcurrentEventCache<String, Event>> {
        Arc::clone(&self.cache)
    }

    pub fn pool(&self) -> &RelayPool {
        &self.pool
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(ClientError::Closed)
        } else {
            Ok(())
        }
    }
}

impl Drop for NostrClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for NostrClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NostrClient")
            .field("pool", &self.pool)
            .field("subscriptions", &self.registry.len())
            .field("cached_events", &self.cache.len())
            .field("closed", &self.is_closed())
            .finish()
    }
}
