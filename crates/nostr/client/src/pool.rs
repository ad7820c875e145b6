//! Relay pool for managing connections to multiple Nostr relays.
//!
//! The pool owns one [`RelayConnection`] per URL and fans every relay
//! callback into a broadcast channel of [`ClientEvent`]s.

use crate::cache::ConcurrentEventCache;
use crate::clock::Clock;
use crate::config::RelayConfig;
use crate::error::{ClientError, RelayError, Result};
use crate::filter::{FeedType, RelayFilter};
use crate::relay::{RelayConnection, RelayListener, RelayState};
use crate::socket::WebSocketBuilder;
use crate::subscription::SubscriptionRegistry;
use nostr::Event;
use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Events emitted by the relay pool.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    /// A relay finished its handshake
    Connected { relay_url: String },
    /// A relay socket went away
    Disconnected { relay_url: String },
    /// An event was received from a relay
    Event {
        relay_url: String,
        subscription_id: String,
        event: Event,
        after_eose: bool,
    },
    /// EOSE received for a subscription on a relay
    Eose {
        relay_url: String,
        subscription_id: String,
    },
    /// Every ready relay has sent EOSE for a subscription
    AllEose { subscription_id: String },
    /// OK response for a published event
    SendResponse {
        relay_url: String,
        event_id: String,
        success: bool,
        message: String,
    },
    /// Relay asked for authentication
    Auth { relay_url: String, challenge: String },
    /// Notice from a relay
    Notice { relay_url: String, message: String },
    /// NOTIFY from a relay
    Notify { relay_url: String, message: String },
    /// Relay closed a subscription
    Closed {
        relay_url: String,
        subscription_id: String,
        message: String,
    },
    /// Non-fatal relay or transport error
    Error { relay_url: String, error: RelayError },
}

/// Forwards relay callbacks into the pool channel.
struct PoolListener {
    events_tx: broadcast::Sender<ClientEvent>,
    registry: Arc<SubscriptionRegistry>,
}

impl PoolListener {
    fn emit(&self, event: ClientEvent) {
        // No receivers is not an error.
        let _ = self.events_tx.send(event);
    }
}

impl RelayListener for PoolListener {
    fn on_event(&self, relay: &RelayConnection, subscription_id: &str, event: &Event, after_eose: bool) {
        self.emit(ClientEvent::Event {
            relay_url: relay.url().to_string(),
            subscription_id: subscription_id.to_string(),
            event: event.clone(),
            after_eose,
        });
    }

    fn on_eose(&self, relay: &RelayConnection, subscription_id: &str) {
        self.emit(ClientEvent::Eose {
            relay_url: relay.url().to_string(),
            subscription_id: subscription_id.to_string(),
        });

        let ready: Vec<Arc<RelayConnection>> = self
            .registry
            .relays()
            .into_iter()
            .filter(|r| r.is_ready() && r.read())
            .collect();
        let all_eose = self
            .registry
            .is_after_eose_everywhere(subscription_id, ready.iter().map(|r| r.url()));
        if all_eose {
            debug!(subscription_id = %subscription_id, "all relays sent EOSE");
            self.emit(ClientEvent::AllEose {
                subscription_id: subscription_id.to_string(),
            });
        }
    }

    fn on_error(&self, relay: &RelayConnection, _subscription_id: &str, error: &RelayError) {
        let relay_url = relay.url().to_string();
        match error {
            RelayError::Notice(message) => self.emit(ClientEvent::Notice {
                relay_url,
                message: message.clone(),
            }),
            other => self.emit(ClientEvent::Error {
                relay_url,
                error: other.clone(),
            }),
        }
    }

    fn on_auth(&self, relay: &RelayConnection, challenge: &str) {
        self.emit(ClientEvent::Auth {
            relay_url: relay.url().to_string(),
            challenge: challenge.to_string(),
        });
    }

    fn on_relay_state_change(&self, relay: &RelayConnection, state: &RelayState) {
        let relay_url = relay.url().to_string();
        match state {
            RelayState::Connected => self.emit(ClientEvent::Connected { relay_url }),
            RelayState::Disconnected => self.emit(ClientEvent::Disconnected { relay_url }),
            RelayState::Disconnecting | RelayState::Eose(_) => {}
        }
    }

    fn on_send_response(&self, relay: &RelayConnection, event_id: &str, success: bool, message: &str) {
        self.emit(ClientEvent::SendResponse {
            relay_url: relay.url().to_string(),
            event_id: event_id.to_string(),
            success,
            message: message.to_string(),
        });
    }

    fn on_notify(&self, relay: &RelayConnection, message: &str) {
        self.emit(ClientEvent::Notify {
            relay_url: relay.url().to_string(),
            message: message.to_string(),
        });
    }

    fn on_closed(&self, relay: &RelayConnection, subscription_id: &str, message: &str) {
        self.emit(ClientEvent::Closed {
            relay_url: relay.url().to_string(),
            subscription_id: subscription_id.to_string(),
            message: message.to_string(),
        });
    }
}

/// A pool of Nostr relay connections.
pub struct RelayPool {
    relays: ConcurrentEventCache<String, Arc<RelayConnection>>,
    registry: Arc<SubscriptionRegistry>,
    socket_builder: Arc<dyn WebSocketBuilder>,
    clock: Arc<dyn Clock>,
    config: RelayConfig,
    events_tx: broadcast::Sender<ClientEvent>,
    /// Registered on every relay, current and future
    listeners: RwLock<Vec<Arc<dyn RelayListener>>>,
}

impl RelayPool {
    /// Create an empty pool.
    pub fn new(
        config: RelayConfig,
        socket_builder: Arc<dyn WebSocketBuilder>,
        clock: Arc<dyn Clock>,
        registry: Arc<SubscriptionRegistry>,
        channel_capacity: usize,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(channel_capacity.max(1));
        let pool_listener: Arc<dyn RelayListener> = Arc::new(PoolListener {
            events_tx: events_tx.clone(),
            registry: Arc::clone(&registry),
        });

        Self {
            relays: ConcurrentEventCache::new(),
            registry,
            socket_builder,
            clock,
            config,
            events_tx,
            listeners: RwLock::new(vec![pool_listener]),
        }
    }

    /// Subscribe to pool events.
    pub fn subscribe(&self) -> broadcast::Receiver<ClientEvent> {
        self.events_tx.subscribe()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Register `listener` on every relay, including relays added later.
    pub fn add_listener(&self, listener: Arc<dyn RelayListener>) {
        self.listeners.write().push(Arc::clone(&listener));
        self.relays.for_each(&mut |_: &String, relay: &Arc<Arc<RelayConnection>>| {
            relay.register(Arc::clone(&listener));
        });
    }

    /// Register `listener` ahead of every other listener, the pool's own
    /// broadcast included, on every relay current and future.
    pub fn add_listener_first(&self, listener: Arc<dyn RelayListener>) {
        self.listeners.write().insert(0, Arc::clone(&listener));
        self.relays.for_each(&mut |_: &String, relay: &Arc<Arc<RelayConnection>>| {
            relay.register_first(Arc::clone(&listener));
        });
    }

    /// Add a relay, or return the one already in the pool for `url`.
    pub fn add_relay(&self, url: &str) -> Result<Arc<RelayConnection>> {
        let relay = self.relays.try_get_or_create(url.to_string(), |url| {
            let relay = RelayConnection::new(
                url,
                self.config.clone(),
                Arc::clone(&self.socket_builder),
                Arc::clone(&self.clock),
                Arc::clone(&self.registry),
            )?;
            for listener in self.listeners.read().iter() {
                relay.register(Arc::clone(listener));
            }
            Ok::<_, ClientError>(relay)
        })?;
        Ok(Arc::clone(&*relay))
    }

    /// Add a relay that only receives filters for `types`.
    pub fn add_relay_with_types(
        &self,
        url: &str,
        types: impl IntoIterator<Item = FeedType>,
    ) -> Result<Arc<RelayConnection>> {
        let relay = self.add_relay(url)?;
        relay.set_active_types(types);
        Ok(relay)
    }

    /// Add every relay in `urls`. Stops at the first invalid URL.
    pub fn add_all_relays<'a>(&self, urls: impl IntoIterator<Item = &'a str>) -> Result<()> {
        for url in urls {
            self.add_relay(url)?;
        }
        Ok(())
    }

    /// Disconnect and drop the relay for `url`.
    pub fn remove_relay(&self, url: &str) -> bool {
        match self.relays.remove(url) {
            Some(relay) => {
                info!(relay = %url, "removing relay from pool");
                relay.disconnect();
                self.registry.detach(url);
                true
            }
            None => false,
        }
    }

    /// Make the pool hold exactly `urls`, keeping existing connections.
    pub fn update_pool(&self, urls: &HashSet<String>) -> Result<()> {
        for url in urls {
            self.add_relay(url)?;
        }
        for url in self.relays.keys() {
            if !urls.contains(&url) {
                self.remove_relay(&url);
            }
        }
        Ok(())
    }

    /// Disconnect and drop every relay.
    pub fn remove_all_relays(&self) {
        for url in self.relays.keys() {
            self.remove_relay(&url);
        }
    }

    pub fn relay(&self, url: &str) -> Option<Arc<RelayConnection>> {
        self.relays.get(url).map(|relay| Arc::clone(&*relay))
    }

    /// All relay URLs in the pool, sorted.
    pub fn relay_urls(&self) -> Vec<String> {
        self.relays.keys()
    }

    /// Relays that have a socket or may open one now.
    pub fn available_relays(&self) -> Vec<String> {
        self.relays
            .map_not_null(|url, relay| (relay.is_connected() || relay.can_reconnect()).then(|| url.clone()))
    }

    /// Relays whose handshake is complete.
    pub fn connected_relays(&self) -> HashSet<String> {
        self.relays
            .map_not_null_into_set(|url, relay| relay.is_ready().then(|| url.clone()))
    }

    pub fn connected_count(&self) -> usize {
        self.relays.count(|_, relay| relay.is_ready())
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    /// Connect every relay.
    pub fn connect_all(&self) {
        for relay in self.snapshot() {
            relay.connect();
        }
    }

    /// Connect every relay that has no socket and is out of its cooldown.
    pub fn connect_if_disconnected(&self) {
        for relay in self.snapshot() {
            relay.connect_if_disconnected();
        }
    }

    pub fn disconnect_all(&self) {
        for relay in self.snapshot() {
            relay.disconnect();
        }
    }

    /// Queue `event` on every relay.
    pub fn send(&self, event: &Event) {
        for relay in self.snapshot() {
            relay.send(event.clone());
        }
    }

    /// Queue `event` on the listed relays only.
    ///
    /// Fails without sending anything if a URL is not in the pool.
    pub fn send_to(&self, event: &Event, urls: &[String]) -> Result<()> {
        let targets = urls
            .iter()
            .map(|url| self.relay(url).ok_or_else(|| ClientError::UnknownRelay(url.clone())))
            .collect::<Result<Vec<_>>>()?;
        for relay in targets {
            relay.send(event.clone());
        }
        Ok(())
    }

    /// Send a COUNT on every relay.
    pub fn send_count(&self, subscription_id: &str, filters: &[RelayFilter]) {
        for relay in self.snapshot() {
            relay.send_count(subscription_id, filters);
        }
    }

    fn snapshot(&self) -> Vec<Arc<RelayConnection>> {
        self.relays.map(|_, relay| Arc::clone(relay))
    }
}

impl std::fmt::Debug for RelayPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayPool")
            .field("relays", &self.relays.len())
            .field("connected", &self.connected_count())
            .finish()
    }
}
