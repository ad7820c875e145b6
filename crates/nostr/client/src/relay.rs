//! Single relay connection management
//!
//! A [`RelayConnection`] owns one relay's socket and the protocol state that
//! lives as long as that socket: readiness, per-subscription EOSE flags and
//! AUTH bookkeeping. The outbox outlives sockets and is replayed on every
//! READY transition.
//!
//! Connection attempts are throttled by a cooldown measured on an injected
//! [`Clock`]. There are no background timers: callers poll with
//! [`RelayConnection::connect_if_disconnected`] as often as they like.

use crate::clock::Clock;
use crate::config::{RelayConfig, validate_relay_url};
use crate::error::{RelayError, Result};
use crate::filter::{FeedType, RelayFilter};
use crate::message::{ClientMessage, MessageError, RelayMessage};
use crate::socket::{WebSocket, WebSocketBuilder, WebSocketListener};
use crate::subscription::SubscriptionRegistry;
use indexmap::IndexMap;
use nostr::{Event, get_challenge, is_auth_event, is_auth_required_error};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

/// Relay lifecycle notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayState {
    /// Socket open and handshake complete
    Connected,
    /// Remote side started closing
    Disconnecting,
    /// Socket gone
    Disconnected,
    /// Stored events finished for a subscription
    Eose(String),
}

/// Callbacks fired by a [`RelayConnection`].
///
/// Callbacks run on the socket's execution context. Do not block in them.
#[allow(unused_variables)]
pub trait RelayListener: Send + Sync {
    fn on_event(&self, relay: &RelayConnection, subscription_id: &str, event: &Event, after_eose: bool) {}

    fn on_eose(&self, relay: &RelayConnection, subscription_id: &str) {}

    /// Non-fatal problem. `subscription_id` is empty when not tied to one.
    fn on_error(&self, relay: &RelayConnection, subscription_id: &str, error: &RelayError) {}

    fn on_auth(&self, relay: &RelayConnection, challenge: &str) {}

    fn on_relay_state_change(&self, relay: &RelayConnection, state: &RelayState) {}

    fn on_send_response(&self, relay: &RelayConnection, event_id: &str, success: bool, message: &str) {}

    fn on_notify(&self, relay: &RelayConnection, message: &str) {}

    fn on_closed(&self, relay: &RelayConnection, subscription_id: &str, message: &str) {}

    fn on_count(&self, relay: &RelayConnection, subscription_id: &str, count: u64) {}

    /// An event was handed to [`RelayConnection::send`] or
    /// [`RelayConnection::send_override`], before any routing.
    fn on_before_send(&self, relay: &RelayConnection, event: &Event) {}

    /// A frame was handed to the socket.
    fn on_send(&self, relay: &RelayConnection, frame: &str, success: bool) {}
}

/// Traffic and error counters for one relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub errors: u64,
    pub notices: u64,
    /// OK responses with success = false
    pub rejected: u64,
    pub last_error: Option<String>,
    /// Handshake round trip of the current or last connection
    pub ping_ms: Option<u64>,
}

#[derive(Default)]
struct ConnectionState {
    socket: Option<Arc<dyn WebSocket>>,
    /// Bumped whenever the socket is replaced or dropped
    generation: u64,
    is_ready: bool,
    using_compression: bool,
    last_connect_attempt: Option<u64>,
    after_eose: HashMap<String, bool>,
    auth_responses: HashMap<String, bool>,
    auth_challenges_sent: HashSet<String>,
}

impl ConnectionState {
    fn reset_eose_statuses(&mut self) {
        self.after_eose.clear();
        self.auth_responses.clear();
        self.auth_challenges_sent.clear();
    }
}

type OnConnected = Box<dyn FnOnce(&RelayConnection) + Send>;

/// Connection to one relay.
pub struct RelayConnection {
    url: String,
    config: RelayConfig,
    read: AtomicBool,
    write: AtomicBool,
    active_types: RwLock<BTreeSet<FeedType>>,
    socket_builder: Arc<dyn WebSocketBuilder>,
    clock: Arc<dyn Clock>,
    registry: Arc<SubscriptionRegistry>,
    listeners: RwLock<Vec<Arc<dyn RelayListener>>>,
    connecting: AtomicBool,
    state: Mutex<ConnectionState>,
    /// Events not yet confirmed by the relay, in send order
    outbox: Mutex<IndexMap<String, Event>>,
    stats: Mutex<RelayStats>,
    this: Weak<RelayConnection>,
}

impl RelayConnection {
    /// Create a connection (does not connect yet) and attach it to `registry`.
    pub fn new(
        url: &str,
        config: RelayConfig,
        socket_builder: Arc<dyn WebSocketBuilder>,
        clock: Arc<dyn Clock>,
        registry: Arc<SubscriptionRegistry>,
    ) -> Result<Arc<Self>> {
        validate_relay_url(url)?;

        let relay = Arc::new_cyclic(|this| Self {
            url: url.to_string(),
            config,
            read: AtomicBool::new(true),
            write: AtomicBool::new(true),
            active_types: RwLock::new(FeedType::all()),
            socket_builder,
            clock,
            registry: Arc::clone(&registry),
            listeners: RwLock::new(Vec::new()),
            connecting: AtomicBool::new(false),
            state: Mutex::new(ConnectionState::default()),
            outbox: Mutex::new(IndexMap::new()),
            stats: Mutex::new(RelayStats::default()),
            this: this.clone(),
        });

        registry.attach(&relay);
        Ok(relay)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Whether REQ/COUNT frames may be sent.
    pub fn read(&self) -> bool {
        self.read.load(Ordering::SeqCst)
    }

    pub fn set_read(&self, read: bool) {
        self.read.store(read, Ordering::SeqCst);
    }

    /// Whether non-AUTH events may be sent.
    pub fn write(&self) -> bool {
        self.write.load(Ordering::SeqCst)
    }

    pub fn set_write(&self, write: bool) {
        self.write.store(write, Ordering::SeqCst);
    }

    /// Feeds this relay takes part in. Every feed by default.
    pub fn active_types(&self) -> BTreeSet<FeedType> {
        self.active_types.read().clone()
    }

    pub fn set_active_types(&self, types: impl IntoIterator<Item = FeedType>) {
        *self.active_types.write() = types.into_iter().collect();
    }

    pub fn register(&self, listener: Arc<dyn RelayListener>) {
        self.listeners.write().push(listener);
    }

    /// Register `listener` ahead of every listener already present.
    pub fn register_first(&self, listener: Arc<dyn RelayListener>) {
        self.listeners.write().insert(0, listener);
    }

    pub fn unregister(&self, listener: &Arc<dyn RelayListener>) {
        self.listeners.write().retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// A socket exists (it may still be handshaking).
    pub fn is_connected(&self) -> bool {
        self.state.lock().socket.is_some()
    }

    /// Handshake complete.
    pub fn is_ready(&self) -> bool {
        self.state.lock().is_ready
    }

    pub fn using_compression(&self) -> bool {
        self.state.lock().using_compression
    }

    /// Unix time of the last connection attempt, `None` after a clean disconnect.
    pub fn last_connect_attempt(&self) -> Option<u64> {
        self.state.lock().last_connect_attempt
    }

    pub fn is_after_eose(&self, subscription_id: &str) -> bool {
        self.state
            .lock()
            .after_eose
            .get(subscription_id)
            .copied()
            .unwrap_or(false)
    }

    pub fn stats(&self) -> RelayStats {
        self.stats.lock().clone()
    }

    /// Events waiting for an OK, in send order.
    pub fn outbox(&self) -> Vec<Event> {
        self.outbox.lock().values().cloned().collect()
    }

    pub fn outbox_len(&self) -> usize {
        self.outbox.lock().len()
    }

    /// Whether the cooldown since the last attempt has elapsed.
    pub fn can_reconnect(&self) -> bool {
        let last = self.state.lock().last_connect_attempt;
        match last {
            None => true,
            Some(at) => self.clock.now() > at.saturating_add(self.config.reconnect_cooldown_secs),
        }
    }

    /// Open a socket and catch up every live subscription once it is ready.
    pub fn connect(&self) {
        self.connect_and_run(|_| {});
    }

    /// Like [`connect`](Self::connect), running `on_connected` after the
    /// READY catch-up.
    ///
    /// Concurrent callers collapse into one attempt. When a socket already
    /// exists nothing happens and `on_connected` is dropped without running.
    pub fn connect_and_run<F>(&self, on_connected: F)
    where
        F: FnOnce(&RelayConnection) + Send + 'static,
    {
        if self.connecting.swap(true, Ordering::SeqCst) {
            return;
        }
        self.open_socket(Box::new(on_connected));
        self.connecting.store(false, Ordering::SeqCst);
    }

    fn open_socket(&self, on_connected: OnConnected) {
        let generation = {
            let mut state = self.state.lock();
            if state.socket.is_some() {
                return;
            }
            state.last_connect_attempt = Some(self.clock.now());
            state.generation += 1;
            state.generation
        };

        info!(relay = %self.url, "connecting to relay");

        let listener = Arc::new(SocketListener {
            relay: self.this.clone(),
            generation,
            on_connected: Mutex::new(Some(on_connected)),
        });

        match self.socket_builder.build(&self.url, listener) {
            Ok(socket) => {
                let socket: Arc<dyn WebSocket> = Arc::from(socket);
                {
                    let mut state = self.state.lock();
                    if state.generation != generation {
                        return;
                    }
                    state.socket = Some(Arc::clone(&socket));
                }
                socket.connect();
            }
            Err(e) => {
                warn!(relay = %self.url, error = %e, "relay socket could not be created");
                self.record_error(e.to_string());
                self.mark_connection_as_closed();
                let error = RelayError::Socket(e.to_string());
                self.notify(|relay, l| l.on_error(relay, "", &error));
            }
        }
    }

    /// Connect unless a socket exists or the cooldown has not elapsed.
    pub fn connect_if_disconnected(&self) {
        if !self.is_connected() && self.can_reconnect() {
            self.connect();
        }
    }

    /// Intentional close. The next connection attempt is not throttled.
    pub fn disconnect(&self) {
        info!(relay = %self.url, "disconnecting from relay");

        let socket = {
            let mut state = self.state.lock();
            state.last_connect_attempt = None;
            state.socket.clone()
        };
        self.mark_connection_as_closed();

        if let Some(socket) = socket {
            socket.cancel();
            self.notify(|relay, l| l.on_relay_state_change(relay, &RelayState::Disconnected));
        }
    }

    /// Send a REQ for `subscription_id`.
    ///
    /// While handshaking nothing is sent: the READY transition re-issues all
    /// live subscriptions. Without a socket this starts a connection once the
    /// cooldown allows it.
    pub fn send_filter(&self, subscription_id: &str, filters: &[RelayFilter]) {
        self.send_filter_frame(subscription_id, filters, false);
    }

    /// Send a COUNT (NIP-45) with the same rules as [`send_filter`](Self::send_filter).
    pub fn send_count(&self, subscription_id: &str, filters: &[RelayFilter]) {
        self.send_filter_frame(subscription_id, filters, true);
    }

    fn send_filter_frame(&self, subscription_id: &str, filters: &[RelayFilter], count: bool) {
        if !self.read() {
            return;
        }

        let (connected, ready) = {
            let state = self.state.lock();
            (state.socket.is_some(), state.is_ready)
        };

        if !connected {
            if self.can_reconnect() {
                self.connect();
            }
            return;
        }
        if !ready {
            return;
        }

        let active = self.active_types();
        let mut relay_filters: Vec<RelayFilter> = filters
            .iter()
            .filter(|f| f.is_valid_for(&self.url) && f.serves_any(&active))
            .cloned()
            .collect();
        if relay_filters.is_empty() {
            return;
        }
        if relay_filters.len() > self.config.max_filters_per_req {
            warn!(
                relay = %self.url,
                subscription_id = %subscription_id,
                filters = relay_filters.len(),
                limit = self.config.max_filters_per_req,
                "too many filters for one frame, truncating"
            );
            relay_filters.truncate(self.config.max_filters_per_req);
        }

        let message = if count {
            ClientMessage::Count {
                subscription_id: subscription_id.to_string(),
                filters: relay_filters,
            }
        } else {
            ClientMessage::Req {
                subscription_id: subscription_id.to_string(),
                filters: relay_filters,
            }
        };

        let Some(frame) = self.encode(&message) else {
            return;
        };

        debug!(relay = %self.url, subscription_id = %subscription_id, "sending filters");
        if self.write_to_socket(frame) && !count {
            self.state
                .lock()
                .after_eose
                .insert(subscription_id.to_string(), false);
            self.registry.clear_eose(subscription_id, &self.url);
        }
    }

    /// Re-send every live subscription held by the registry.
    pub fn renew_filters(&self) {
        for subscription in self.registry.all_subscriptions() {
            self.send_filter(&subscription.id, &subscription.filters);
        }
    }

    /// Queue `event` and transmit it when possible.
    ///
    /// NIP-42 auth events take the AUTH path instead and are never queued.
    pub fn send(&self, event: Event) {
        self.notify(|relay, l| l.on_before_send(relay, &event));
        if is_auth_event(&event) {
            self.send_auth(event);
            return;
        }
        if !self.write() {
            debug!(relay = %self.url, event_id = %event.id, "relay is read-only, not sending");
            return;
        }
        self.enqueue_and_send(event);
    }

    /// Send ignoring the write flag.
    pub fn send_override(&self, event: Event) {
        self.notify(|relay, l| l.on_before_send(relay, &event));
        if is_auth_event(&event) {
            self.send_auth(event);
        } else {
            self.enqueue_and_send(event);
        }
    }

    fn enqueue_and_send(&self, event: Event) {
        self.outbox.lock().insert(event.id.clone(), event.clone());

        let (connected, ready) = {
            let state = self.state.lock();
            (state.socket.is_some(), state.is_ready)
        };

        if !connected {
            self.connect();
        } else if ready {
            if let Some(frame) = self.encode(&ClientMessage::Event(event)) {
                self.write_to_socket(frame);
            }
        }
    }

    /// Answer an AUTH challenge once per challenge string per connection.
    fn send_auth(&self, event: Event) {
        let challenge = get_challenge(&event).unwrap_or_default().to_string();
        {
            let mut state = self.state.lock();
            if !state.auth_challenges_sent.insert(challenge) {
                debug!(relay = %self.url, "challenge already answered");
                return;
            }
            state.auth_responses.insert(event.id.clone(), false);
        }

        if let Some(frame) = self.encode(&ClientMessage::Auth(event)) {
            self.write_to_socket(frame);
        }
    }

    /// Transmit everything in the outbox.
    pub fn send_outbox(&self) {
        if !self.is_ready() {
            return;
        }
        let events: Vec<Event> = self.outbox.lock().values().cloned().collect();
        for event in events {
            if let Some(frame) = self.encode(&ClientMessage::Event(event)) {
                self.write_to_socket(frame);
            }
        }
    }

    /// Close a subscription on this relay.
    pub fn close(&self, subscription_id: &str) {
        let connected = {
            let mut state = self.state.lock();
            state.after_eose.remove(subscription_id);
            state.socket.is_some()
        };
        if !connected {
            return;
        }
        let message = ClientMessage::Close {
            subscription_id: subscription_id.to_string(),
        };
        if let Some(frame) = self.encode(&message) {
            self.write_to_socket(frame);
        }
    }

    /// Handle one inbound text frame.
    ///
    /// Parse failures and unknown message types are reported to listeners;
    /// the socket stays open.
    pub fn process_message(&self, text: &str) {
        match RelayMessage::from_json(text) {
            Ok(message) => self.dispatch(message),
            Err(MessageError::UnknownType(kind)) => {
                warn!(relay = %self.url, message_type = %kind, "unsupported message");
                let error = RelayError::Unsupported(text.to_string());
                self.notify(|relay, l| l.on_error(relay, "", &error));
            }
            Err(e) => {
                warn!(relay = %self.url, error = %e, "malformed message");
                self.record_error(e.to_string());
                let error = RelayError::Malformed(format!("{}: {}", e, text));
                self.notify(|relay, l| l.on_error(relay, "", &error));
            }
        }
    }

    fn dispatch(&self, message: RelayMessage) {
        match message {
            RelayMessage::Event {
                subscription_id,
                event,
            } => {
                let after_eose = self.is_after_eose(&subscription_id);
                self.notify(|relay, l| l.on_event(relay, &subscription_id, &event, after_eose));
            }
            RelayMessage::Eose { subscription_id } => {
                self.state
                    .lock()
                    .after_eose
                    .insert(subscription_id.clone(), true);
                self.registry.mark_eose(&subscription_id, &self.url);
                debug!(relay = %self.url, subscription_id = %subscription_id, "EOSE");

                let state = RelayState::Eose(subscription_id.clone());
                self.notify(|relay, l| {
                    l.on_eose(relay, &subscription_id);
                    l.on_relay_state_change(relay, &state);
                });
            }
            RelayMessage::Notice { message } => {
                warn!(relay = %self.url, notice = %message, "relay notice");
                self.stats.lock().notices += 1;
                let error = RelayError::Notice(message);
                self.notify(|relay, l| l.on_error(relay, "", &error));
            }
            RelayMessage::Ok {
                event_id,
                success,
                message,
            } => self.handle_ok(event_id, success, message),
            RelayMessage::Auth { challenge } => {
                debug!(relay = %self.url, "relay requested authentication");
                self.notify(|relay, l| l.on_auth(relay, &challenge));
            }
            RelayMessage::Notify { message } => {
                self.notify(|relay, l| l.on_notify(relay, &message));
            }
            RelayMessage::Closed {
                subscription_id,
                message,
            } => {
                warn!(
                    relay = %self.url,
                    subscription_id = %subscription_id,
                    message = %message,
                    "relay closed subscription"
                );
                self.notify(|relay, l| l.on_closed(relay, &subscription_id, &message));
            }
            RelayMessage::Count {
                subscription_id,
                count,
            } => {
                self.notify(|relay, l| l.on_count(relay, &subscription_id, count));
            }
        }
    }

    fn handle_ok(&self, event_id: String, success: bool, message: String) {
        let newly_authenticated = {
            let mut state = self.state.lock();
            match state.auth_responses.get(&event_id).copied() {
                Some(previous) => {
                    state.auth_responses.insert(event_id.clone(), success);
                    !previous && success
                }
                None => false,
            }
        };

        if success || !is_auth_required_error(&message) {
            self.outbox.lock().shift_remove(&event_id);
        }

        if success {
            debug!(relay = %self.url, event_id = %event_id, "event accepted");
        } else {
            warn!(relay = %self.url, event_id = %event_id, message = %message, "event rejected");
            self.stats.lock().rejected += 1;
        }

        if newly_authenticated {
            info!(relay = %self.url, "authenticated, renewing filters");
            self.renew_filters();
            self.send_outbox();
        }

        self.notify(|relay, l| l.on_send_response(relay, &event_id, success, &message));
    }

    /// Hand a frame to the socket, or report that there is none.
    fn write_to_socket(&self, frame: String) -> bool {
        let socket = self.state.lock().socket.clone();
        match socket {
            Some(socket) => {
                let len = frame.len() as u64;
                let success = socket.send(frame.clone());
                if success {
                    self.stats.lock().bytes_sent += len;
                }
                self.notify(|relay, l| l.on_send(relay, &frame, success));
                success
            }
            None => {
                let error = RelayError::NotConnected(frame);
                self.notify(|relay, l| l.on_error(relay, "", &error));
                false
            }
        }
    }

    fn encode(&self, message: &ClientMessage) -> Option<String> {
        match message.to_json(Some(&self.url)) {
            Ok(frame) => Some(frame),
            Err(e) => {
                warn!(relay = %self.url, error = %e, "failed to encode frame");
                None
            }
        }
    }

    /// Returns false when `generation` is stale.
    fn mark_connection_as_ready(&self, generation: u64, ping_ms: u64, compression: bool) -> bool {
        {
            let mut state = self.state.lock();
            if state.generation != generation || state.socket.is_none() {
                return false;
            }
            state.reset_eose_statuses();
            state.is_ready = true;
            state.using_compression = compression;
        }
        self.stats.lock().ping_ms = Some(ping_ms);
        self.registry.reset_eose_for(&self.url);
        true
    }

    fn mark_connection_as_closed(&self) {
        {
            let mut state = self.state.lock();
            state.socket = None;
            state.generation += 1;
            state.is_ready = false;
            state.using_compression = false;
            state.reset_eose_statuses();
        }
        self.registry.reset_eose_for(&self.url);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.state.lock().generation == generation
    }

    fn record_error(&self, error: String) {
        let mut stats = self.stats.lock();
        stats.errors += 1;
        stats.last_error = Some(error);
    }

    /// Call `f` on a snapshot of the listeners.
    fn notify(&self, f: impl Fn(&RelayConnection, &dyn RelayListener)) {
        let listeners = self.listeners.read().clone();
        for listener in &listeners {
            f(self, listener.as_ref());
        }
    }

    fn on_socket_open(&self, generation: u64, ping_ms: u64, compression: bool, on_connected: Option<OnConnected>) {
        if !self.mark_connection_as_ready(generation, ping_ms, compression) {
            return;
        }
        info!(relay = %self.url, ping_ms, "relay ready");

        self.renew_filters();
        self.send_outbox();
        if let Some(on_connected) = on_connected {
            on_connected(self);
        }

        self.notify(|relay, l| l.on_relay_state_change(relay, &RelayState::Connected));
    }

    fn on_socket_message(&self, generation: u64, text: &str) {
        if !self.is_current(generation) {
            return;
        }
        self.stats.lock().bytes_received += text.len() as u64;
        self.process_message(text);
    }

    fn on_socket_closing(&self, generation: u64, reason: &str) {
        if !self.is_current(generation) {
            return;
        }
        debug!(relay = %self.url, reason = %reason, "relay closing");
        self.notify(|relay, l| l.on_relay_state_change(relay, &RelayState::Disconnecting));
    }

    fn on_socket_closed(&self, generation: u64, reason: &str) {
        if !self.is_current(generation) {
            return;
        }
        self.mark_connection_as_closed();
        info!(relay = %self.url, reason = %reason, "relay closed");
        self.notify(|relay, l| l.on_relay_state_change(relay, &RelayState::Disconnected));
    }

    fn on_socket_failure(&self, generation: u64, error: &str) {
        let socket = {
            let state = self.state.lock();
            if state.generation != generation {
                return;
            }
            state.socket.clone()
        };
        if let Some(socket) = socket {
            socket.cancel();
        }
        self.mark_connection_as_closed();
        self.record_error(error.to_string());

        warn!(relay = %self.url, error = %error, "relay failure");
        let failure = RelayError::Socket(error.to_string());
        self.notify(|relay, l| {
            l.on_error(relay, "", &failure);
            l.on_relay_state_change(relay, &RelayState::Disconnected);
        });
    }
}

impl std::fmt::Debug for RelayConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayConnection")
            .field("url", &self.url)
            .field("connected", &self.is_connected())
            .field("ready", &self.is_ready())
            .finish()
    }
}

/// Socket callbacks for one connection attempt.
struct SocketListener {
    relay: Weak<RelayConnection>,
    generation: u64,
    on_connected: Mutex<Option<OnConnected>>,
}

impl WebSocketListener for SocketListener {
    fn on_open(&self, ping_ms: u64, compression: bool) {
        if let Some(relay) = self.relay.upgrade() {
            let on_connected = self.on_connected.lock().take();
            relay.on_socket_open(self.generation, ping_ms, compression, on_connected);
        }
    }

    fn on_message(&self, text: &str) {
        if let Some(relay) = self.relay.upgrade() {
            relay.on_socket_message(self.generation, text);
        }
    }

    fn on_closing(&self, _code: u16, reason: &str) {
        if let Some(relay) = self.relay.upgrade() {
            relay.on_socket_closing(self.generation, reason);
        }
    }

    fn on_closed(&self, _code: u16, reason: &str) {
        if let Some(relay) = self.relay.upgrade() {
            relay.on_socket_closed(self.generation, reason);
        }
    }

    fn on_failure(&self, error: &str) {
        if let Some(relay) = self.relay.upgrade() {
            relay.on_socket_failure(self.generation, error);
        }
    }
}
