//! Nostr relay client engine for OpenAgents.
//!
//! This crate provides:
//! - Filters with per-relay specialisation and a match predicate
//! - One state machine per relay connection (reconnect cooldown, outbox, NIP-42 auth, EOSE tracking)
//! - A subscription registry that re-sends filters whenever a relay becomes ready
//! - A relay pool and a [`NostrClient`] owner handle with an explicit lifecycle
//! - A lock-free ordered cache with a single-pass query library
//!
//! # Example
//!
//! ```rust,no_run
//! use nostr_client::{ClientConfig, ClientEvent, Filter, NostrClient};
//!
//! #[tokio::main]
//! async fn main() -> nostr_client::Result<()> {
//!     let config = ClientConfig::default().with_relays(["wss://relay.damus.io", "wss://nos.lol"]);
//!     let client = NostrClient::with_config(config)?;
//!     let mut events = client.events();
//!     client.open()?;
//!
//!     // Subscribe to kind 1 (text notes)
//!     let filter = Filter::new().kinds([1]).limit(10);
//!     client.subscribe(vec![filter.into()])?;
//!
//!     while let Ok(event) = events.recv().await {
//!         match event {
//!             ClientEvent::Event { event, .. } => println!("Received event: {}", event.id),
//!             ClientEvent::AllEose { subscription_id } => {
//!                 println!("Got all stored events for {}", subscription_id);
//!             }
//!             _ => {}
//!         }
//!     }
//!     Ok(())
//! }
//! ```

mod cache;
mod client;
mod clock;
mod collectors;
mod config;
mod error;
mod filter;
mod message;
mod pool;
mod relay;
pub mod socket;
mod subscription;

pub use cache::ConcurrentEventCache;
pub use client::{NostrClient, PublishConfirmation};
pub use clock::{Clock, ManualClock, SystemClock};
pub use collectors::{
    AssociateCollector, AssociateWithCollector, CacheCollector, CountByGroupCollector,
    CountCollector, FilterCollector, FilterSetCollector, GroupByCollector, JoinToStringCollector,
    MapFlattenCollector, MapFlattenSetCollector, MapNotNullCollector, MapNotNullSetCollector,
    MaxCollector, SumByGroupCollector, SumCollector,
};
pub use config::{
    ClientConfig, DEFAULT_MAX_FILTERS_PER_REQ, DEFAULT_RECONNECT_COOLDOWN_SECS, DEFAULT_RELAYS,
    RelayConfig, validate_relay_url,
};
pub use error::{ClientError, RelayError, Result};
pub use filter::{FeedType, Filter, FilterError, PerRelayFilter, RelayFilter};
pub use message::{ClientMessage, MessageError, RelayMessage};
pub use pool::{ClientEvent, RelayPool};
pub use relay::{RelayConnection, RelayListener, RelayState, RelayStats};
pub use subscription::{
    Subscription, SubscriptionBuilder, SubscriptionRegistry, generate_subscription_id,
};
