//! Client configuration

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Default relays used when no configuration is given.
pub const DEFAULT_RELAYS: &[&str] = &[
    "wss://relay.damus.io",
    "wss://nos.lol",
    "wss://relay.nostr.band",
    "wss://nostr.wine",
];

/// Seconds between connection attempts to the same relay.
pub const DEFAULT_RECONNECT_COOLDOWN_SECS: u64 = 180;

/// Relays reject REQ frames with more filters than this.
pub const DEFAULT_MAX_FILTERS_PER_REQ: usize = 19;

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Relays opened by [`crate::NostrClient::open`]
    pub relays: Vec<String>,
    /// Minimum seconds between connection attempts to one relay
    pub reconnect_cooldown_secs: u64,
    /// Maximum filters carried by one REQ frame
    pub max_filters_per_req: usize,
    /// Seconds allowed for the WebSocket handshake
    pub connect_timeout_secs: u64,
    /// Capacity of the client event broadcast channel
    pub event_channel_capacity: usize,
    /// Whether received events are stored in the client cache
    pub cache_events: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relays: DEFAULT_RELAYS.iter().map(|s| s.to_string()).collect(),
            reconnect_cooldown_secs: DEFAULT_RECONNECT_COOLDOWN_SECS,
            max_filters_per_req: DEFAULT_MAX_FILTERS_PER_REQ,
            connect_timeout_secs: 10,
            event_channel_capacity: 1000,
            cache_events: true,
        }
    }
}

impl ClientConfig {
    /// Parse a TOML document. Missing keys take their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(content).map_err(|e| ClientError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ClientError::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        for relay in &self.relays {
            validate_relay_url(relay)?;
        }
        if self.max_filters_per_req == 0 {
            return Err(ClientError::Config(
                "max_filters_per_req must be at least 1".to_string(),
            ));
        }
        if self.event_channel_capacity == 0 {
            return Err(ClientError::Config(
                "event_channel_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Set relays
    pub fn with_relays(mut self, relays: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.relays = relays.into_iter().map(Into::into).collect();
        self
    }

    /// Set reconnect cooldown
    pub fn with_reconnect_cooldown(mut self, secs: u64) -> Self {
        self.reconnect_cooldown_secs = secs;
        self
    }

    /// Handshake timeout handed to the socket builder.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Per-connection slice of this configuration.
    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            reconnect_cooldown_secs: self.reconnect_cooldown_secs,
            max_filters_per_req: self.max_filters_per_req,
        }
    }
}

/// Settings for one relay connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayConfig {
    pub reconnect_cooldown_secs: u64,
    pub max_filters_per_req: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        ClientConfig::default().relay_config()
    }
}

/// Check that `relay` is a ws:// or wss:// URL.
pub fn validate_relay_url(relay: &str) -> Result<Url> {
    let url = Url::parse(relay).map_err(|e| ClientError::InvalidUrl(format!("{}: {}", relay, e)))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => Err(ClientError::InvalidUrl(format!(
            "{}: unsupported scheme {}",
            relay, other
        ))),
    }
}
