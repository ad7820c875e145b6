//! WebSocket seam between relay connections and the network.
//!
//! A [`RelayConnection`](crate::RelayConnection) never touches a network
//! stream directly. It asks a [`WebSocketBuilder`] for a [`WebSocket`],
//! stores it, then calls [`WebSocket::connect`]. Transport callbacks arrive
//! on the socket's own execution context through a [`WebSocketListener`].
//!
//! - [`TungsteniteSocketBuilder`]: one tokio task per socket
//! - [`MockSocketBuilder`]: scriptable in-memory sockets for tests

pub mod mock;
mod tungstenite;

pub use mock::{MockSocket, MockSocketBuilder};
pub use tungstenite::TungsteniteSocketBuilder;

use crate::error::Result;
use std::sync::Arc;

/// Close code sent on an intentional disconnect.
pub const NORMAL_CLOSURE: u16 = 1000;

/// An open (or opening) socket to one relay.
pub trait WebSocket: Send + Sync {
    /// Start the connection. Callbacks fire on the listener afterwards.
    fn connect(&self);

    /// Queue a text frame. Returns false when the socket can no longer send.
    fn send(&self, text: String) -> bool;

    /// Tear the connection down without waiting for the close handshake.
    fn cancel(&self);
}

/// Receives transport callbacks for one socket.
pub trait WebSocketListener: Send + Sync {
    /// Handshake finished. `ping_ms` is the handshake round trip.
    fn on_open(&self, ping_ms: u64, compression: bool);

    fn on_message(&self, text: &str);

    /// Remote side started the close handshake.
    fn on_closing(&self, code: u16, reason: &str);

    fn on_closed(&self, code: u16, reason: &str);

    /// Connection failed or dropped. No further callbacks follow.
    fn on_failure(&self, error: &str);
}

/// Creates sockets for relay URLs.
pub trait WebSocketBuilder: Send + Sync {
    fn build(&self, url: &str, listener: Arc<dyn WebSocketListener>) -> Result<Box<dyn WebSocket>>;
}
