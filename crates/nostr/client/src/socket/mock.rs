//! Mock sockets for testing.
//!
//! Captures sent frames and lets tests fire transport callbacks by hand.

use super::{NORMAL_CLOSURE, WebSocket, WebSocketBuilder, WebSocketListener};
use crate::error::{ClientError, Result};
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug, Default)]
struct MockSocketInner {
    url: String,
    sent: Vec<String>,
    connect_calls: usize,
    open: bool,
    cancelled: bool,
    auto_open: bool,
    fail_next_send: bool,
}

/// One in-memory socket handed out by [`MockSocketBuilder`].
///
/// Clones share state, so a test can keep a handle while the relay owns
/// the boxed socket.
#[derive(Clone)]
pub struct MockSocket {
    inner: Arc<Mutex<MockSocketInner>>,
    listener: Arc<dyn WebSocketListener>,
}

impl MockSocket {
    fn new(url: &str, listener: Arc<dyn WebSocketListener>, auto_open: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(MockSocketInner {
                url: url.to_string(),
                auto_open,
                ..MockSocketInner::default()
            })),
            listener,
        }
    }

    /// URL this socket was built for.
    pub fn url(&self) -> String {
        self.inner.lock().url.clone()
    }

    /// Every frame sent so far.
    pub fn sent(&self) -> Vec<String> {
        self.inner.lock().sent.clone()
    }

    /// Sent frames whose first element is `kind` (e.g. "REQ"), parsed.
    pub fn sent_frames(&self, kind: &str) -> Vec<Value> {
        self.sent()
            .iter()
            .filter_map(|text| serde_json::from_str::<Value>(text).ok())
            .filter(|value| value.get(0).and_then(Value::as_str) == Some(kind))
            .collect()
    }

    /// Number of times `connect()` was called.
    pub fn connect_calls(&self) -> usize {
        self.inner.lock().connect_calls
    }

    pub fn is_open(&self) -> bool {
        self.inner.lock().open
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.lock().cancelled
    }

    /// Cause the next send() to fail.
    pub fn fail_next_send(&self) {
        self.inner.lock().fail_next_send = true;
    }

    /// Forget recorded frames.
    pub fn clear_sent(&self) {
        self.inner.lock().sent.clear();
    }

    /// Complete the handshake.
    pub fn fire_open(&self) {
        self.inner.lock().open = true;
        self.listener.on_open(0, false);
    }

    /// Deliver an inbound text frame.
    pub fn fire_message(&self, text: &str) {
        self.listener.on_message(text);
    }

    /// Remote close handshake followed by close.
    pub fn fire_closed(&self, reason: &str) {
        self.inner.lock().open = false;
        self.listener.on_closing(NORMAL_CLOSURE, reason);
        self.listener.on_closed(NORMAL_CLOSURE, reason);
    }

    /// Transport failure.
    pub fn fire_failure(&self, error: &str) {
        self.inner.lock().open = false;
        self.listener.on_failure(error);
    }
}

impl WebSocket for MockSocket {
    fn connect(&self) {
        let auto_open = {
            let mut inner = self.inner.lock();
            inner.connect_calls += 1;
            inner.auto_open
        };
        if auto_open {
            self.fire_open();
        }
    }

    fn send(&self, text: String) -> bool {
        let mut inner = self.inner.lock();
        if inner.cancelled {
            return false;
        }
        if inner.fail_next_send {
            inner.fail_next_send = false;
            return false;
        }
        inner.sent.push(text);
        true
    }

    fn cancel(&self) {
        let mut inner = self.inner.lock();
        inner.cancelled = true;
        inner.open = false;
    }
}

#[derive(Default)]
struct MockBuilderInner {
    sockets: Vec<MockSocket>,
    fail_next_build: Option<String>,
    auto_open: bool,
}

/// Builder that hands out [`MockSocket`]s and remembers them.
#[derive(Clone, Default)]
pub struct MockSocketBuilder {
    inner: Arc<Mutex<MockBuilderInner>>,
}

impl MockSocketBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sockets built from now on open as soon as `connect()` is called.
    pub fn with_auto_open(self) -> Self {
        self.inner.lock().auto_open = true;
        self
    }

    /// Cause the next build() to fail with the given error.
    pub fn fail_next_build(&self, error: &str) {
        self.inner.lock().fail_next_build = Some(error.to_string());
    }

    /// Number of sockets built so far.
    pub fn build_count(&self) -> usize {
        self.inner.lock().sockets.len()
    }

    /// All sockets built so far, oldest first.
    pub fn sockets(&self) -> Vec<MockSocket> {
        self.inner.lock().sockets.clone()
    }

    /// Sockets built for `url`, oldest first.
    pub fn sockets_for(&self, url: &str) -> Vec<MockSocket> {
        self.sockets().into_iter().filter(|s| s.url() == url).collect()
    }

    /// Most recently built socket for `url`.
    pub fn last_socket_for(&self, url: &str) -> Option<MockSocket> {
        self.sockets_for(url).pop()
    }

    /// Most recently built socket.
    pub fn last_socket(&self) -> Option<MockSocket> {
        self.inner.lock().sockets.last().cloned()
    }
}

impl WebSocketBuilder for MockSocketBuilder {
    fn build(&self, url: &str, listener: Arc<dyn WebSocketListener>) -> Result<Box<dyn WebSocket>> {
        let mut inner = self.inner.lock();
        if let Some(error) = inner.fail_next_build.take() {
            return Err(ClientError::Connection(error));
        }
        let socket = MockSocket::new(url, listener, inner.auto_open);
        inner.sockets.push(socket.clone());
        Ok(Box::new(socket))
    }
}
