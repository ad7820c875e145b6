//! Production sockets on tokio-tungstenite.

use super::{NORMAL_CLOSURE, WebSocket, WebSocketBuilder, WebSocketListener};
use crate::error::Result;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Builds sockets that each run on their own tokio task.
#[derive(Debug, Clone)]
pub struct TungsteniteSocketBuilder {
    connect_timeout: Duration,
}

impl TungsteniteSocketBuilder {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TungsteniteSocketBuilder {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl WebSocketBuilder for TungsteniteSocketBuilder {
    fn build(&self, url: &str, listener: Arc<dyn WebSocketListener>) -> Result<Box<dyn WebSocket>> {
        let (tx, rx) = mpsc::unbounded_channel();
        Ok(Box::new(TungsteniteSocket {
            url: url.to_string(),
            listener,
            connect_timeout: self.connect_timeout,
            tx,
            rx: Mutex::new(Some(rx)),
            cancel: CancellationToken::new(),
        }))
    }
}

struct TungsteniteSocket {
    url: String,
    listener: Arc<dyn WebSocketListener>,
    connect_timeout: Duration,
    tx: mpsc::UnboundedSender<String>,
    rx: Mutex<Option<mpsc::UnboundedReceiver<String>>>,
    cancel: CancellationToken,
}

impl WebSocket for TungsteniteSocket {
    fn connect(&self) {
        let Some(rx) = self.rx.lock().take() else {
            return;
        };

        let handle = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(e) => {
                self.listener.on_failure(&format!("no tokio runtime: {}", e));
                return;
            }
        };

        handle.spawn(run_socket(
            self.url.clone(),
            Arc::clone(&self.listener),
            self.connect_timeout,
            rx,
            self.cancel.clone(),
        ));
    }

    fn send(&self, text: String) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.tx.send(text).is_ok()
    }

    fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Drop for TungsteniteSocket {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run_socket(
    url: String,
    listener: Arc<dyn WebSocketListener>,
    connect_timeout: Duration,
    mut outbound: mpsc::UnboundedReceiver<String>,
    cancel: CancellationToken,
) {
    let started = Instant::now();

    let connected = tokio::select! {
        _ = cancel.cancelled() => {
            debug!(relay = %url, "connect cancelled");
            return;
        }
        result = timeout(connect_timeout, connect_async(url.as_str())) => result,
    };

    let (stream, response) = match connected {
        Ok(Ok(pair)) => pair,
        Ok(Err(e)) => {
            warn!(relay = %url, error = %e, "relay connect failed");
            listener.on_failure(&e.to_string());
            return;
        }
        Err(_) => {
            warn!(relay = %url, timeout = ?connect_timeout, "relay connect timed out");
            listener.on_failure(&format!("connection timeout after {:?}", connect_timeout));
            return;
        }
    };

    let ping_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let compression = response
        .headers()
        .get("sec-websocket-extensions")
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.contains("permessage-deflate"));

    info!(relay = %url, ping_ms, compression, "relay connected");
    listener.on_open(ping_ms, compression);

    let (mut write, mut read) = stream.split();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = write.send(Message::Close(None)).await;
                debug!(relay = %url, "socket cancelled");
                return;
            }
            out = outbound.recv() => {
                let Some(text) = out else {
                    let _ = write.send(Message::Close(None)).await;
                    return;
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    warn!(relay = %url, error = %e, "relay send failed");
                    listener.on_failure(&e.to_string());
                    return;
                }
            }
            incoming = read.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    debug!(relay = %url, frame = %text, "relay rx");
                    listener.on_message(text.as_str());
                }
                Some(Ok(Message::Binary(bytes))) => {
                    if let Ok(text) = std::str::from_utf8(&bytes) {
                        listener.on_message(text);
                    }
                }
                Some(Ok(Message::Ping(payload))) => {
                    let _ = write.send(Message::Pong(payload)).await;
                }
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((NORMAL_CLOSURE, String::new()));
                    info!(relay = %url, code, reason = %reason, "relay closed connection");
                    listener.on_closing(code, &reason);
                    listener.on_closed(code, &reason);
                    return;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!(relay = %url, error = %e, "relay read failed");
                    listener.on_failure(&e.to_string());
                    return;
                }
                None => {
                    listener.on_closed(NORMAL_CLOSURE, "stream ended");
                    return;
                }
            }
        }
    }
}
