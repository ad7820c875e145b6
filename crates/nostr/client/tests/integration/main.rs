//! Integration tests for the relay client against an in-process relay.
//!
//! The relay here is deliberately small: it stores events, answers REQ with
//! stored matches followed by EOSE, pushes live matches, answers COUNT and
//! can demand NIP-42 authentication before accepting events.

mod auth;
mod end_to_end;
mod outbox;

use futures::{Sink, SinkExt, StreamExt};
use nostr::{Event, EventSigner, EventTemplate, SignerError, get_challenge};
use nostr_client::{ClientConfig, ClientEvent, Filter, ManualClock, NostrClient, socket::TungsteniteSocketBuilder};
use parking_lot::Mutex;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Once;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::{Duration, sleep, timeout};
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

const WAIT: Duration = Duration::from_secs(5);

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

#[derive(Default, Clone)]
pub struct RelayOptions {
    pub stored: Vec<Event>,
    pub auth_challenge: Option<String>,
}

struct RelayShared {
    options: RelayOptions,
    stored: Mutex<Vec<Event>>,
    frames: Mutex<Vec<Value>>,
    connections: AtomicUsize,
    kick: broadcast::Sender<()>,
}

/// A relay listening on an ephemeral localhost port.
pub struct TestRelay {
    pub url: String,
    shared: Arc<RelayShared>,
    shutdown: CancellationToken,
}

impl TestRelay {
    pub async fn start(options: RelayOptions) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (kick, _) = broadcast::channel(4);
        let shared = Arc::new(RelayShared {
            stored: Mutex::new(options.stored.clone()),
            options,
            frames: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            kick,
        });
        let shutdown = CancellationToken::new();

        let accept_shared = Arc::clone(&shared);
        let accept_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_shutdown.cancelled() => return,
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { continue };
                        tokio::spawn(handle_connection(stream, Arc::clone(&accept_shared), accept_shutdown.clone()));
                    }
                }
            }
        });

        Self {
            url: format!("ws://{}", addr),
            shared,
            shutdown,
        }
    }

    /// Every frame received from clients, in arrival order.
    pub fn frames(&self) -> Vec<Value> {
        self.shared.frames.lock().clone()
    }

    pub fn frames_of(&self, kind: &str) -> Vec<Value> {
        self.frames()
            .into_iter()
            .filter(|f| f[0] == kind)
            .collect()
    }

    pub fn connections(&self) -> usize {
        self.shared.connections.load(Ordering::SeqCst)
    }

    /// Drop every open client connection without a close handshake.
    pub fn kick_all(&self) {
        let _ = self.shared.kick.send(());
    }

    /// Poll until `kind` frames satisfy `done`.
    pub async fn wait_for_frames(&self, kind: &str, done: impl Fn(&[Value]) -> bool) -> Vec<Value> {
        let polled = timeout(WAIT, async {
            loop {
                let frames = self.frames_of(kind);
                if done(frames.as_slice()) {
                    return frames;
                }
                sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        polled.unwrap_or_else(|_| panic!("relay never saw the expected {} frames", kind))
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn handle_connection(stream: TcpStream, shared: Arc<RelayShared>, shutdown: CancellationToken) {
    let Ok(ws_stream) = accept_async(stream).await else {
        return;
    };
    shared.connections.fetch_add(1, Ordering::SeqCst);

    let (mut write, mut read) = ws_stream.split();
    let mut kick = shared.kick.subscribe();
    let mut subscriptions: HashMap<String, Vec<Filter>> = HashMap::new();
    let mut authenticated = shared.options.auth_challenge.is_none();

    if let Some(challenge) = &shared.options.auth_challenge {
        let frame = json!(["AUTH", challenge]).to_string();
        if write.send(Message::Text(frame.into())).await.is_err() {
            return;
        }
    }

    loop {
        let text = tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = kick.recv() => return,
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => continue,
            },
        };

        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        shared.frames.lock().push(frame.clone());

        let mut replies = Vec::new();
        match frame[0].as_str() {
            Some("REQ") => {
                let id = frame[1].as_str().unwrap_or_default().to_string();
                let filters: Vec<Filter> = frame.as_array().map_or_else(Vec::new, |items| {
                    items.iter().skip(2).filter_map(|f| Filter::from_value(f).ok()).collect()
                });
                for event in shared.stored.lock().iter() {
                    if filters.iter().any(|f| f.matches(event)) {
                        replies.push(json!(["EVENT", id, event]));
                    }
                }
                replies.push(json!(["EOSE", id]));
                subscriptions.insert(id, filters);
            }
            Some("CLOSE") => {
                if let Some(id) = frame[1].as_str() {
                    subscriptions.remove(id);
                }
            }
            Some("COUNT") => {
                let filters: Vec<Filter> = frame.as_array().map_or_else(Vec::new, |items| {
                    items.iter().skip(2).filter_map(|f| Filter::from_value(f).ok()).collect()
                });
                let count = shared
                    .stored
                    .lock()
                    .iter()
                    .filter(|e| filters.iter().any(|f| f.matches(e)))
                    .count();
                replies.push(json!(["COUNT", frame[1], {"count": count}]));
            }
            Some("EVENT") => {
                let Ok(event) = serde_json::from_value::<Event>(frame[1].clone()) else {
                    replies.push(json!(["NOTICE", "invalid: bad event"]));
                    send_all(&mut write, replies).await;
                    continue;
                };
                if !authenticated {
                    replies.push(json!(["OK", event.id, false, "auth-required: authenticate first"]));
                } else {
                    shared.stored.lock().push(event.clone());
                    replies.push(json!(["OK", event.id, true, ""]));
                    for (id, filters) in &subscriptions {
                        if filters.iter().any(|f| f.matches(&event)) {
                            replies.push(json!(["EVENT", id, event]));
                        }
                    }
                }
            }
            Some("AUTH") => {
                if let Ok(event) = serde_json::from_value::<Event>(frame[1].clone()) {
                    let accepted = get_challenge(&event) == shared.options.auth_challenge.as_deref();
                    authenticated |= accepted;
                    replies.push(json!(["OK", event.id, accepted, ""]));
                }
            }
            _ => replies.push(json!(["NOTICE", "unknown command"])),
        }

        if !send_all(&mut write, replies).await {
            return;
        }
    }
}

async fn send_all<S>(write: &mut S, replies: Vec<Value>) -> bool
where
    S: Sink<Message> + Unpin,
{
    for reply in replies {
        if write.send(Message::Text(reply.to_string().into())).await.is_err() {
            return false;
        }
    }
    true
}

/// Signer producing deterministic ids. Signatures are not checked by the test relay.
pub struct TestSigner;

impl EventSigner for TestSigner {
    fn pubkey(&self) -> String {
        "test-pubkey".to_string()
    }

    fn sign(&self, template: EventTemplate) -> Result<Event, SignerError> {
        Ok(Event {
            id: format!("signed-{}-{}", template.kind, template.created_at),
            pubkey: self.pubkey(),
            created_at: template.created_at,
            kind: template.kind,
            tags: template.tags,
            content: template.content,
            sig: "test-sig".to_string(),
        })
    }
}

pub fn note(id: &str, kind: u16, created_at: u64) -> Event {
    Event {
        id: id.to_string(),
        pubkey: "author".to_string(),
        created_at,
        kind,
        tags: vec![],
        content: format!("note {}", id),
        sig: "sig".to_string(),
    }
}

/// Client on real sockets talking to `relays`.
pub fn client_for(relays: &[&TestRelay]) -> NostrClient {
    let config = ClientConfig::default().with_relays(relays.iter().map(|r| r.url.clone()));
    NostrClient::new(
        config,
        Arc::new(TungsteniteSocketBuilder::new(Duration::from_secs(2))),
        Arc::new(ManualClock::new(1_700_000_000)),
    )
    .unwrap()
}

/// Receive until `pick` returns something, or fail after a timeout.
pub async fn wait_for<T>(
    rx: &mut broadcast::Receiver<ClientEvent>,
    mut pick: impl FnMut(ClientEvent) -> Option<T>,
) -> T {
    let received = timeout(WAIT, async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Some(found) = pick(event) {
                        return found;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => panic!("client event channel closed"),
            }
        }
    })
    .await;
    received.expect("timed out waiting for client event")
}

pub async fn wait_connected(rx: &mut broadcast::Receiver<ClientEvent>, url: &str) {
    wait_for(rx, |event| match event {
        ClientEvent::Connected { relay_url } if relay_url == url => Some(()),
        _ => None,
    })
    .await;
}
