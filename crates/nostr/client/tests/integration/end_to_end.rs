//! Subscriptions over real sockets.

use super::*;

#[tokio::test(flavor = "multi_thread")]
async fn test_stored_events_then_eose_then_live() {
    let relay = TestRelay::start(RelayOptions {
        stored: vec![note("old-1", 1, 100), note("old-7", 7, 100)],
        ..Default::default()
    })
    .await;
    let client = client_for(&[&relay]);
    let mut rx = client.events();
    client.open().unwrap();
    wait_connected(&mut rx, &relay.url).await;

    let sub = client
        .subscribe(vec![Filter::new().kinds([1]).into()])
        .unwrap();

    let (id, after_eose) = wait_for(&mut rx, |event| match event {
        ClientEvent::Event {
            event, after_eose, ..
        } => Some((event.id, after_eose)),
        _ => None,
    })
    .await;
    assert_eq!(id, "old-1");
    assert!(!after_eose);

    wait_for(&mut rx, |event| match event {
        ClientEvent::AllEose { subscription_id } if subscription_id == sub => Some(()),
        _ => None,
    })
    .await;
    assert!(client.registry().is_after_eose(&sub, &relay.url));

    client.send(note("live-1", 1, 200)).unwrap();
    let (id, after_eose) = wait_for(&mut rx, |event| match event {
        ClientEvent::Event {
            event, after_eose, ..
        } => Some((event.id, after_eose)),
        _ => None,
    })
    .await;
    assert_eq!(id, "live-1");
    assert!(after_eose);

    let cache = client.cache();
    assert!(cache.contains_key("old-1"));
    assert!(cache.contains_key("live-1"));
    assert!(!cache.contains_key("old-7"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_dismiss_sends_close() {
    let relay = TestRelay::start(RelayOptions::default()).await;
    let client = client_for(&[&relay]);
    let mut rx = client.events();
    client.open().unwrap();
    wait_connected(&mut rx, &relay.url).await;

    let sub = client
        .subscribe(vec![Filter::new().kinds([1]).into()])
        .unwrap();
    relay.wait_for_frames("REQ", |frames| !frames.is_empty()).await;

    assert!(client.dismiss_subscription(&sub).unwrap());
    let closes = relay.wait_for_frames("CLOSE", |frames| !frames.is_empty()).await;
    assert_eq!(closes[0][1], sub.as_str());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_subscriptions_are_reissued_after_reconnect() {
    let relay = TestRelay::start(RelayOptions::default()).await;
    let client = client_for(&[&relay]);
    let mut rx = client.events();
    client.open().unwrap();
    wait_connected(&mut rx, &relay.url).await;

    let sub = client
        .subscribe(vec![Filter::new().kinds([1]).into()])
        .unwrap();
    wait_for(&mut rx, |event| match event {
        ClientEvent::Eose { subscription_id, .. } if subscription_id == sub => Some(()),
        _ => None,
    })
    .await;

    relay.kick_all();
    wait_for(&mut rx, |event| match event {
        ClientEvent::Disconnected { relay_url } if relay_url == relay.url => Some(()),
        _ => None,
    })
    .await;
    assert!(!client.registry().is_after_eose(&sub, &relay.url));

    // An explicit disconnect lifts the cooldown.
    let connection = client.pool().relay(&relay.url).unwrap();
    connection.disconnect();
    connection.connect_if_disconnected();
    wait_connected(&mut rx, &relay.url).await;

    let reqs = relay.wait_for_frames("REQ", |frames| frames.len() >= 2).await;
    assert!(reqs.iter().all(|frame| frame[1] == sub.as_str()));
    assert_eq!(relay.connections(), 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_count_reports_matches() {
    let relay = TestRelay::start(RelayOptions {
        stored: vec![note("a", 1, 1), note("b", 1, 2), note("c", 3, 3)],
        ..Default::default()
    })
    .await;
    let client = client_for(&[&relay]);
    let mut rx = client.events();
    client.open().unwrap();
    wait_connected(&mut rx, &relay.url).await;

    let counted = std::sync::Arc::new(parking_lot::Mutex::new(None));
    struct CountListener(std::sync::Arc<parking_lot::Mutex<Option<u64>>>);
    impl nostr_client::RelayListener for CountListener {
        fn on_count(&self, _: &nostr_client::RelayConnection, _: &str, count: u64) {
            *self.0.lock() = Some(count);
        }
    }
    client
        .pool()
        .add_listener(std::sync::Arc::new(CountListener(counted.clone())));

    client
        .count(vec![Filter::new().kinds([1]).into()])
        .unwrap();

    let result = timeout(WAIT, async {
        loop {
            if let Some(count) = *counted.lock() {
                return count;
            }
            sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(result, 2);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_send_and_wait_then_fetch_it_back() {
    let relay = TestRelay::start(RelayOptions::default()).await;
    let client = client_for(&[&relay]);
    let mut rx = client.events();
    client.open().unwrap();
    wait_connected(&mut rx, &relay.url).await;

    let confirmations = client.send_and_wait(note("pub-1", 1, 300), WAIT).await.unwrap();
    assert_eq!(confirmations.len(), 1);
    assert!(confirmations[0].accepted);
    assert_eq!(confirmations[0].relay_url, relay.url);

    let found = client
        .fetch_first_event(vec![Filter::new().kinds([1]).into()], WAIT)
        .await
        .unwrap();
    assert_eq!(found.map(|event| event.id), Some("pub-1".to_string()));
    assert!(client.subscriptions().is_empty());
}
