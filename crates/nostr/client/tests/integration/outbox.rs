//! Outbox delivery over real sockets.

use super::*;

fn event_frames_for(relay: &TestRelay, id: &str) -> usize {
    relay
        .frames_of("EVENT")
        .iter()
        .filter(|frame| frame[1]["id"] == id)
        .count()
}

#[tokio::test(flavor = "multi_thread")]
async fn test_event_sent_before_ready_is_delivered_once() {
    let relay = TestRelay::start(RelayOptions::default()).await;
    let client = client_for(&[&relay]);
    let mut rx = client.events();
    client.open().unwrap();
    client.send(note("queued", 1, 10)).unwrap();

    let success = wait_for(&mut rx, |event| match event {
        ClientEvent::SendResponse {
            event_id, success, ..
        } if event_id == "queued" => Some(success),
        _ => None,
    })
    .await;
    assert!(success);

    assert_eq!(event_frames_for(&relay, "queued"), 1);
    assert_eq!(client.pool().relay(&relay.url).unwrap().outbox_len(), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_auth_rejected_event_survives_reconnect() {
    let relay = TestRelay::start(RelayOptions {
        auth_challenge: Some("challenge-a".to_string()),
        ..Default::default()
    })
    .await;
    let client = client_for(&[&relay]);
    let mut rx = client.events();
    client.open().unwrap();
    wait_connected(&mut rx, &relay.url).await;

    client.send(note("kept", 1, 10)).unwrap();
    let message = wait_for(&mut rx, |event| match event {
        ClientEvent::SendResponse {
            event_id,
            success: false,
            message,
            ..
        } if event_id == "kept" => Some(message),
        _ => None,
    })
    .await;
    assert!(message.starts_with("auth-required"));

    let connection = client.pool().relay(&relay.url).unwrap();
    assert_eq!(connection.outbox_len(), 1);

    relay.kick_all();
    wait_for(&mut rx, |event| match event {
        ClientEvent::Disconnected { relay_url } if relay_url == relay.url => Some(()),
        _ => None,
    })
    .await;
    assert_eq!(connection.outbox_len(), 1);

    connection.disconnect();
    connection.connect_if_disconnected();
    wait_connected(&mut rx, &relay.url).await;

    relay
        .wait_for_frames("EVENT", |frames| {
            frames.iter().filter(|frame| frame[1]["id"] == "kept").count() >= 2
        })
        .await;
    assert_eq!(connection.outbox_len(), 1);
}
