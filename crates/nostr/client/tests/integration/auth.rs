//! NIP-42 authentication over real sockets.

use super::*;

#[tokio::test(flavor = "multi_thread")]
async fn test_outbox_flushes_after_authentication() {
    let relay = TestRelay::start(RelayOptions {
        auth_challenge: Some("challenge-b".to_string()),
        ..Default::default()
    })
    .await;
    let client = client_for(&[&relay]);
    let mut rx = client.events();
    client.open().unwrap();

    let challenge = wait_for(&mut rx, |event| match event {
        ClientEvent::Auth { challenge, .. } => Some(challenge),
        _ => None,
    })
    .await;
    assert_eq!(challenge, "challenge-b");

    client.send(note("needs-auth", 1, 10)).unwrap();
    wait_for(&mut rx, |event| match event {
        ClientEvent::SendResponse {
            event_id,
            success: false,
            ..
        } if event_id == "needs-auth" => Some(()),
        _ => None,
    })
    .await;

    let auth = client
        .authenticate(&relay.url, &challenge, &TestSigner)
        .unwrap();
    wait_for(&mut rx, |event| match event {
        ClientEvent::SendResponse {
            event_id,
            success: true,
            ..
        } if event_id == auth.id => Some(()),
        _ => None,
    })
    .await;

    wait_for(&mut rx, |event| match event {
        ClientEvent::SendResponse {
            event_id,
            success: true,
            ..
        } if event_id == "needs-auth" => Some(()),
        _ => None,
    })
    .await;

    assert_eq!(client.pool().relay(&relay.url).unwrap().outbox_len(), 0);
    let auths = relay.frames_of("AUTH");
    assert_eq!(auths.len(), 1);
    assert_eq!(auths[0][1]["kind"], 22242);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_same_challenge_is_answered_once() {
    let relay = TestRelay::start(RelayOptions {
        auth_challenge: Some("challenge-c".to_string()),
        ..Default::default()
    })
    .await;
    let client = client_for(&[&relay]);
    let mut rx = client.events();
    client.open().unwrap();
    let challenge = wait_for(&mut rx, |event| match event {
        ClientEvent::Auth { challenge, .. } => Some(challenge),
        _ => None,
    })
    .await;

    client.authenticate(&relay.url, &challenge, &TestSigner).unwrap();
    relay.wait_for_frames("AUTH", |frames| !frames.is_empty()).await;

    client.authenticate(&relay.url, &challenge, &TestSigner).unwrap();
    sleep(Duration::from_millis(200)).await;
    assert_eq!(relay.frames_of("AUTH").len(), 1);
}
