//! Integration tests for switchboard-client
//!
//! These tests require a running Switchboard endpoint (for example
//! `switchboardd` from the root crate). They are ignored by default and can be
//! run with:
//!
//! ```sh
//! SWITCHBOARD_TEST_URL=ws://127.0.0.1:8080/ws SWITCHBOARD_TEST_KEYS=A-abc123-secret \
//!     cargo test --test integration -- --ignored
//! ```

use std::env;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use switchboard_client::{
    DropOptions, SessionState, SwitchboardClient, SwitchboardConfig, SwitchboardError,
};

fn get_test_config() -> Option<SwitchboardConfig> {
    let url = env::var("SWITCHBOARD_TEST_URL").ok()?;
    let keys = env::var("SWITCHBOARD_TEST_KEYS").ok()?;

    Some(
        SwitchboardConfig::new(url, keys.split(',').map(str::trim))
            .connect_timeout(Duration::from_secs(5))
            .request_timeout(Duration::from_secs(5)),
    )
}

#[tokio::test]
#[ignore = "requires running Switchboard server"]
async fn test_connect_disconnect() {
    let config = get_test_config().expect("SWITCHBOARD_TEST_URL and SWITCHBOARD_TEST_KEYS must be set");
    let client = SwitchboardClient::new(config);

    client.connect().await.expect("Failed to connect");
    assert_eq!(client.connection_state(), SessionState::Ready);
    assert!(client.current_session_uuid().is_some());

    client.disconnect().await.expect("Failed to disconnect");
    assert_eq!(client.connection_state(), SessionState::Closed);
}

#[tokio::test]
#[ignore = "requires running Switchboard server"]
async fn test_subscribe_publish() {
    let config = get_test_config().expect("SWITCHBOARD_TEST_URL and SWITCHBOARD_TEST_KEYS must be set");
    let client = SwitchboardClient::new(config);

    client.connect().await.expect("Failed to connect");

    let received = Arc::new(AtomicUsize::new(0));
    let received_clone = received.clone();

    client
        .subscribe("test.channel", move |record| {
            println!("Received on {}: {}", record.channel, record.message);
            received_clone.fetch_add(1, Ordering::SeqCst);
        })
        .await
        .expect("Subscribe failed");

    let id = client
        .publish_with_ack("test.channel", "hello")
        .await
        .expect("Publish failed");
    assert!(!id.is_empty());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(received.load(Ordering::SeqCst), 1);

    client.unsubscribe("test.channel").await.expect("Unsubscribe failed");
    client.disconnect().await.expect("Failed to disconnect");
}

#[tokio::test]
#[ignore = "requires running Switchboard server"]
async fn test_reconnect() {
    let config = get_test_config()
        .expect("SWITCHBOARD_TEST_URL and SWITCHBOARD_TEST_KEYS must be set")
        .reconnect_delay(Duration::from_millis(100), Duration::from_secs(1));

    let client = SwitchboardClient::new(config);
    client.connect().await.expect("Failed to connect");

    client
        .subscribe("test.reconnect", |_| {})
        .await
        .expect("Subscribe failed");

    client
        .drop_connection(DropOptions::default())
        .await
        .expect("Drop failed");

    let channels = client.list_subscriptions().await.expect("List failed");
    assert_eq!(channels, vec!["test.reconnect".to_string()]);

    client.disconnect().await.expect("Failed to disconnect");
}

#[tokio::test]
#[ignore = "requires running Switchboard server"]
async fn test_invalid_key() {
    let url = env::var("SWITCHBOARD_TEST_URL").expect("SWITCHBOARD_TEST_URL must be set");
    let config = SwitchboardConfig::new(url, ["A-0000-not-the-secret"]);

    let client = SwitchboardClient::new(config);

    let result = client.connect().await;
    match result {
        Err(SwitchboardError::Failure(response)) => assert_eq!(response.code, 401),
        other => panic!("Should fail with 401, got {:?}", other),
    }
    assert_eq!(client.connection_state(), SessionState::Closed);
}

#[tokio::test]
#[ignore = "requires running Switchboard server"]
async fn test_state_changes() {
    let config = get_test_config().expect("SWITCHBOARD_TEST_URL and SWITCHBOARD_TEST_KEYS must be set");
    let client = SwitchboardClient::new(config);

    let mut rx = client.state_receiver();
    assert_eq!(*rx.borrow(), SessionState::Disconnected);

    let client_clone = client.clone();
    let connect_handle = tokio::spawn(async move { client_clone.connect().await });

    let mut seen = Vec::new();
    let timeout = tokio::time::timeout(Duration::from_secs(10), async {
        while rx.changed().await.is_ok() {
            let state = *rx.borrow();
            seen.push(state);
            if state == SessionState::Ready {
                break;
            }
        }
    });
    if timeout.await.is_err() {
        println!("Timeout waiting for state changes");
    }

    connect_handle
        .await
        .expect("Connect task panicked")
        .expect("Connect failed");

    println!("State transitions: {:?}", seen);
    assert_eq!(seen.last(), Some(&SessionState::Ready));

    client.disconnect().await.expect("Disconnect failed");
}
