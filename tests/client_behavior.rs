//! Integration tests for the pulsewire client library.
//!
//! These exercise the public API without a live server: channel and binding
//! bookkeeping, client-event gating, and configuration. End-to-end flows
//! against a real service reuse the same surface with `connect()` first.

use pulsewire::{
    AuthStrategy, ChannelType, ConnectionState, PulseClient, PulseError, PulseOptions,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn create_test_client() -> PulseClient {
    let options = PulseOptions::new()
        .host("127.0.0.1")
        .port(6001)
        .encrypted(false);

    PulseClient::new("app-key", options).expect("Failed to create client")
}

// ============================================================================
// Client construction
// ============================================================================

#[tokio::test]
async fn test_client_creation() {
    let client = create_test_client();

    assert_eq!(client.key(), "app-key");
    assert_eq!(client.state(), ConnectionState::Disconnected);
    assert!(client.socket_id().is_none());
    assert!(!client.is_connected());
}

#[tokio::test]
async fn test_client_requires_key() {
    assert!(PulseClient::new("", PulseOptions::new()).is_err());
}

#[tokio::test]
async fn test_clients_have_unique_session_ids() {
    let client1 = create_test_client();
    let client2 = create_test_client();
    assert_ne!(client1.session_id(), client2.session_id());
}

// ============================================================================
// Channel registry bookkeeping
// ============================================================================

#[tokio::test]
async fn test_registry_tracks_subscribe_and_unsubscribe() {
    let client = create_test_client();

    client.subscribe("channel-1").unwrap();
    client.subscribe("channel-2").unwrap();
    client.subscribe("channel-3").unwrap();
    assert_eq!(client.all_channels().len(), 3);

    // Repeated subscribe reuses the channel object
    client.subscribe("channel-2").unwrap();
    assert_eq!(client.all_channels().len(), 3);

    client.unsubscribe("channel-1");
    client.unsubscribe("channel-3");
    assert_eq!(client.all_channels().len(), 1);
    assert!(client.channel("channel-2").is_some());
}

#[tokio::test]
async fn test_channel_type_detection() {
    let client = create_test_client();

    assert_eq!(
        client.subscribe("plain").unwrap().channel_type(),
        ChannelType::Public
    );
    assert_eq!(
        client.subscribe("private-orders").unwrap().channel_type(),
        ChannelType::Private
    );

    let presence = client
        .subscribe_presence("presence-room", None, None)
        .unwrap();
    assert_eq!(presence.name(), "presence-room");
    assert_eq!(presence.member_count(), 0);
}

#[tokio::test]
async fn test_presence_requires_prefix() {
    let client = create_test_client();
    assert!(client.subscribe_presence("private-room", None, None).is_err());
}

#[tokio::test]
async fn test_invalid_channel_name_rejected() {
    let client = create_test_client();
    assert!(client.subscribe("#invalid").is_err());
}

// ============================================================================
// Event bindings
// ============================================================================

#[tokio::test]
async fn test_channel_binding_ids_are_stable() {
    let client = create_test_client();
    let channel = client.subscribe("events").unwrap();

    let id1 = channel.bind("a", |_| {});
    let id2 = channel.bind("a", |_| {});
    assert_ne!(id1, id2);

    channel.unbind(id1);
    channel.unbind_all();
}

#[tokio::test]
async fn test_global_unbind_by_id() {
    let client = create_test_client();
    let counter = Arc::new(AtomicUsize::new(0));
    let counter_clone = counter.clone();

    let id = client.bind_global(move |_| {
        counter_clone.fetch_add(1, Ordering::SeqCst);
    });
    client.unbind(id);
    client.unbind_all();
}

// ============================================================================
// Client event gating
// ============================================================================

#[tokio::test]
async fn test_client_event_rejected_on_public_channel() {
    let client = create_test_client();
    client.subscribe("news").unwrap();

    let result = client.trigger("news", "client-foo", serde_json::json!({}));
    assert!(matches!(
        result,
        Err(PulseError::InvalidClientEvent { .. })
    ));
}

#[tokio::test]
async fn test_client_event_buffered_before_subscription() {
    let client = create_test_client();
    client.subscribe("private-x").unwrap();

    // Not yet subscribed: buffered, not written
    let sent = client
        .trigger("private-x", "client-foo", serde_json::json!({"a": 1}))
        .unwrap();
    assert!(!sent);
}

#[tokio::test]
async fn test_client_event_requires_prefix() {
    let client = create_test_client();
    client.subscribe("private-x").unwrap();

    assert!(client
        .trigger("private-x", "not-client", serde_json::json!({}))
        .is_err());
}

// ============================================================================
// Options
// ============================================================================

#[tokio::test]
async fn test_ws_url_shape() {
    let options = PulseOptions::new()
        .host("localhost")
        .port(6001)
        .encrypted(false);
    let url = options.ws_url("app-key");

    assert!(url.starts_with("ws://localhost:6001/app/app-key"));
    assert!(url.contains("protocol=7"));
    assert!(url.contains("client=pulsewire-rust"));
}

#[tokio::test]
async fn test_auth_strategy_configuration() {
    let options = PulseOptions::new()
        .auth(AuthStrategy::endpoint("http://localhost:3000/auth"))
        .max_reconnect_attempts(5)
        .max_reconnect_gap_seconds(10)
        .auto_reconnect(true);

    let client = PulseClient::new("app-key", options).unwrap();
    assert_eq!(client.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_invalid_auth_endpoint_rejected() {
    let options = PulseOptions::new().auth_endpoint("not a url");
    assert!(PulseClient::new("app-key", options).is_err());
}

// ============================================================================
// Disconnect bookkeeping
// ============================================================================

#[tokio::test]
async fn test_disconnect_keeps_channels_registered() {
    let client = create_test_client();
    client.subscribe("durable").unwrap();

    client.disconnect().await;

    assert_eq!(client.state(), ConnectionState::Disconnected);
    let channel = client.channel("durable").unwrap();
    assert!(!channel.is_subscribed());
}
