use std::time::Duration;

use assert_matches::assert_matches;
use serde_json::json;
use tracing_test::traced_test;

use super::{connect, MockDaemon};
use crate::listener::{NotificationListener, NotificationType};
use crate::testutil::assert_eventually;
use crate::{ClientConfig, OlvidClient, OlvidError};

#[tokio::test]
async fn connect_then_stop_rejects_further_commands() {
    let daemon = MockDaemon::spawn().await;
    daemon.set_response(
        "IdentityGet",
        json!({"identity": {"display_name": "alice"}}),
    );
    let client = connect(&daemon, "root-key").await;

    let identity = client.identity_get().await.unwrap();
    assert_eq!(identity.display_name, "alice");

    client.stop().await;
    assert!(client.is_stopped());
    assert_matches!(
        client.identity_get().await.unwrap_err(),
        OlvidError::ClientStopped
    );
}

#[tokio::test]
async fn child_inherits_parent_key_and_connection() {
    let daemon = MockDaemon::spawn().await;
    let root = connect(&daemon, "root-key").await;

    let child = root.new_child().unwrap();
    assert_eq!(child.client_key(), "root-key");
    assert_eq!(child.server_target(), root.server_target());

    let sibling = root
        .new_child_with(ClientConfig::new().client_key("other-key"))
        .unwrap();
    assert_eq!(sibling.client_key(), "other-key");

    // Calls from a child carry its own key on the shared connection.
    sibling.storage_get("greeting").await.unwrap();
    let requests = daemon.requests_for("StorageGet");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].client_key, "other-key");

    root.stop().await;
}

#[traced_test]
#[tokio::test]
async fn root_stop_cascades_depth_first() {
    let daemon = MockDaemon::spawn().await;
    let root = connect(&daemon, "root-key").await;
    let child_a = root.new_child().unwrap();
    let child_b = root.new_child().unwrap();
    let grandchild = child_a.new_child().unwrap();

    for client in [&root, &child_a, &child_b, &grandchild] {
        client
            .add_listener(NotificationListener::message_received(|_| async {}))
            .unwrap();
    }
    assert_eventually(|| daemon.subscription_count(NotificationType::MessageReceived) == 1).await;

    root.stop().await;
    assert!(root.is_stopped());
    assert!(child_a.is_stopped());
    assert!(child_b.is_stopped());
    assert!(grandchild.is_stopped());
    assert_eventually(|| daemon.subscription_count(NotificationType::MessageReceived) == 0).await;

    // A second stop is a logged no-op.
    root.stop().await;
    assert!(logs_contain("client already stopped"));
}

#[tokio::test]
async fn stopped_client_rejects_new_children() {
    let daemon = MockDaemon::spawn().await;
    let root = connect(&daemon, "root-key").await;
    root.stop().await;
    assert_matches!(root.new_child().unwrap_err(), OlvidError::ParentStopped);
}

#[tokio::test]
async fn child_stop_leaves_the_rest_of_the_tree_running() {
    let daemon = MockDaemon::spawn().await;
    let root = connect(&daemon, "root-key").await;
    let child = root.new_child().unwrap();

    child.stop().await;
    assert!(child.is_stopped());
    assert!(!root.is_stopped());
    assert_matches!(
        child.storage_get("k").await.unwrap_err(),
        OlvidError::ClientStopped
    );
    // The shared connection stays usable.
    root.storage_get("k").await.unwrap();

    root.stop().await;
}

#[tokio::test]
async fn wait_for_listeners_end_returns_on_stop() {
    let daemon = MockDaemon::spawn().await;
    let client = connect(&daemon, "root-key").await;
    client
        .add_listener(NotificationListener::message_received(|_| async {}))
        .unwrap();

    let stopper = client.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        stopper.stop().await;
    });
    tokio::time::timeout(Duration::from_secs(5), client.wait_for_listeners_end())
        .await
        .expect("wait_for_listeners_end should end once the client stops");
}

#[tokio::test]
async fn connect_to_unreachable_daemon_fails() {
    // A bound-then-dropped listener gives a port nothing listens on.
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let result = OlvidClient::connect_with(
        ClientConfig::new()
            .client_key("root-key")
            .server_target(format!("127.0.0.1:{port}")),
    )
    .await;
    assert_matches!(result.unwrap_err(), OlvidError::ConnectionFailed { .. });
}

#[tokio::test]
async fn lost_connection_fails_later_commands() {
    let daemon = MockDaemon::spawn().await;
    let client = connect(&daemon, "root-key").await;
    client.storage_get("k").await.unwrap();

    drop(daemon);
    // The reader task notices the close; commands fail from then on.
    let mut failed = false;
    for _ in 0..100 {
        if client.storage_get("k").await.is_err() {
            failed = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(failed, "commands should fail once the connection is gone");

    client.stop().await;
}
