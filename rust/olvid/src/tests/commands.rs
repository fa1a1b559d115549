use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures_util::TryStreamExt;
use serde_json::json;

use super::{connect, MockDaemon};
use crate::datatypes::MessageFilter;
use crate::listener::NotificationType;
use crate::testutil::assert_eventually;
use crate::{Command, OlvidBot};

fn message_payload(body: &str) -> serde_json::Value {
    json!({
        "message": {
            "id": {"id": 1, "outbound": false},
            "discussion_id": 7,
            "body": body,
        }
    })
}

#[tokio::test]
async fn commands_fire_on_matching_bodies_only() {
    let daemon = MockDaemon::spawn().await;
    let bot = OlvidBot::from_client("echo-bot", connect(&daemon, "bot-key").await);

    let counter = Arc::new(AtomicUsize::new(0));
    let seen = counter.clone();
    bot.add_command(
        Command::new("^!echo", move |_| {
            let seen = seen.clone();
            async move {
                seen.fetch_add(1, Ordering::SeqCst);
            }
        })
        .unwrap(),
    )
    .unwrap();
    assert_eventually(|| daemon.subscription_count(NotificationType::MessageReceived) == 1).await;

    daemon.push_notification(NotificationType::MessageReceived, message_payload("!echo hi"));
    daemon.push_notification(NotificationType::MessageReceived, message_payload("hello"));
    daemon.push_notification(NotificationType::MessageReceived, message_payload("!echo bye"));
    assert_eventually(|| counter.load(Ordering::SeqCst) == 2).await;

    assert!(bot.is_message_body_a_valid_command("!echo now"));
    assert!(!bot.is_message_body_a_valid_command("nope"));

    bot.stop().await;
}

#[tokio::test]
async fn bot_wiring_opens_one_stream_for_all_message_handlers() {
    let daemon = MockDaemon::spawn().await;
    let bot = OlvidBot::from_client("bot", connect(&daemon, "bot-key").await);

    let help = bot.add_command(Command::new("^!help", |_| async {}).unwrap()).unwrap();
    let ping = bot.add_command(Command::new("^!ping", |_| async {}).unwrap()).unwrap();
    let all = bot.on_message_received(|_| async {}).unwrap();
    assert_eventually(|| daemon.subscription_count(NotificationType::MessageReceived) == 1).await;
    assert_eq!(daemon.requests_for("SubscribeToMessageReceived").len(), 1);

    bot.remove_command(&help).await;
    bot.remove_command(&ping).await;
    assert!(!bot.is_message_body_a_valid_command("!help"));
    bot.remove_listener(&all).await;
    assert_eventually(|| daemon.subscription_count(NotificationType::MessageReceived) == 0).await;

    bot.stop().await;
}

#[tokio::test]
async fn message_send_round_trip() {
    let daemon = MockDaemon::spawn().await;
    daemon.set_response(
        "MessageSend",
        json!({"message": {
            "id": {"id": 42, "outbound": true},
            "discussion_id": 7,
            "body": "hello",
        }}),
    );
    let client = connect(&daemon, "root-key").await;

    let message = client.message_send(7, "hello").await.unwrap();
    assert_eq!(message.id.id, 42);
    assert!(message.id.outbound);
    assert_eq!(message.body, "hello");

    let requests = daemon.requests_for("MessageSend");
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].client_key, "root-key");
    assert_eq!(requests[0].params["discussion_id"], 7);
    assert_eq!(requests[0].params["body"], "hello");

    client.stop().await;
}

#[tokio::test]
async fn message_list_flattens_page_frames() {
    let daemon = MockDaemon::spawn().await;
    daemon.set_pages(
        "MessageList",
        vec![
            json!({"messages": [
                {"id": {"id": 1, "outbound": false}, "discussion_id": 7, "body": "a"},
                {"id": {"id": 2, "outbound": false}, "discussion_id": 7, "body": "b"},
            ]}),
            json!({"messages": []}),
            json!({"messages": [
                {"id": {"id": 3, "outbound": true}, "discussion_id": 7, "body": "c"},
            ]}),
        ],
    );
    let client = connect(&daemon, "root-key").await;

    let messages: Vec<_> = client
        .message_list(&MessageFilter {
            discussion_id: Some(7),
            ..MessageFilter::default()
        })
        .unwrap()
        .try_collect()
        .await
        .unwrap();
    assert_eq!(messages.len(), 3);
    assert_eq!(messages[0].body, "a");
    assert_eq!(messages[2].body, "c");

    client.stop().await;
}

#[tokio::test]
async fn storage_round_trip_reports_previous_values() {
    let daemon = MockDaemon::spawn().await;
    daemon.set_response("StorageGet", json!({}));
    daemon.set_response("StorageSet", json!({"value": "old"}));
    daemon.set_response("StorageUnset", json!({"value": "new"}));
    let client = connect(&daemon, "root-key").await;

    assert_eq!(client.storage_get("greeting").await.unwrap(), None);
    assert_eq!(
        client.storage_set("greeting", "new").await.unwrap(),
        Some("old".to_string())
    );
    assert_eq!(
        client.storage_unset("greeting").await.unwrap(),
        Some("new".to_string())
    );

    client.stop().await;
}
