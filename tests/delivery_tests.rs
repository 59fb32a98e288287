// Delivery coordinator tests
// Sends, history loads and push deliveries all land in one store; these
// tests check that each message shows up exactly once and in order.

mod common;
use common::{ids, joined_client, message, user, wait_for_messages};

use serde_json::json;

use marketchat::api::ApiError;
use marketchat::delivery::{SendError, ValidationError};
use marketchat::transport::events;
use marketchat::{ChatError, DeliveryStatus};

#[tokio::test]
async fn test_send_requires_counterpart_and_content() {
    let (client, _transport, api) = joined_client("u1").await;

    match client.send("Hello").await {
        Err(ChatError::Validation(ValidationError::NoCounterpart)) => {}
        Err(other) => panic!("unexpected error {:?}", other),
        Ok(_) => panic!("send without an open conversation should fail"),
    }

    client.open(&user("u2")).await.unwrap();
    for blank in ["", "   ", "\n\t"] {
        match client.send(blank).await {
            Err(ChatError::Validation(ValidationError::EmptyContent)) => {}
            Err(other) => panic!("unexpected error {:?}", other),
            Ok(_) => panic!("blank content {:?} should be rejected", blank),
        }
    }

    assert!(api.writes().is_empty(), "no write may be issued for invalid input");
    client.logout().await;
}

#[tokio::test]
async fn test_confirmed_send_is_stored_and_relayed() {
    let (client, transport, api) = joined_client("u1").await;
    client.open(&user("u2")).await.unwrap();

    let outgoing = client.send("Can you do it by Friday?").await.unwrap();
    let pending = outgoing.pending().clone();
    assert_eq!(pending.status, DeliveryStatus::Sending);
    assert_eq!(pending.receiver_id, user("u2"));
    assert!(!pending.local_id.is_empty());

    let (settled, confirmed) = outgoing.settle().await;
    let confirmed = confirmed.expect("write should succeed");
    assert_eq!(settled.status, DeliveryStatus::Sent);
    assert_eq!(settled.local_id, pending.local_id);
    assert_eq!(confirmed.id.as_str(), "m101");
    assert_eq!(ids(&client.messages(&user("u2")).await), vec!["m101"]);

    let writes = api.writes();
    assert_eq!(writes.len(), 1);
    assert_eq!(writes[0].sender_id, user("u1"));
    assert_eq!(writes[0].content, "Can you do it by Friday?");

    let relayed = transport.emitted_named(events::SEND_MESSAGE);
    assert_eq!(relayed.len(), 1);
    assert_eq!(relayed[0]["_id"], json!("m101"));
    assert_eq!(relayed[0]["receiverId"], json!("u2"));

    client.logout().await;
}

#[tokio::test]
async fn test_failed_write_leaves_store_unchanged() {
    let (client, transport, api) = joined_client("u1").await;
    api.set_history("u2", vec![message("m1", "u2", "u1", 1, "Hi")]);
    client.open(&user("u2")).await.unwrap();

    api.next_write(Err(ApiError::Network("connection reset".to_string())));
    let outgoing = client.send("Are you there?").await.unwrap();
    let (pending, result) = outgoing.settle().await;
    match result {
        Err(SendError::Write(ApiError::Network(detail))) => assert_eq!(detail, "connection reset"),
        other => panic!("expected a write failure, got {:?}", other),
    }
    // Kept for a resubmit
    assert_eq!(pending.status, DeliveryStatus::Failed);
    assert_eq!(pending.content, "Are you there?");

    assert_eq!(ids(&client.messages(&user("u2")).await), vec!["m1"]);
    assert!(transport.emitted_named(events::SEND_MESSAGE).is_empty());
    client.logout().await;
}

#[tokio::test]
async fn test_write_for_other_conversation_is_rejected() {
    let (client, _transport, api) = joined_client("u1").await;
    client.open(&user("u2")).await.unwrap();

    api.next_write(Ok(message("m9", "u1", "u3", 9, "wrong room")));
    let outgoing = client.send("Hello").await.unwrap();
    assert_eq!(outgoing.confirmed().await, Err(SendError::Mismatch("m9".to_string())));

    assert!(client.messages(&user("u2")).await.is_empty());
    assert!(client.messages(&user("u3")).await.is_empty());
    client.logout().await;
}

#[tokio::test]
async fn test_history_then_push_and_push_then_history_agree() {
    let history = vec![
        message("m1", "u2", "u1", 1, "Hi, is this still for sale?"),
        message("m2", "u1", "u2", 2, "Yes"),
    ];
    let pushed = [message("m2", "u1", "u2", 2, "Yes"), message("m3", "u2", "u1", 3, "Great")];

    // History first
    let (first, first_transport, first_api) = joined_client("u1").await;
    first_api.set_history("u2", history.clone());
    first.open(&user("u2")).await.unwrap();
    for m in &pushed {
        first_transport.push_message(m).await;
    }
    assert!(wait_for_messages(&first, "u2", 3).await);

    // Pushes first
    let (second, second_transport, second_api) = joined_client("u1").await;
    second_api.set_history("u2", history);
    for m in &pushed {
        second_transport.push_message(m).await;
    }
    assert!(wait_for_messages(&second, "u2", 2).await);
    let merged = second.open(&user("u2")).await.unwrap();

    assert_eq!(ids(&merged), vec!["m1", "m2", "m3"]);
    assert_eq!(ids(&first.messages(&user("u2")).await), ids(&merged));

    first.logout().await;
    second.logout().await;
}

#[tokio::test]
async fn test_out_of_order_pushes_are_sorted_by_time() {
    let (client, transport, _api) = joined_client("u1").await;

    transport.push_message(&message("m3", "u2", "u1", 30, "third")).await;
    transport.push_message(&message("m1", "u2", "u1", 10, "first")).await;
    transport.push_message(&message("m2", "u2", "u1", 20, "second")).await;

    assert!(wait_for_messages(&client, "u2", 3).await);
    assert_eq!(ids(&client.messages(&user("u2")).await), vec!["m1", "m2", "m3"]);
    client.logout().await;
}

#[tokio::test]
async fn test_push_between_other_users_is_ignored() {
    let (client, transport, _api) = joined_client("u1").await;

    transport.push_message(&message("m5", "u2", "u3", 5, "not for you")).await;
    transport.push_message(&message("m6", "u2", "u1", 6, "for you")).await;

    assert!(wait_for_messages(&client, "u2", 1).await);
    assert!(client.messages(&user("u3")).await.is_empty());
    assert!(client.contacts().await.iter().all(|c| c.user_id != user("u3")));
    client.logout().await;
}

#[tokio::test]
async fn test_history_failure_keeps_conversation_open() {
    let (client, _transport, api) = joined_client("u1").await;
    api.fail_history(ApiError::Status {
        status: 500,
        body: "boom".to_string(),
    });

    match client.open(&user("u2")).await {
        Err(ChatError::Api(ApiError::Status { status, .. })) => assert_eq!(status, 500),
        other => panic!("expected the history failure, got {:?}", other),
    }
    assert_eq!(client.active_contact().await, Some(user("u2")));
    client.logout().await;
}
