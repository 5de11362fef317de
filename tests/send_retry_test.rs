use std::time::Duration;

use wavechat::request::ChannelEvent;
use wavechat::store::PendingStore;
use wavechat::test_utils::{
    TestHarnessBuilder, ack_failure, ack_failures_then_success, ack_silence,
};
use wavechat::types::message::{MessageStatus, ReplyTarget};

#[tokio::test(start_paused = true)]
async fn text_message_reconciles_temp_id_on_ack() {
    let _ = env_logger::builder().is_test(true).try_init();

    let harness = TestHarnessBuilder::new().build().await;
    let client = &harness.client;
    let mut updates = client.event_bus.message_updated.subscribe();

    let reply = ReplyTarget {
        msg_id: "orig-1".into(),
        message: "earlier text".into(),
        username: "counterpart".into(),
    };
    let temp_id = client
        .send_text_message("r1", "hello", Some(reply))
        .await
        .unwrap();

    // Optimistic state: visible immediately, durable, pending.
    let messages = client.room_messages("r1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, temp_id);
    assert_eq!(messages[0].status, MessageStatus::Pending);
    assert_eq!(harness.store.load_pending("r1").await.unwrap().len(), 1);

    // Reconciliation: one update carrying the server id and Sent together.
    let updated = updates.recv().await.unwrap();
    assert_eq!(updated.status, MessageStatus::Sent);
    assert_eq!(updated.id, "srv-0");

    let messages = client.room_messages("r1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].id, "srv-0");
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert!(harness.store.load_pending("r1").await.unwrap().is_empty());

    // The emit carried the temp id and the reply snapshot.
    let sent = harness.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    match &sent[0].event {
        ChannelEvent::NewMessage(payload) => {
            assert_eq!(payload.temp_id, temp_id);
            assert_eq!(
                payload.reply_data.as_ref().unwrap().msg_id,
                "orig-1".to_string()
            );
        }
        other => panic!("unexpected event emitted: {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn failure_acks_retry_until_the_budget_then_stop() {
    let _ = env_logger::builder().is_test(true).try_init();

    let harness = TestHarnessBuilder::new().responder(ack_failure()).build().await;
    let client = &harness.client;
    let mut notifications = client.event_bus.notification.subscribe();

    let temp_id = client.send_text_message("r1", "hello", None).await.unwrap();

    tokio::time::sleep(Duration::from_secs(31)).await;

    // One initial emit plus fifteen retries spaced two seconds apart.
    assert_eq!(harness.sent.lock().unwrap().len(), 16);

    let message = client.find_message("r1", &temp_id).unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert!(harness.store.load_pending("r1").await.unwrap().is_empty());

    // Exactly one user-visible failure notification.
    assert!(notifications.try_recv().is_ok());
    assert!(notifications.try_recv().is_err());

    // Terminal means terminal: nothing more is emitted.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(harness.sent.lock().unwrap().len(), 16);
}

#[tokio::test(start_paused = true)]
async fn silent_server_fails_within_the_budget_window() {
    let _ = env_logger::builder().is_test(true).try_init();

    let harness = TestHarnessBuilder::new().responder(ack_silence()).build().await;
    let client = &harness.client;

    let temp_id = client.send_text_message("r1", "hello", None).await.unwrap();

    // Still pending just before the budget runs out.
    tokio::time::sleep(Duration::from_secs(29)).await;
    assert_eq!(
        client.find_message("r1", &temp_id).unwrap().status,
        MessageStatus::Pending
    );

    // Failed within the 30..=32s window.
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(
        client.find_message("r1", &temp_id).unwrap().status,
        MessageStatus::Failed
    );
}

#[tokio::test(start_paused = true)]
async fn retries_reuse_the_identical_payload() {
    let _ = env_logger::builder().is_test(true).try_init();

    let harness = TestHarnessBuilder::new()
        .responder(ack_failures_then_success(3))
        .build()
        .await;
    let client = &harness.client;

    let temp_id = client.send_text_message("r1", "hello", None).await.unwrap();
    tokio::time::sleep(Duration::from_secs(10)).await;

    let sent = harness.sent.lock().unwrap();
    assert_eq!(sent.len(), 4);
    for frame in sent.iter() {
        match &frame.event {
            ChannelEvent::NewMessage(payload) => {
                assert_eq!(payload.temp_id, temp_id);
                assert_eq!(payload.message, "hello");
            }
            other => panic!("unexpected event emitted: {other:?}"),
        }
    }
    drop(sent);

    let message = client.find_message("r1", &temp_id);
    assert!(message.is_none(), "temp id should be gone after the swap");
    assert_eq!(
        client.room_messages("r1")[0].status,
        MessageStatus::Sent
    );
}

#[tokio::test(start_paused = true)]
async fn pending_records_are_recovered_and_resumed_after_restart() {
    let _ = env_logger::builder().is_test(true).try_init();

    // First life: the server never answers, then the process goes away.
    let first = TestHarnessBuilder::new().responder(ack_silence()).build().await;
    let temp_id = first
        .client
        .send_text_message("r1", "resurrect me", None)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    first.client.shutdown().await;

    assert_eq!(first.store.load_pending("r1").await.unwrap().len(), 1);

    // Second life over the same store: the record is re-surfaced and the
    // send resumes with a fresh budget.
    let second = TestHarnessBuilder::new()
        .store(first.store.clone())
        .build()
        .await;
    let resumed = second.client.recover_pending("r1").await.unwrap();
    assert_eq!(resumed, 1);

    // A duplicate recovery is a no-op.
    assert_eq!(second.client.recover_pending("r1").await.unwrap(), 0);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let messages = second.client.room_messages("r1");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert_ne!(messages[0].id, temp_id);
    assert!(second.store.load_pending("r1").await.unwrap().is_empty());
}
