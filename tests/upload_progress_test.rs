use std::time::Duration;

use wavechat::store::PendingStore;
use wavechat::test_utils::{MockUploader, TestHarnessBuilder};
use wavechat::types::message::{MessageStatus, VoiceAsset};

fn asset(duration_secs: u64) -> VoiceAsset {
    VoiceAsset {
        data: vec![7u8; 2048],
        duration_secs,
    }
}

#[tokio::test(start_paused = true)]
async fn fast_upload_is_stretched_over_the_minimum_duration() {
    let _ = env_logger::builder().is_test(true).try_init();

    // The primitive is done (100%) after half a second.
    let harness = TestHarnessBuilder::new()
        .uploader(MockUploader::new(
            vec![(100, 30.0), (300, 70.0), (500, 100.0)],
            Ok("https://cdn.test/fast.ogg".to_string()),
        ))
        .build()
        .await;
    let client = &harness.client;
    let mut updates = client.event_bus.message_updated.subscribe();

    let temp_id = client
        .send_voice_message("r1", asset(5), None)
        .await
        .unwrap();

    // Just before the minimum window closes, the shown progress is still
    // riding the time ramp, well under the hold ceiling.
    tokio::time::sleep(Duration::from_millis(1900)).await;
    let message = client.find_message("r1", &temp_id).unwrap();
    assert_eq!(message.status, MessageStatus::Pending);
    assert!(message.upload_progress < 95);
    assert!(message.upload_progress > 0);

    // The window closes: progress reaches exactly 100 while the message is
    // still pending (the settle pause is rendering the full bar).
    tokio::time::sleep(Duration::from_millis(200)).await;
    let message = client.find_message("r1", &temp_id).unwrap();
    assert_eq!(message.upload_progress, 100);
    assert_eq!(message.status, MessageStatus::Pending);

    // Settle over, channel round trip done: sent with a server id and the
    // uploaded locator.
    tokio::time::sleep(Duration::from_millis(300)).await;
    let messages = client.room_messages("r1");
    assert_eq!(messages[0].status, MessageStatus::Sent);
    assert_eq!(messages[0].id, "srv-0");
    assert_eq!(
        messages[0].voice.as_ref().unwrap().src,
        "https://cdn.test/fast.ogg"
    );

    // Observed progress never decreased.
    let mut progresses = Vec::new();
    while let Ok(update) = updates.try_recv() {
        progresses.push(update.upload_progress);
    }
    assert!(!progresses.is_empty());
    assert!(progresses.windows(2).all(|w| w[0] <= w[1]));
}

#[tokio::test(start_paused = true)]
async fn slow_upload_settles_without_an_extra_wait() {
    let _ = env_logger::builder().is_test(true).try_init();

    let harness = TestHarnessBuilder::new()
        .uploader(MockUploader::new(
            vec![(2500, 80.0)],
            Ok("https://cdn.test/slow.ogg".to_string()),
        ))
        .build()
        .await;
    let client = &harness.client;

    let temp_id = client
        .send_voice_message("r1", asset(3), None)
        .await
        .unwrap();

    // The transfer outlasted the minimum window, so 100 lands as soon as
    // the primitive returns.
    tokio::time::sleep(Duration::from_millis(2600)).await;
    let message = client.find_message("r1", &temp_id).unwrap();
    assert_eq!(message.upload_progress, 100);
    assert_eq!(message.status, MessageStatus::Pending);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(
        client.room_messages("r1")[0].status,
        MessageStatus::Sent
    );
}

#[tokio::test(start_paused = true)]
async fn upload_failure_is_terminal_and_verbatim() {
    let _ = env_logger::builder().is_test(true).try_init();

    let harness = TestHarnessBuilder::new()
        .uploader(MockUploader::failing("bucket rejected the object"))
        .build()
        .await;
    let client = &harness.client;
    let mut notifications = client.event_bus.notification.subscribe();

    let temp_id = client
        .send_voice_message("r1", asset(4), None)
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    // Failure preempted the progress animation: straight to Failed, no
    // settle, no channel emission.
    let message = client.find_message("r1", &temp_id).unwrap();
    assert_eq!(message.status, MessageStatus::Failed);
    assert!(harness.store.load_pending("r1").await.unwrap().is_empty());
    assert!(harness.sent.lock().unwrap().is_empty());

    // The primitive's error text is surfaced verbatim, once.
    let notification = notifications.try_recv().unwrap();
    assert_eq!(notification.text, "bucket rejected the object");
    assert!(notifications.try_recv().is_err());

    // A still-running send budget cannot resurrect the message.
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(
        client.find_message("r1", &temp_id).unwrap().status,
        MessageStatus::Failed
    );
    assert!(harness.sent.lock().unwrap().is_empty());
}
