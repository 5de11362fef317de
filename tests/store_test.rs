use chrono::{Duration as ChronoDuration, Utc};
use wavechat::store::{BlobCache, FileStore, PendingStore};
use wavechat::types::message::{Message, MessageStatus, Sender, VoiceData};

fn pending_message(id: &str, age_secs: i64) -> Message {
    Message {
        id: id.to_string(),
        room_id: "r1".to_string(),
        sender: Sender {
            id: "me-1".to_string(),
            name: "tester".to_string(),
        },
        message: format!("text of {id}"),
        created_at: Utc::now() - ChronoDuration::seconds(age_secs),
        status: MessageStatus::Pending,
        reply_to: None,
        voice: Some(VoiceData {
            src: String::new(),
            duration_secs: 3,
            played_by: Vec::new(),
        }),
        upload_progress: 40,
        seen: Vec::new(),
    }
}

#[tokio::test]
async fn pending_records_round_trip_in_creation_order() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path()).await.unwrap();

    let newer = pending_message("t-newer", 10);
    let older = pending_message("t-older", 60);
    store.add_pending("r1", &newer).await.unwrap();
    store.add_pending("r1", &older).await.unwrap();

    let loaded = store.load_pending("r1").await.unwrap();
    assert_eq!(loaded.len(), 2);
    assert_eq!(loaded[0], older);
    assert_eq!(loaded[1], newer);

    // Other rooms are untouched.
    assert!(store.load_pending("r2").await.unwrap().is_empty());

    store.remove_pending("r1", "t-older").await.unwrap();
    let loaded = store.load_pending("r1").await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, "t-newer");

    // Removing a record twice is fine.
    store.remove_pending("r1", "t-older").await.unwrap();
}

#[tokio::test]
async fn pending_records_survive_a_reopen() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    {
        let store = FileStore::new(dir.path()).await.unwrap();
        store
            .add_pending("r1", &pending_message("t-1", 5))
            .await
            .unwrap();
    }

    let reopened = FileStore::new(dir.path()).await.unwrap();
    let loaded = reopened.load_pending("r1").await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].id, "t-1");
    assert_eq!(loaded[0].upload_progress, 40);
}

#[tokio::test]
async fn blobs_round_trip_and_tolerate_missing_keys() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().unwrap();
    let store = FileStore::new(dir.path()).await.unwrap();

    assert_eq!(store.get_blob("v-1").await.unwrap(), None);

    store.save_blob("v-1", &[1, 2, 3, 4]).await.unwrap();
    assert_eq!(store.get_blob("v-1").await.unwrap(), Some(vec![1, 2, 3, 4]));

    store.delete_blob("v-1").await.unwrap();
    assert_eq!(store.get_blob("v-1").await.unwrap(), None);

    // Deleting a missing blob is not an error.
    store.delete_blob("v-1").await.unwrap();
}
