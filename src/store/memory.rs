use crate::store::error::Result;
use crate::store::traits::{BlobCache, PendingStore};
use crate::types::message::Message;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// In-memory backend. State dies with the process; meant for tests and
/// ephemeral sessions.
#[derive(Default)]
pub struct MemoryStore {
    pending: Mutex<HashMap<(String, String), Message>>,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PendingStore for MemoryStore {
    async fn add_pending(&self, room_id: &str, message: &Message) -> Result<()> {
        self.pending
            .lock()
            .await
            .insert((room_id.to_string(), message.id.clone()), message.clone());
        Ok(())
    }

    async fn remove_pending(&self, room_id: &str, temp_id: &str) -> Result<()> {
        self.pending
            .lock()
            .await
            .remove(&(room_id.to_string(), temp_id.to_string()));
        Ok(())
    }

    async fn load_pending(&self, room_id: &str) -> Result<Vec<Message>> {
        let mut records: Vec<Message> = self
            .pending
            .lock()
            .await
            .iter()
            .filter(|((room, _), _)| room == room_id)
            .map(|(_, message)| message.clone())
            .collect();
        records.sort_by_key(|m| m.created_at);
        Ok(records)
    }
}

#[async_trait]
impl BlobCache for MemoryStore {
    async fn save_blob(&self, id: &str, data: &[u8]) -> Result<()> {
        self.blobs.lock().await.insert(id.to_string(), data.to_vec());
        Ok(())
    }

    async fn get_blob(&self, id: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().await.get(id).cloned())
    }

    async fn delete_blob(&self, id: &str) -> Result<()> {
        self.blobs.lock().await.remove(id);
        Ok(())
    }
}
