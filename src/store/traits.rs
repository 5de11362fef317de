use crate::store::error::Result;
use crate::types::message::Message;
use async_trait::async_trait;

/// Durable mirror of not-yet-confirmed messages, keyed by
/// `(room_id, temp_id)`. Records survive process restarts so an
/// interrupted send can be re-surfaced on the next load.
#[async_trait]
pub trait PendingStore: Send + Sync {
    async fn add_pending(&self, room_id: &str, message: &Message) -> Result<()>;
    async fn remove_pending(&self, room_id: &str, temp_id: &str) -> Result<()>;
    /// All pending records of a room, oldest first.
    async fn load_pending(&self, room_id: &str) -> Result<Vec<Message>>;
}

/// Keyed local storage for downloaded voice assets, enabling offline
/// replay without refetching.
#[async_trait]
pub trait BlobCache: Send + Sync {
    async fn save_blob(&self, id: &str, data: &[u8]) -> Result<()>;
    async fn get_blob(&self, id: &str) -> Result<Option<Vec<u8>>>;
    async fn delete_blob(&self, id: &str) -> Result<()>;
}

/// Combined storage backend the client is constructed with.
pub trait Backend: PendingStore + BlobCache {}

// Blanket implementation for any type that implements both traits
impl<T> Backend for T where T: PendingStore + BlobCache {}
