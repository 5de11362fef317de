use crate::store::error::{Result, StoreError};
use crate::store::traits::{BlobCache, PendingStore};
use crate::types::message::Message;
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;

/// JSON-on-disk backend: one file per pending record under
/// `pending/<room>/<temp_id>.json`, one per cached asset under
/// `blobs/<id>.bin`.
pub struct FileStore {
    base_path: PathBuf,
}

impl FileStore {
    pub async fn new(path: impl Into<PathBuf>) -> io::Result<Self> {
        let base_path = path.into();
        let store = Self { base_path };

        fs::create_dir_all(store.path_for("pending")).await?;
        fs::create_dir_all(store.path_for("blobs")).await?;

        Ok(store)
    }

    fn path_for(&self, sub: &str) -> PathBuf {
        self.base_path.join(sub)
    }

    fn sanitize_filename(key: &str) -> String {
        key.replace(|c: char| !c.is_alphanumeric() && c != '.' && c != '-', "_")
    }

    fn pending_dir(&self, room_id: &str) -> PathBuf {
        self.path_for("pending").join(Self::sanitize_filename(room_id))
    }

    fn pending_path(&self, room_id: &str, temp_id: &str) -> PathBuf {
        self.pending_dir(room_id)
            .join(format!("{}.json", Self::sanitize_filename(temp_id)))
    }

    fn blob_path(&self, id: &str) -> PathBuf {
        self.path_for("blobs")
            .join(format!("{}.bin", Self::sanitize_filename(id)))
    }

    async fn read_json(&self, path: &Path) -> Result<Option<Message>> {
        match fs::read(path).await {
            Ok(data) => serde_json::from_slice(&data)
                .map(Some)
                .map_err(|e| StoreError::Serialization(e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn remove_file_if_exists(path: &Path) -> Result<()> {
        fs::remove_file(path)
            .await
            .or_else(|e| {
                if e.kind() == io::ErrorKind::NotFound {
                    Ok(())
                } else {
                    Err(e)
                }
            })
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl PendingStore for FileStore {
    async fn add_pending(&self, room_id: &str, message: &Message) -> Result<()> {
        let dir = self.pending_dir(room_id);
        fs::create_dir_all(&dir).await.map_err(StoreError::Io)?;
        let data = serde_json::to_vec_pretty(message)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        fs::write(self.pending_path(room_id, &message.id), data)
            .await
            .map_err(StoreError::Io)
    }

    async fn remove_pending(&self, room_id: &str, temp_id: &str) -> Result<()> {
        Self::remove_file_if_exists(&self.pending_path(room_id, temp_id)).await
    }

    async fn load_pending(&self, room_id: &str) -> Result<Vec<Message>> {
        let dir = self.pending_dir(room_id);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Io(e)),
        };

        let mut records = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(StoreError::Io)? {
            if let Some(message) = self.read_json(&entry.path()).await? {
                records.push(message);
            }
        }
        records.sort_by_key(|m| m.created_at);
        Ok(records)
    }
}

#[async_trait]
impl BlobCache for FileStore {
    async fn save_blob(&self, id: &str, data: &[u8]) -> Result<()> {
        fs::write(self.blob_path(id), data)
            .await
            .map_err(StoreError::Io)
    }

    async fn get_blob(&self, id: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(self.blob_path(id)).await {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn delete_blob(&self, id: &str) -> Result<()> {
        Self::remove_file_if_exists(&self.blob_path(id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_keeps_safe_chars() {
        assert_eq!(FileStore::sanitize_filename("room-1.a"), "room-1.a");
        assert_eq!(FileStore::sanitize_filename("a/b\\c:d"), "a_b_c_d");
    }
}
