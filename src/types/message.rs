use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type MessageId = String;

/// Delivery state of a locally visible message. Transitions are forward
/// only: `Pending -> Sent` and `Pending -> Failed`. Nothing leaves a
/// terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Pending,
    Sent,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sender {
    pub id: String,
    pub name: String,
}

/// Snapshot of the message being replied to. This is plain data copied at
/// reply time, not a live link into the room list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplyTarget {
    pub msg_id: MessageId,
    pub message: String,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoiceData {
    /// Remote locator of the uploaded asset. Empty until the upload
    /// completes.
    pub src: String,
    pub duration_secs: u64,
    /// Users that have listened to this voice message at least once.
    pub played_by: Vec<String>,
}

/// A finalized capture ready for the upload pipeline.
#[derive(Debug, Clone)]
pub struct VoiceAsset {
    pub data: Vec<u8>,
    pub duration_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Client-generated temp id until the server acknowledges the send,
    /// then the server id. Swapped exactly once.
    pub id: MessageId,
    pub room_id: String,
    pub sender: Sender,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub status: MessageStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<ReplyTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice: Option<VoiceData>,
    /// Only meaningful while `status == Pending` with a voice upload in
    /// flight. Non-decreasing.
    #[serde(default)]
    pub upload_progress: u8,
    /// Users that have seen this message.
    #[serde(default)]
    pub seen: Vec<String>,
}

impl Message {
    /// Applies a status transition if it is one of the allowed forward
    /// moves. Returns false (leaving the message untouched) otherwise, so
    /// stale callbacks collapse into no-ops at this single choke point.
    pub fn transition(&mut self, next: MessageStatus) -> bool {
        let allowed = matches!(
            (self.status, next),
            (MessageStatus::Pending, MessageStatus::Sent)
                | (MessageStatus::Pending, MessageStatus::Failed)
        );
        if allowed {
            self.status = next;
        }
        allowed
    }

    pub fn is_voice(&self) -> bool {
        self.voice.is_some()
    }
}

/// A chat room as the client observes it. Message order is insertion
/// order, which is also display order.
#[derive(Debug, Clone, Default)]
pub struct Room {
    pub id: String,
    pub messages: Vec<Message>,
}

impl Room {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            messages: Vec::new(),
        }
    }
}
