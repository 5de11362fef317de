use crate::client::Client;
use crate::types::message::{Message, ReplyTarget, Sender, VoiceData};
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::timeout;

// Additional imports for temp id generation
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};

/// Payload of a `newMessage` emit. Retries reuse the identical payload,
/// temp id included, so the server can deduplicate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessagePayload {
    pub room_id: String,
    pub message: String,
    pub sender: Sender,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_data: Option<ReplyTarget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_data: Option<VoiceData>,
    pub temp_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeenPayload {
    pub seen_by: String,
    pub sender: Sender,
    pub msg_id: String,
    pub room_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenPayload {
    pub user_id: String,
    pub voice_id: String,
    pub room_id: String,
}

/// Events the client emits over the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ChannelEvent {
    NewMessage(NewMessagePayload),
    SeenMsg(SeenPayload),
    ListenToVoice(ListenPayload),
}

/// Client -> server envelope. `ack_id` is present when the client expects
/// an acknowledgment for this emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ack_id: Option<String>,
    #[serde(flatten)]
    pub event: ChannelEvent,
}

/// Acknowledgment for a correlated emit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendAck {
    pub ack_id: String,
    pub success: bool,
    /// Server-issued message id, present on successful message sends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

/// Events the server pushes without the client asking.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    NewMessage(Message),
}

/// Server -> client frame: an ack for a previous emit, or a pushed event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerFrame {
    Ack(SendAck),
    Event(ServerEvent),
}

/// Custom error types for channel emits.
#[derive(Debug, Error)]
pub enum AckError {
    #[error("Acknowledgment timed out")]
    Timeout,
    #[error("Client is not connected")]
    NotConnected,
    #[error("Transport error: {0}")]
    Transport(anyhow::Error),
    #[error("Failed to encode frame: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Internal channel closed unexpectedly")]
    ChannelClosed,
}

impl Client {
    /// Generates a new unique correlation id string.
    pub(crate) fn generate_request_id(&self) -> String {
        let count = self
            .id_counter
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        format!("{}-{}", self.unique_id, count)
    }

    /// Generates a temp id for an optimistic message: a hash over the
    /// current time, the sender, and fresh randomness, so ids stay unique
    /// across rooms and reloads without any coordination.
    pub(crate) fn generate_temp_id(&self) -> String {
        let mut data = Vec::with_capacity(8 + self.me.id.len() + 16);

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        data.extend_from_slice(&timestamp.to_be_bytes());
        data.extend_from_slice(self.me.id.as_bytes());

        let mut random_bytes = [0u8; 16];
        rand::rng().fill_bytes(&mut random_bytes);
        data.extend_from_slice(&random_bytes);

        let hash = Sha256::digest(&data);
        hex::encode(&hash[..12]).to_uppercase()
    }

    /// Emits an event over the channel and asynchronously waits for its
    /// acknowledgment. A missing transport, a send error, and a silent
    /// server all surface as errors the retry loop treats alike.
    pub(crate) async fn emit_with_ack(&self, event: ChannelEvent) -> Result<SendAck, AckError> {
        let ack_id = self.generate_request_id();

        let (tx, rx) = tokio::sync::oneshot::channel();
        self.response_waiters
            .lock()
            .await
            .insert(ack_id.clone(), tx);

        let frame = ClientFrame {
            ack_id: Some(ack_id.clone()),
            event,
        };
        if let Err(e) = self.send_frame(&frame).await {
            self.response_waiters.lock().await.remove(&ack_id);
            return Err(e);
        }

        match timeout(self.config.ack_timeout, rx).await {
            Ok(Ok(ack)) => Ok(ack),
            Ok(Err(_)) => Err(AckError::ChannelClosed),
            Err(_) => {
                self.response_waiters.lock().await.remove(&ack_id);
                Err(AckError::Timeout)
            }
        }
    }

    /// Fire-and-forget emit for notify-style events (seen, listened).
    pub(crate) async fn emit_event(&self, event: ChannelEvent) -> Result<(), AckError> {
        self.send_frame(&ClientFrame {
            ack_id: None,
            event,
        })
        .await
    }

    async fn send_frame(&self, frame: &ClientFrame) -> Result<(), AckError> {
        let transport = { self.transport.lock().await.clone() };
        let transport = transport.ok_or(AckError::NotConnected)?;
        let data = serde_json::to_vec(frame)?;
        transport.send(&data).await.map_err(AckError::Transport)
    }

    /// Routes an incoming ack to the waiting emit. Returns false when no
    /// waiter is registered (e.g. the emit already timed out).
    pub(crate) async fn handle_ack(&self, ack: SendAck) -> bool {
        if let Some(waiter) = self.response_waiters.lock().await.remove(&ack.ack_id) {
            if waiter.send(ack).is_err() {
                warn!(target: "Client/Channel", "Ack receiver dropped before delivery");
            }
            return true;
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::message::{MessageStatus, Sender};
    use chrono::Utc;

    #[test]
    fn client_frame_round_trips() {
        let frame = ClientFrame {
            ack_id: Some("1.2-0".into()),
            event: ChannelEvent::NewMessage(NewMessagePayload {
                room_id: "r1".into(),
                message: "hello".into(),
                sender: Sender {
                    id: "u1".into(),
                    name: "user".into(),
                },
                reply_data: None,
                voice_data: None,
                temp_id: "T1".into(),
            }),
        };
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"event\":\"newMessage\""));
        assert!(json.contains("\"tempId\":\"T1\""));
        let back: ClientFrame = serde_json::from_str(&json).unwrap();
        assert_eq!(back, frame);
    }

    #[test]
    fn server_frame_distinguishes_acks_from_events() {
        let ack: ServerFrame =
            serde_json::from_str(r#"{"ackId":"1.2-0","success":true,"id":"srv-9"}"#).unwrap();
        assert!(matches!(
            ack,
            ServerFrame::Ack(SendAck { success: true, .. })
        ));

        let message = Message {
            id: "srv-1".into(),
            room_id: "r1".into(),
            sender: Sender {
                id: "u2".into(),
                name: "other".into(),
            },
            message: "hi".into(),
            created_at: Utc::now(),
            status: MessageStatus::Sent,
            reply_to: None,
            voice: None,
            upload_progress: 0,
            seen: Vec::new(),
        };
        let json = serde_json::to_string(&ServerFrame::Event(ServerEvent::NewMessage(message)))
            .unwrap();
        let back: ServerFrame = serde_json::from_str(&json).unwrap();
        assert!(matches!(
            back,
            ServerFrame::Event(ServerEvent::NewMessage(_))
        ));
    }
}
