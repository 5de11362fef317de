use crate::client::Client;
use crate::request::{ChannelEvent, NewMessagePayload};
use crate::store::StoreError;
use crate::store::traits::PendingStore;
use crate::types::message::{
    Message, MessageStatus, ReplyTarget, VoiceAsset, VoiceData,
};
use chrono::Utc;
use log::{debug, info, warn};
use std::sync::Arc;
use thiserror::Error;

const SEND_FAILED_NOTICE: &str = "Failed to send message after multiple retries.";

#[derive(Debug, Error)]
pub enum SendError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl Client {
    /// Sends a text message. Returns the temp id as soon as the optimistic
    /// message is visible and its pending record is durable; delivery
    /// continues in the background.
    pub async fn send_text_message(
        self: &Arc<Self>,
        room_id: &str,
        text: &str,
        reply_to: Option<ReplyTarget>,
    ) -> Result<String, SendError> {
        let temp_id = self
            .create_optimistic(room_id, text.to_string(), None, reply_to)
            .await?;
        self.clone().spawn_send(room_id.to_string(), temp_id.clone());
        Ok(temp_id)
    }

    /// Sends a recorded voice message: the optimistic message appears
    /// immediately with an empty locator and progress 0, then the asset is
    /// uploaded and, once the locator is known, handed to the channel send.
    pub async fn send_voice_message(
        self: &Arc<Self>,
        room_id: &str,
        asset: VoiceAsset,
        reply_to: Option<ReplyTarget>,
    ) -> Result<String, SendError> {
        let voice = VoiceData {
            src: String::new(),
            duration_secs: asset.duration_secs,
            played_by: Vec::new(),
        };
        let temp_id = self
            .create_optimistic(room_id, String::new(), Some(voice), reply_to)
            .await?;

        let client = self.clone();
        let room_id = room_id.to_string();
        let temp_id_out = temp_id.clone();
        tokio::spawn(async move {
            match client.upload_voice(&room_id, &temp_id, asset.data).await {
                Ok(download_url) => {
                    let updated = client
                        .with_message_mut(&room_id, &temp_id, |m| {
                            if let Some(voice) = &mut m.voice {
                                voice.src = download_url.clone();
                            }
                            m.clone()
                        });
                    if let Some(message) = updated {
                        client.publish_update(message);
                    }
                    client.clone().spawn_send(room_id, temp_id);
                }
                Err(e) => {
                    // upload_voice already marked the message failed and
                    // surfaced the error.
                    debug!(target: "Client/Send", "Voice upload for {temp_id} failed: {e}");
                }
            }
        });
        Ok(temp_id_out)
    }

    /// Re-surfaces pending records left over from a previous session and
    /// resumes their sends with a fresh budget. A voice record whose upload
    /// never finished (empty locator) cannot be resumed and is failed
    /// instead of lingering as unsendable.
    pub async fn recover_pending(self: &Arc<Self>, room_id: &str) -> Result<usize, SendError> {
        let records = self.store.load_pending(room_id).await?;
        let mut resumed = 0;
        for message in records {
            if self.find_message(room_id, &message.id).is_some() {
                continue;
            }
            let temp_id = message.id.clone();
            let lost_upload = message
                .voice
                .as_ref()
                .is_some_and(|voice| voice.src.is_empty());

            self.push_message(message.clone());
            let _ = self.event_bus.message_added.send(Arc::new(message));

            if lost_upload {
                warn!(
                    target: "Client/Send",
                    "Pending voice message {temp_id} lost its upload, marking failed"
                );
                self.finalize_failed(room_id, &temp_id).await;
                continue;
            }

            self.clone().spawn_send(room_id.to_string(), temp_id);
            resumed += 1;
        }
        Ok(resumed)
    }

    async fn create_optimistic(
        &self,
        room_id: &str,
        text: String,
        voice: Option<VoiceData>,
        reply_to: Option<ReplyTarget>,
    ) -> Result<String, SendError> {
        let temp_id = self.generate_temp_id();
        let message = Message {
            id: temp_id.clone(),
            room_id: room_id.to_string(),
            sender: self.me.clone(),
            message: text,
            created_at: Utc::now(),
            status: MessageStatus::Pending,
            reply_to,
            voice,
            upload_progress: 0,
            seen: Vec::new(),
        };

        self.push_message(message.clone());
        self.store.add_pending(room_id, &message).await?;
        let _ = self.event_bus.message_added.send(Arc::new(message));
        Ok(temp_id)
    }

    pub(crate) fn spawn_send(self: Arc<Self>, room_id: String, temp_id: String) {
        tokio::spawn(async move { self.send_with_retry(room_id, temp_id).await });
    }

    /// The retry loop: emit, await the ack, re-emit the identical payload
    /// every retry interval until acknowledged or the wall-clock budget
    /// runs out. Detached from any caller so switching rooms cannot drop
    /// an in-flight send.
    pub(crate) async fn send_with_retry(self: Arc<Self>, room_id: String, temp_id: String) {
        {
            let mut in_flight = self.in_flight_sends.lock().await;
            if !in_flight.insert(temp_id.clone()) {
                debug!(target: "Client/Send", "Send for {temp_id} already in flight, skipping");
                return;
            }
        }
        let _guard = scopeguard::guard((self.clone(), temp_id.clone()), |(client, id)| {
            tokio::spawn(async move {
                client.in_flight_sends.lock().await.remove(&id);
            });
        });

        let Some(message) = self.find_message(&room_id, &temp_id) else {
            warn!(target: "Client/Send", "Message {temp_id} vanished before send");
            return;
        };
        if message.status != MessageStatus::Pending {
            return;
        }

        let payload = NewMessagePayload {
            room_id: room_id.clone(),
            message: message.message.clone(),
            sender: message.sender.clone(),
            reply_data: message.reply_to.clone(),
            voice_data: message.voice.clone(),
            temp_id: temp_id.clone(),
        };

        let started = tokio::time::Instant::now();
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            match self
                .emit_with_ack(ChannelEvent::NewMessage(payload.clone()))
                .await
            {
                Ok(ack) if ack.success && ack.id.is_some() => {
                    let server_id = ack.id.unwrap_or_default();
                    info!(
                        target: "Client/Send",
                        "Message {temp_id} acknowledged as {server_id} after {attempts} attempt(s)"
                    );
                    self.finalize_sent(&room_id, &temp_id, &server_id).await;
                    return;
                }
                outcome => {
                    match outcome {
                        Ok(_) => {
                            debug!(target: "Client/Send", "Server rejected {temp_id}, attempt {attempts}")
                        }
                        Err(e) => {
                            debug!(target: "Client/Send", "Emit for {temp_id} failed: {e}, attempt {attempts}")
                        }
                    }
                    if started.elapsed() >= self.config.send_budget {
                        warn!(
                            target: "Client/Send",
                            "Send budget exhausted for {temp_id} after {attempts} attempt(s)"
                        );
                        self.finalize_failed(&room_id, &temp_id).await;
                        return;
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(self.config.send_retry_interval) => {}
                        _ = self.shutdown_notifier.notified() => {
                            debug!(target: "Client/Send", "Shutdown signaled, parking send for {temp_id}");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Reconciliation: swap the temp id for the server id and move to
    /// `Sent` in one atomic edit, then drop the durable mirror.
    async fn finalize_sent(&self, room_id: &str, temp_id: &str, server_id: &str) {
        let updated = self
            .with_message_mut(room_id, temp_id, |m| {
                if !m.transition(MessageStatus::Sent) {
                    return None;
                }
                m.id = server_id.to_string();
                Some(m.clone())
            })
            .flatten();

        let Some(message) = updated else { return };
        if let Err(e) = self.store.remove_pending(room_id, temp_id).await {
            warn!(target: "Client/Send", "Failed to drop pending record {temp_id}: {e}");
        }
        self.publish_update(message);
    }

    /// Terminal failure: the message stays visible as failed and exactly
    /// one notification is surfaced. No further emissions happen.
    pub(crate) async fn finalize_failed(&self, room_id: &str, temp_id: &str) {
        let updated = self
            .with_message_mut(room_id, temp_id, |m| {
                if !m.transition(MessageStatus::Failed) {
                    return None;
                }
                Some(m.clone())
            })
            .flatten();

        let Some(message) = updated else { return };
        if let Err(e) = self.store.remove_pending(room_id, temp_id).await {
            warn!(target: "Client/Send", "Failed to drop pending record {temp_id}: {e}");
        }
        self.publish_update(message);
        self.notify_error(SEND_FAILED_NOTICE);
    }
}
