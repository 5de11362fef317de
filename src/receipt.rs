use crate::client::Client;
use crate::request::{AckError, ChannelEvent, SeenPayload};
use log::debug;

impl Client {
    /// Reports that a message has entered the viewport. Emits one `seenMsg`
    /// notify event the first time the current user sees someone else's
    /// message; own messages and repeat sightings are no-ops.
    pub async fn mark_message_visible(
        &self,
        room_id: &str,
        message_id: &str,
    ) -> Result<bool, AckError> {
        let Some(message) = self.find_message(room_id, message_id) else {
            return Ok(false);
        };
        if message.sender.id == self.me.id || message.seen.contains(&self.me.id) {
            return Ok(false);
        }

        self.with_message_mut(room_id, message_id, |m| {
            m.seen.push(self.me.id.clone());
        });

        debug!(target: "Client/Receipt", "Marking {message_id} seen by {}", self.me.id);
        self.emit_event(ChannelEvent::SeenMsg(SeenPayload {
            seen_by: self.me.id.clone(),
            sender: message.sender.clone(),
            msg_id: message_id.to_string(),
            room_id: room_id.to_string(),
        }))
        .await?;
        Ok(true)
    }
}
