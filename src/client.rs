use crate::config::ClientConfig;
use crate::playback::{ActiveVoice, AudioCacheEntry, AudioOutput, MediaFetcher};
use crate::request::{SendAck, ServerEvent, ServerFrame};
use crate::store::traits::Backend;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::events::{EventBus, Notification, NotificationLevel};
use crate::types::message::{Message, Room, Sender};
use crate::upload::Uploader;
use dashmap::DashMap;
use log::{debug, info, warn};
use rand::RngCore;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use thiserror::Error;
use tokio::sync::{Mutex, Notify, mpsc};

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("client is not connected")]
    NotConnected,
    #[error("client is already connected")]
    AlreadyConnected,
    #[error("transport error: {0}")]
    Transport(String),
}

pub struct Client {
    pub(crate) config: ClientConfig,
    /// The locally authenticated user. Outgoing messages carry this sender
    /// and seen/listened receipts are deduplicated against its id.
    pub(crate) me: Sender,

    pub(crate) store: Arc<dyn Backend>,
    pub(crate) uploader: Arc<dyn Uploader>,
    pub(crate) fetcher: Arc<dyn MediaFetcher>,
    pub(crate) audio_output: Arc<dyn AudioOutput>,

    pub(crate) transport_factory: Arc<dyn TransportFactory>,
    pub(crate) transport: Arc<Mutex<Option<Arc<dyn Transport>>>>,
    pub(crate) is_connected: AtomicBool,
    pub(crate) shutdown_notifier: Notify,

    /// Live room state. Message order inside a room is display order.
    pub(crate) rooms: DashMap<String, Room>,

    pub(crate) response_waiters:
        Arc<Mutex<HashMap<String, tokio::sync::oneshot::Sender<SendAck>>>>,
    pub(crate) unique_id: String,
    pub(crate) id_counter: AtomicU64,

    /// Temp ids with a live retry loop, so a duplicate resume cannot spawn
    /// a second loop for the same message.
    pub(crate) in_flight_sends: Arc<Mutex<HashSet<String>>>,

    /// Process-wide single active voice message. The media handle inside
    /// is exclusively owned here and released on replacement.
    pub(crate) active_voice: Mutex<Option<ActiveVoice>>,
    pub(crate) playback_generation: AtomicU64,
    pub(crate) audio_cache: DashMap<String, AudioCacheEntry>,

    pub event_bus: EventBus,
}

impl Client {
    pub fn new(
        config: ClientConfig,
        me: Sender,
        store: Arc<dyn Backend>,
        transport_factory: Arc<dyn TransportFactory>,
        uploader: Arc<dyn Uploader>,
        fetcher: Arc<dyn MediaFetcher>,
        audio_output: Arc<dyn AudioOutput>,
    ) -> Arc<Self> {
        let mut unique_id_bytes = [0u8; 2];
        rand::rng().fill_bytes(&mut unique_id_bytes);

        Arc::new(Self {
            config,
            me,
            store,
            uploader,
            fetcher,
            audio_output,
            transport_factory,
            transport: Arc::new(Mutex::new(None)),
            is_connected: AtomicBool::new(false),
            shutdown_notifier: Notify::new(),
            rooms: DashMap::new(),
            response_waiters: Arc::new(Mutex::new(HashMap::new())),
            unique_id: format!("{}.{}", unique_id_bytes[0], unique_id_bytes[1]),
            id_counter: AtomicU64::new(0),
            in_flight_sends: Arc::new(Mutex::new(HashSet::new())),
            active_voice: Mutex::new(None),
            playback_generation: AtomicU64::new(0),
            audio_cache: DashMap::new(),
            event_bus: EventBus::new(),
        })
    }

    pub async fn connect(self: &Arc<Self>) -> Result<(), ClientError> {
        {
            let guard = self.transport.lock().await;
            if guard.is_some() {
                return Err(ClientError::AlreadyConnected);
            }
        }

        let (transport, events) = self
            .transport_factory
            .create_transport()
            .await
            .map_err(|e| ClientError::Transport(e.to_string()))?;

        *self.transport.lock().await = Some(transport);
        tokio::spawn(self.clone().transport_loop(events));
        Ok(())
    }

    pub async fn disconnect(&self) {
        if let Some(transport) = self.transport.lock().await.take() {
            transport.disconnect().await;
        }
        self.is_connected.store(false, Ordering::Relaxed);
    }

    /// Tears the client down: wakes every background loop, releases the
    /// active media handle, and drops the transport. Pending records stay
    /// in the store for recovery on the next session.
    pub async fn shutdown(&self) {
        self.shutdown_notifier.notify_waiters();
        self.deactivate_playback().await;
        self.disconnect().await;
    }

    pub fn is_connected(&self) -> bool {
        self.is_connected.load(Ordering::Relaxed)
    }

    async fn transport_loop(self: Arc<Self>, mut events: mpsc::Receiver<TransportEvent>) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(TransportEvent::Connected) => {
                        info!(target: "Client/Socket", "Transport connected");
                        self.is_connected.store(true, Ordering::Relaxed);
                    }
                    Some(TransportEvent::FrameReceived(data)) => {
                        self.handle_frame(&data).await;
                    }
                    Some(TransportEvent::Disconnected) | None => {
                        info!(target: "Client/Socket", "Transport disconnected");
                        self.is_connected.store(false, Ordering::Relaxed);
                        *self.transport.lock().await = None;
                        return;
                    }
                },
                _ = self.shutdown_notifier.notified() => {
                    debug!(target: "Client/Socket", "Shutdown signaled, exiting transport loop");
                    return;
                }
            }
        }
    }

    pub(crate) async fn handle_frame(&self, data: &[u8]) {
        match serde_json::from_slice::<ServerFrame>(data) {
            Ok(ServerFrame::Ack(ack)) => {
                if !self.handle_ack(ack).await {
                    debug!(target: "Client/Channel", "Ack without a registered waiter");
                }
            }
            Ok(ServerFrame::Event(ServerEvent::NewMessage(message))) => {
                debug!(
                    target: "Client/Channel",
                    "Incoming message {} for room {}", message.id, message.room_id
                );
                let shared = Arc::new(message.clone());
                self.push_message(message);
                let _ = self.event_bus.message_received.send(shared);
            }
            Err(e) => {
                warn!(target: "Client/Channel", "Undecodable frame from server: {e}");
            }
        }
    }

    // ---- room state -----------------------------------------------------

    /// Snapshot of a room's messages in display order.
    pub fn room_messages(&self, room_id: &str) -> Vec<Message> {
        self.rooms
            .get(room_id)
            .map(|room| room.messages.clone())
            .unwrap_or_default()
    }

    pub fn find_message(&self, room_id: &str, message_id: &str) -> Option<Message> {
        self.rooms
            .get(room_id)?
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .cloned()
    }

    pub(crate) fn push_message(&self, message: Message) {
        let room_id = message.room_id.clone();
        self.rooms
            .entry(room_id.clone())
            .or_insert_with(|| Room::new(room_id))
            .messages
            .push(message);
    }

    /// Runs `f` against one message under the room lock, so compound edits
    /// (id swap + status) are observed atomically by readers.
    pub(crate) fn with_message_mut<R>(
        &self,
        room_id: &str,
        message_id: &str,
        f: impl FnOnce(&mut Message) -> R,
    ) -> Option<R> {
        let mut room = self.rooms.get_mut(room_id)?;
        let message = room.messages.iter_mut().find(|m| m.id == message_id)?;
        Some(f(message))
    }

    pub(crate) fn publish_update(&self, message: Message) {
        let _ = self.event_bus.message_updated.send(Arc::new(message));
    }

    // ---- notifications --------------------------------------------------

    pub(crate) fn notify_error(&self, text: &str) {
        warn!(target: "Client/Notify", "{text}");
        let _ = self.event_bus.notification.send(Arc::new(Notification {
            level: NotificationLevel::Error,
            text: text.to_string(),
        }));
    }
}
