//! Single-active-playback voice synchronization.
//!
//! At most one voice message is active process-wide. The active media
//! handle is owned by the client's playback state and released whenever
//! another message takes over. While a message plays, a cancellable
//! animation loop publishes waveform frames for it; every deactivation
//! publishes a reset frame so stale progress never lingers on screen.

use crate::client::Client;
use crate::request::{ChannelEvent, ListenPayload};
use crate::store::StoreError;
use crate::store::traits::BlobCache;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;

/// Number of segments in the waveform indicator.
pub const WAVEFORM_SEGMENTS: usize = 25;

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("unknown message: {0}")]
    UnknownMessage(String),
    #[error("message {0} has no voice attachment")]
    NotVoice(String),
    #[error("failed to fetch voice asset: {0}")]
    Fetch(String),
    #[error("audio output error: {0}")]
    Device(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// An opened playback instance, the media-element analogue. Exclusively
/// owned by the active playback state.
pub trait MediaHandle: Send + Sync {
    fn play(&self);
    fn pause(&self);
    /// Current playback position. Implementations clamp at the total
    /// duration.
    fn position(&self) -> Duration;
    /// Total duration of the opened asset, used when the message itself
    /// carries none.
    fn duration(&self) -> Duration;
}

/// The audio device boundary: turns cached bytes into a playable handle.
#[async_trait]
pub trait AudioOutput: Send + Sync {
    async fn open(&self, data: Vec<u8>) -> Result<Box<dyn MediaHandle>, PlaybackError>;
}

/// Fetches a remote voice asset for caching.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PlaybackError>;
}

/// Download state of a voice asset, keyed by message id.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AudioCacheEntry {
    pub is_downloading: bool,
    pub downloaded: bool,
}

/// The single active voice message.
pub struct ActiveVoice {
    pub message_id: String,
    pub room_id: String,
    pub is_playing: bool,
    pub(crate) handle: Box<dyn MediaHandle>,
    pub(crate) duration: Duration,
    /// Ties the animation loop to this activation; a loop whose generation
    /// no longer matches stops itself.
    pub(crate) generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentFill {
    Played,
    /// Percentage of the boundary segment that is filled.
    Partial(u8),
    Unplayed,
}

/// One repaint of a message's waveform indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaveformFrame {
    pub message_id: String,
    pub segments: [SegmentFill; WAVEFORM_SEGMENTS],
}

impl WaveformFrame {
    /// Paints the indicator for a playback progress fraction in [0, 1]:
    /// everything before the boundary is played, the boundary segment gets
    /// a partial fill, the rest stays unplayed.
    pub fn paint(message_id: &str, progress: f64) -> Self {
        let progress = progress.clamp(0.0, 1.0);
        let scaled = progress * WAVEFORM_SEGMENTS as f64;
        let boundary = scaled.floor() as usize;
        let partial = ((scaled - boundary as f64) * 100.0).round() as u8;

        let segments = std::array::from_fn(|i| {
            if i < boundary {
                SegmentFill::Played
            } else if i == boundary {
                SegmentFill::Partial(partial)
            } else {
                SegmentFill::Unplayed
            }
        });
        Self {
            message_id: message_id.to_string(),
            segments,
        }
    }

    /// The unplayed style every deactivated message is reset to.
    pub fn reset(message_id: &str) -> Self {
        Self {
            message_id: message_id.to_string(),
            segments: [SegmentFill::Unplayed; WAVEFORM_SEGMENTS],
        }
    }

    pub fn is_reset(&self) -> bool {
        self.segments.iter().all(|s| *s == SegmentFill::Unplayed)
    }
}

impl Client {
    /// The play/pause toggle behind every voice message bubble.
    ///
    /// Not yet cached: a download is started and playback begins when it
    /// lands. Download in flight: the toggle cancels it. Cached: the
    /// message becomes the single active playback, replacing whatever was
    /// active before; toggling the playing message deactivates it.
    pub async fn toggle_play(
        self: &Arc<Self>,
        room_id: &str,
        message_id: &str,
    ) -> Result<(), PlaybackError> {
        let message = self
            .find_message(room_id, message_id)
            .ok_or_else(|| PlaybackError::UnknownMessage(message_id.to_string()))?;
        let voice = message
            .voice
            .clone()
            .ok_or_else(|| PlaybackError::NotVoice(message_id.to_string()))?;

        // First listen of someone else's voice message: tell the server
        // once. The local played_by insert keeps this idempotent.
        if message.sender.id != self.me.id && !voice.played_by.contains(&self.me.id) {
            self.with_message_mut(room_id, message_id, |m| {
                if let Some(voice) = &mut m.voice {
                    voice.played_by.push(self.me.id.clone());
                }
            });
            let receipt = ChannelEvent::ListenToVoice(ListenPayload {
                user_id: self.me.id.clone(),
                voice_id: message_id.to_string(),
                room_id: room_id.to_string(),
            });
            if let Err(e) = self.emit_event(receipt).await {
                warn!(target: "Client/Playback", "Failed to emit listen receipt: {e}");
            }
        }

        let entry = self.audio_cache.get(message_id).map(|e| *e.value());
        match entry {
            None => {
                self.audio_cache.insert(
                    message_id.to_string(),
                    AudioCacheEntry {
                        is_downloading: true,
                        downloaded: false,
                    },
                );
                tokio::spawn(self.clone().cache_voice(
                    room_id.to_string(),
                    message_id.to_string(),
                    voice.src,
                    voice.duration_secs,
                ));
                Ok(())
            }
            Some(entry) if entry.is_downloading => {
                // Second toggle while downloading: the user aborted.
                self.audio_cache.remove(message_id);
                debug!(target: "Client/Playback", "Download of {message_id} aborted by user");
                Ok(())
            }
            Some(_) => self.activate(room_id, message_id, voice.duration_secs).await,
        }
    }

    /// Caches the asset (blob store hit or remote fetch), then starts
    /// playback unless the user aborted the download meanwhile.
    async fn cache_voice(
        self: Arc<Self>,
        room_id: String,
        message_id: String,
        src: String,
        duration_secs: u64,
    ) {
        let already_cached = matches!(self.store.get_blob(&message_id).await, Ok(Some(_)));
        if !already_cached {
            match self.fetcher.fetch(&src).await {
                Ok(data) => {
                    if let Err(e) = self.store.save_blob(&message_id, &data).await {
                        warn!(target: "Client/Playback", "Failed to cache voice blob: {e}");
                    }
                }
                Err(e) => {
                    self.audio_cache.remove(&message_id);
                    self.notify_error(&format!("Failed to download voice message: {e}"));
                    return;
                }
            }
        }

        // Removed entry means the user toggled again mid-download.
        let still_wanted = self
            .audio_cache
            .get(&message_id)
            .map(|e| e.is_downloading)
            .unwrap_or(false);
        if !still_wanted {
            debug!(target: "Client/Playback", "Download of {message_id} cancelled, discarding");
            return;
        }

        self.audio_cache.insert(
            message_id.clone(),
            AudioCacheEntry {
                is_downloading: false,
                downloaded: true,
            },
        );
        if let Err(e) = self.activate(&room_id, &message_id, duration_secs).await {
            warn!(target: "Client/Playback", "Failed to start playback of {message_id}: {e}");
        }
    }

    async fn activate(
        self: &Arc<Self>,
        room_id: &str,
        message_id: &str,
        duration_secs: u64,
    ) -> Result<(), PlaybackError> {
        let mut active = self.active_voice.lock().await;

        // Whatever is active gets deactivated: handle paused and released,
        // waveform reset. If it was this very message, that IS the toggle.
        if let Some(previous) = active.take() {
            let was_same = previous.message_id == message_id;
            previous.handle.pause();
            let _ = self
                .event_bus
                .waveform
                .send(Arc::new(WaveformFrame::reset(&previous.message_id)));
            if was_same {
                return Ok(());
            }
        }

        let data = self
            .store
            .get_blob(message_id)
            .await?
            .ok_or_else(|| PlaybackError::Fetch("voice asset missing from cache".to_string()))?;
        let handle = self.audio_output.open(data).await?;
        handle.play();

        let duration = if duration_secs > 0 {
            Duration::from_secs(duration_secs)
        } else {
            handle.duration()
        };
        let generation = self.playback_generation.fetch_add(1, Ordering::SeqCst) + 1;

        *active = Some(ActiveVoice {
            message_id: message_id.to_string(),
            room_id: room_id.to_string(),
            is_playing: true,
            handle,
            duration,
            generation,
        });
        drop(active);

        debug!(target: "Client/Playback", "Voice message {message_id} is now active");
        tokio::spawn(
            self.clone()
                .waveform_loop(message_id.to_string(), generation),
        );
        Ok(())
    }

    /// Releases whatever is active: pauses the handle, drops it, and
    /// resets the waveform. Used by shutdown and the end-of-media path.
    pub async fn deactivate_playback(&self) {
        let mut active = self.active_voice.lock().await;
        if let Some(previous) = active.take() {
            previous.handle.pause();
            let _ = self
                .event_bus
                .waveform
                .send(Arc::new(WaveformFrame::reset(&previous.message_id)));
        }
    }

    /// Id of the currently active voice message, if any.
    pub async fn active_voice_id(&self) -> Option<String> {
        self.active_voice
            .lock()
            .await
            .as_ref()
            .map(|a| a.message_id.clone())
    }

    /// The animation loop for one activation. Ticks at the frame interval,
    /// publishes a painted frame while its activation is still current,
    /// and stops the moment it is not; the deactivator has already reset
    /// the waveform by then.
    async fn waveform_loop(self: Arc<Self>, message_id: String, generation: u64) {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.frame_interval) => {}
                _ = self.shutdown_notifier.notified() => break,
            }

            // The frame is published under the playback lock: once a
            // deactivation has reset this message, no stale painted frame
            // can slip out behind it.
            let mut active = self.active_voice.lock().await;
            match active.as_ref() {
                Some(a) if a.generation == generation && a.is_playing => {
                    let position = a.handle.position();
                    if !a.duration.is_zero() && position >= a.duration {
                        let previous = active.take().unwrap();
                        previous.handle.pause();
                        let _ = self
                            .event_bus
                            .waveform
                            .send(Arc::new(WaveformFrame::reset(&message_id)));
                        debug!(target: "Client/Playback", "Voice message {message_id} finished");
                        break;
                    }
                    let progress = if a.duration.is_zero() {
                        0.0
                    } else {
                        position.as_secs_f64() / a.duration.as_secs_f64()
                    };
                    let _ = self
                        .event_bus
                        .waveform
                        .send(Arc::new(WaveformFrame::paint(&message_id, progress)));
                }
                _ => break,
            }
        }
    }
}
