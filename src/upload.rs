use crate::client::Client;
use crate::store::traits::PendingStore;
use crate::types::message::MessageStatus;
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Progress is held at this ceiling until finalization, so the bar never
/// claims completion the pipeline has not reached.
const PROGRESS_HOLD_CEILING: f64 = 95.0;

#[derive(Debug, Clone)]
pub struct UploadResponse {
    pub download_url: String,
}

#[derive(Debug, Error)]
pub enum UploadError {
    /// Whatever the upload primitive reported. The text is surfaced to the
    /// user verbatim.
    #[error("{0}")]
    Primitive(String),
}

/// The black-box upload primitive: bytes in, fractional progress out,
/// remote locator or error back.
#[async_trait]
pub trait Uploader: Send + Sync {
    async fn upload(
        &self,
        data: Vec<u8>,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<UploadResponse, UploadError>;
}

/// Progress the user should see given real transfer progress and elapsed
/// time. While the minimum visible duration has not elapsed, progress is
/// the lesser of the real value and a time-based ramp, so even an instant
/// transfer stays under the ceiling until the window runs out. Past the
/// window, real progress wins, still capped until finalization.
pub(crate) fn throttled_progress(real: f64, elapsed: Duration, min_visible: Duration) -> f64 {
    let capped = real.min(PROGRESS_HOLD_CEILING);
    if elapsed < min_visible {
        let ramp = elapsed.as_secs_f64() / min_visible.as_secs_f64() * PROGRESS_HOLD_CEILING;
        capped.min(ramp)
    } else {
        capped
    }
}

impl Client {
    /// Drives the upload primitive for one voice message, throttling
    /// reported progress to the minimum visible duration and settling at
    /// 100% before handing the locator back for the channel send.
    ///
    /// On failure the message is marked failed immediately; any in-flight
    /// progress animation is preempted rather than played out.
    pub(crate) async fn upload_voice(
        self: &Arc<Self>,
        room_id: &str,
        temp_id: &str,
        data: Vec<u8>,
    ) -> Result<String, UploadError> {
        let started = tokio::time::Instant::now();
        let min_visible = self.config.min_upload_duration;

        let result = {
            let client = self.clone();
            let room_id = room_id.to_string();
            let temp_id = temp_id.to_string();
            let on_progress = move |pct: f64| {
                let shown = throttled_progress(pct, started.elapsed(), min_visible);
                client.update_upload_progress(&room_id, &temp_id, shown);
            };
            self.uploader.upload(data, &on_progress).await
        };

        match result {
            Ok(response) => {
                let remaining = min_visible.saturating_sub(started.elapsed());
                if !remaining.is_zero() {
                    tokio::time::sleep(remaining).await;
                    self.update_upload_progress(room_id, temp_id, 100.0);
                    tokio::time::sleep(self.config.upload_settle_after_wait).await;
                } else {
                    self.update_upload_progress(room_id, temp_id, 100.0);
                    tokio::time::sleep(self.config.upload_settle_immediate).await;
                }
                debug!(target: "Client/Upload", "Upload for {temp_id} finished: {}", response.download_url);
                Ok(response.download_url)
            }
            Err(e) => {
                warn!(target: "Client/Upload", "Upload for {temp_id} failed: {e}");
                self.fail_upload(room_id, temp_id, &e.to_string()).await;
                Err(e)
            }
        }
    }

    /// Records reported progress on the message. Guards make interleaved
    /// callbacks harmless: nothing happens unless the message is still
    /// pending and the value actually advances.
    pub(crate) fn update_upload_progress(&self, room_id: &str, temp_id: &str, pct: f64) {
        let clamped = pct.clamp(0.0, 100.0).floor() as u8;
        let updated = self
            .with_message_mut(room_id, temp_id, |m| {
                if m.status != MessageStatus::Pending {
                    return None;
                }
                if clamped <= m.upload_progress {
                    return None;
                }
                m.upload_progress = clamped;
                Some(m.clone())
            })
            .flatten();

        if let Some(message) = updated {
            self.publish_update(message);
        }
    }

    async fn fail_upload(&self, room_id: &str, temp_id: &str, error_text: &str) {
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
            warn!(target: "Client/Upload", "Failed to drop pending record {temp_id}: {e}");
        }
        self.publish_update(message);
        self.notify_error(error_text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MIN: Duration = Duration::from_millis(2000);

    #[test]
    fn early_progress_follows_the_time_ramp() {
        // Real transfer is already done at 500ms, but only a quarter of the
        // ramp may be shown.
        let shown = throttled_progress(95.0, Duration::from_millis(500), MIN);
        assert!((shown - 23.75).abs() < 1e-9);
    }

    #[test]
    fn slow_transfers_are_never_inflated() {
        // Ramp allows 47.5 at 1s, but only 10% was transferred.
        let shown = throttled_progress(10.0, Duration::from_millis(1000), MIN);
        assert!((shown - 10.0).abs() < 1e-9);
    }

    #[test]
    fn instant_completion_still_rides_the_ramp() {
        let shown = throttled_progress(100.0, Duration::from_millis(100), MIN);
        assert!((shown - 4.75).abs() < 1e-9);
        let shown = throttled_progress(100.0, Duration::from_millis(2000), MIN);
        assert!((shown - PROGRESS_HOLD_CEILING).abs() < 1e-9);
    }

    #[test]
    fn past_the_minimum_real_progress_wins_up_to_the_ceiling() {
        let shown = throttled_progress(80.0, Duration::from_millis(2500), MIN);
        assert!((shown - 80.0).abs() < 1e-9);
        let shown = throttled_progress(99.0, Duration::from_millis(2500), MIN);
        assert!((shown - PROGRESS_HOLD_CEILING).abs() < 1e-9);
    }
}
