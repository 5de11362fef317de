use crate::client::Client;
use crate::types::message::{ReplyTarget, VoiceAsset};
use async_trait::async_trait;
use log::{debug, warn};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;

const PERMISSION_DENIED_NOTICE: &str =
    "Microphone access denied! Please allow microphone permissions.";

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("microphone access denied")]
    PermissionDenied,
    #[error("audio device error: {0}")]
    Device(String),
    #[error("a recording is already in progress")]
    AlreadyRecording,
    #[error("no recording in progress")]
    NotRecording,
    #[error("recording was cancelled")]
    Cancelled,
}

/// The microphone boundary. Implementations own the platform specifics;
/// the recorder only sees chunks.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// Acquires the input device. `PermissionDenied` when the platform
    /// refuses access.
    async fn acquire(&self) -> Result<Box<dyn InputStream>, CaptureError>;
}

#[async_trait]
pub trait InputStream: Send {
    /// The next captured chunk, or `None` once the device stops producing.
    async fn next_chunk(&mut self) -> Option<Vec<u8>>;

    /// Releases the device. Idempotent.
    async fn release(&mut self);
}

struct RecordingSession {
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    elapsed_secs: Arc<AtomicU64>,
    stop_pump: Arc<Notify>,
    stop_ticker: Arc<Notify>,
    pump: JoinHandle<()>,
    ticker: JoinHandle<()>,
}

/// Drives microphone capture into a single binary asset.
///
/// Lifecycle: `idle -> recording -> (stopped | cancelled)`. The pump task
/// is the only owner of the device stream and releases it when it exits,
/// whatever made it exit, so the device is never leaked.
pub struct VoiceRecorder {
    client: Arc<Client>,
    source: Arc<dyn AudioSource>,
    session: Mutex<Option<RecordingSession>>,
    cancelled: AtomicBool,
}

impl VoiceRecorder {
    pub fn new(client: Arc<Client>, source: Arc<dyn AudioSource>) -> Self {
        Self {
            client,
            source,
            session: Mutex::new(None),
            cancelled: AtomicBool::new(false),
        }
    }

    pub async fn start(&self) -> Result<(), CaptureError> {
        let mut session = self.session.lock().await;
        if session.is_some() {
            return Err(CaptureError::AlreadyRecording);
        }

        let stream = match self.source.acquire().await {
            Ok(stream) => stream,
            Err(e) => {
                match &e {
                    CaptureError::PermissionDenied => {
                        self.client.notify_error(PERMISSION_DENIED_NOTICE)
                    }
                    other => self.client.notify_error(&other.to_string()),
                }
                return Err(e);
            }
        };

        self.cancelled.store(false, Ordering::SeqCst);

        let chunks = Arc::new(Mutex::new(Vec::new()));
        let elapsed_secs = Arc::new(AtomicU64::new(0));
        let stop_pump = Arc::new(Notify::new());
        let stop_ticker = Arc::new(Notify::new());

        let pump = tokio::spawn(pump_task(stream, chunks.clone(), stop_pump.clone()));
        let ticker = tokio::spawn(ticker_task(elapsed_secs.clone(), stop_ticker.clone()));

        *session = Some(RecordingSession {
            chunks,
            elapsed_secs,
            stop_pump,
            stop_ticker,
            pump,
            ticker,
        });
        Ok(())
    }

    /// Finalizes the capture into one asset. The device is released by the
    /// pump before this returns.
    pub async fn stop(&self) -> Result<VoiceAsset, CaptureError> {
        let session = self
            .session
            .lock()
            .await
            .take()
            .ok_or(CaptureError::NotRecording)?;

        let (chunks, duration_secs) = teardown(session).await;

        // A cancel that raced this stop wins: the capture is discarded and
        // no message may be created from it.
        if self.cancelled.load(Ordering::SeqCst) {
            debug!(target: "Client/Recorder", "Finalize suppressed by cancellation");
            return Err(CaptureError::Cancelled);
        }

        let data: Vec<u8> = chunks.into_iter().flatten().collect();
        debug!(
            target: "Client/Recorder",
            "Captured {} bytes over {duration_secs}s", data.len()
        );
        Ok(VoiceAsset {
            data,
            duration_secs,
        })
    }

    /// Stops recording and pushes the asset straight into the
    /// upload -> send pipeline. Returns the optimistic message's temp id.
    pub async fn stop_and_send(
        &self,
        room_id: &str,
        reply_to: Option<ReplyTarget>,
    ) -> Result<String, anyhow::Error> {
        let asset = self.stop().await?;
        let temp_id = self
            .client
            .send_voice_message(room_id, asset, reply_to)
            .await?;
        Ok(temp_id)
    }

    /// Discards the capture. The stream is released, buffered audio is
    /// dropped, and any concurrent finalize observes the cancellation flag.
    pub async fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(session) = self.session.lock().await.take() {
            let (chunks, _) = teardown(session).await;
            drop(chunks);
            debug!(target: "Client/Recorder", "Recording cancelled, capture discarded");
        }
    }

    pub async fn is_recording(&self) -> bool {
        self.session.lock().await.is_some()
    }

    /// Seconds recorded so far, for the live recording indicator.
    pub async fn elapsed_secs(&self) -> u64 {
        self.session
            .lock()
            .await
            .as_ref()
            .map(|s| s.elapsed_secs.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

/// Stops both background tasks and waits them out, then returns the
/// buffered chunks and the elapsed duration.
async fn teardown(session: RecordingSession) -> (Vec<Vec<u8>>, u64) {
    session.stop_pump.notify_one();
    session.stop_ticker.notify_one();
    if let Err(e) = session.pump.await {
        warn!(target: "Client/Recorder", "Capture pump ended abnormally: {e}");
    }
    if let Err(e) = session.ticker.await {
        warn!(target: "Client/Recorder", "Recording ticker ended abnormally: {e}");
    }
    let chunks = std::mem::take(&mut *session.chunks.lock().await);
    let duration_secs = session.elapsed_secs.load(Ordering::Relaxed);
    (chunks, duration_secs)
}

/// Sole owner of the device stream. Every exit path flows through the
/// trailing release, which is how the released-exactly-once invariant is
/// kept.
async fn pump_task(
    mut stream: Box<dyn InputStream>,
    chunks: Arc<Mutex<Vec<Vec<u8>>>>,
    stop: Arc<Notify>,
) {
    loop {
        tokio::select! {
            maybe_chunk = stream.next_chunk() => match maybe_chunk {
                Some(chunk) => chunks.lock().await.push(chunk),
                None => {
                    debug!(target: "Client/Recorder", "Input stream ended");
                    break;
                }
            },
            _ = stop.notified() => break,
        }
    }
    stream.release().await;
}

async fn ticker_task(elapsed_secs: Arc<AtomicU64>, stop: Arc<Notify>) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(Duration::from_secs(1)) => {
                elapsed_secs.fetch_add(1, Ordering::Relaxed);
            }
            _ = stop.notified() => break,
        }
    }
}
