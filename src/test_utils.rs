//! Mock collaborators shared by the integration test suite.

use crate::client::Client;
use crate::config::ClientConfig;
use crate::playback::{AudioOutput, MediaFetcher, MediaHandle, PlaybackError};
use crate::recorder::{AudioSource, CaptureError, InputStream};
use crate::request::{ClientFrame, SendAck, ServerFrame};
use crate::store::MemoryStore;
use crate::transport::{Transport, TransportEvent, TransportFactory};
use crate::types::message::Sender;
use crate::upload::{UploadError, UploadResponse, Uploader};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Decides how the fake server answers each emitted frame.
pub type Responder = Arc<dyn Fn(&ClientFrame) -> Option<ServerFrame> + Send + Sync>;

/// A transport whose "server" is a closure: every sent frame is recorded
/// and optionally answered through the event channel.
pub struct ScriptedTransport {
    responder: Responder,
    event_tx: mpsc::Sender<TransportEvent>,
    sent: Arc<StdMutex<Vec<ClientFrame>>>,
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error> {
        let frame: ClientFrame = serde_json::from_slice(data)?;
        self.sent.lock().unwrap().push(frame.clone());
        if let Some(response) = (self.responder)(&frame) {
            let bytes = serde_json::to_vec(&response)?;
            let _ = self
                .event_tx
                .send(TransportEvent::FrameReceived(bytes))
                .await;
        }
        Ok(())
    }

    async fn disconnect(&self) {}
}

pub struct ScriptedTransportFactory {
    responder: Responder,
    pub sent: Arc<StdMutex<Vec<ClientFrame>>>,
    pub server_tx: Arc<StdMutex<Option<mpsc::Sender<TransportEvent>>>>,
}

impl ScriptedTransportFactory {
    pub fn new(responder: Responder) -> Self {
        Self {
            responder,
            sent: Arc::new(StdMutex::new(Vec::new())),
            server_tx: Arc::new(StdMutex::new(None)),
        }
    }
}

#[async_trait]
impl TransportFactory for ScriptedTransportFactory {
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
        let (event_tx, event_rx) = mpsc::channel(100);
        *self.server_tx.lock().unwrap() = Some(event_tx.clone());
        let transport = Arc::new(ScriptedTransport {
            responder: self.responder.clone(),
            event_tx: event_tx.clone(),
            sent: self.sent.clone(),
        });
        let _ = event_tx.send(TransportEvent::Connected).await;
        Ok((transport, event_rx))
    }
}

/// Acks every correlated emit with success and a fresh server id.
pub fn ack_success() -> Responder {
    let counter = AtomicU32::new(0);
    Arc::new(move |frame| {
        let ack_id = frame.ack_id.clone()?;
        let n = counter.fetch_add(1, Ordering::SeqCst);
        Some(ServerFrame::Ack(SendAck {
            ack_id,
            success: true,
            id: Some(format!("srv-{n}")),
        }))
    })
}

/// Acks every correlated emit with failure.
pub fn ack_failure() -> Responder {
    Arc::new(|frame| {
        let ack_id = frame.ack_id.clone()?;
        Some(ServerFrame::Ack(SendAck {
            ack_id,
            success: false,
            id: None,
        }))
    })
}

/// Fails the first `failures` correlated emits, then acks with success.
pub fn ack_failures_then_success(failures: u32) -> Responder {
    let counter = AtomicU32::new(0);
    Arc::new(move |frame| {
        let ack_id = frame.ack_id.clone()?;
        let n = counter.fetch_add(1, Ordering::SeqCst);
        if n < failures {
            Some(ServerFrame::Ack(SendAck {
                ack_id,
                success: false,
                id: None,
            }))
        } else {
            Some(ServerFrame::Ack(SendAck {
                ack_id,
                success: true,
                id: Some(format!("srv-{n}")),
            }))
        }
    })
}

/// Never answers; emits run into their ack timeout.
pub fn ack_silence() -> Responder {
    Arc::new(|_| None)
}

/// An upload primitive driven by a script of `(at_ms, pct)` progress
/// reports, ending in a configured result.
pub struct MockUploader {
    plan: Vec<(u64, f64)>,
    result: Result<String, String>,
}

impl MockUploader {
    pub fn new(plan: Vec<(u64, f64)>, result: Result<String, String>) -> Self {
        Self { plan, result }
    }

    /// Reports completion right away and succeeds with `url`.
    pub fn instant(url: &str) -> Self {
        Self::new(vec![(0, 100.0)], Ok(url.to_string()))
    }

    pub fn failing(error: &str) -> Self {
        Self::new(Vec::new(), Err(error.to_string()))
    }
}

#[async_trait]
impl Uploader for MockUploader {
    async fn upload(
        &self,
        _data: Vec<u8>,
        on_progress: &(dyn Fn(f64) + Send + Sync),
    ) -> Result<UploadResponse, UploadError> {
        let mut at = 0u64;
        for (at_ms, pct) in &self.plan {
            if *at_ms > at {
                tokio::time::sleep(Duration::from_millis(at_ms - at)).await;
                at = *at_ms;
            }
            on_progress(*pct);
        }
        match &self.result {
            Ok(url) => Ok(UploadResponse {
                download_url: url.clone(),
            }),
            Err(e) => Err(UploadError::Primitive(e.clone())),
        }
    }
}

/// Serves fixed bytes for any url (after an optional delay), or refuses.
pub struct MockFetcher {
    data: Option<Vec<u8>>,
    delay: Duration,
}

impl MockFetcher {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Some(data),
            delay: Duration::ZERO,
        }
    }

    pub fn delayed(data: Vec<u8>, delay: Duration) -> Self {
        Self {
            data: Some(data),
            delay,
        }
    }

    pub fn failing() -> Self {
        Self {
            data: None,
            delay: Duration::ZERO,
        }
    }
}

#[async_trait]
impl MediaFetcher for MockFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, PlaybackError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match &self.data {
            Some(data) => Ok(data.clone()),
            None => Err(PlaybackError::Fetch(format!("unreachable url: {url}"))),
        }
    }
}

/// A media handle whose position advances with the (possibly paused)
/// tokio clock while playing.
pub struct MockMediaHandle {
    duration: Duration,
    state: StdMutex<HandleState>,
}

struct HandleState {
    playing_since: Option<tokio::time::Instant>,
    accumulated: Duration,
}

impl MockMediaHandle {
    pub fn new(duration: Duration) -> Self {
        Self {
            duration,
            state: StdMutex::new(HandleState {
                playing_since: None,
                accumulated: Duration::ZERO,
            }),
        }
    }
}

impl MediaHandle for MockMediaHandle {
    fn play(&self) {
        let mut state = self.state.lock().unwrap();
        if state.playing_since.is_none() {
            state.playing_since = Some(tokio::time::Instant::now());
        }
    }

    fn pause(&self) {
        let mut state = self.state.lock().unwrap();
        if let Some(since) = state.playing_since.take() {
            state.accumulated += since.elapsed();
        }
    }

    fn position(&self) -> Duration {
        let state = self.state.lock().unwrap();
        let running = state
            .playing_since
            .map(|since| since.elapsed())
            .unwrap_or(Duration::ZERO);
        (state.accumulated + running).min(self.duration)
    }

    fn duration(&self) -> Duration {
        self.duration
    }
}

/// Opens every asset as a `MockMediaHandle` of a fixed duration.
pub struct MockAudioOutput {
    duration: Duration,
}

impl MockAudioOutput {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

#[async_trait]
impl AudioOutput for MockAudioOutput {
    async fn open(&self, _data: Vec<u8>) -> Result<Box<dyn MediaHandle>, PlaybackError> {
        Ok(Box::new(MockMediaHandle::new(self.duration)))
    }
}

/// A microphone yielding scripted chunks (spaced `chunk_interval` apart),
/// then staying open until released. Counts releases so tests can assert
/// the stream is never leaked or double-freed.
pub struct MockAudioSource {
    chunks: Vec<Vec<u8>>,
    chunk_interval: Duration,
    deny_permission: bool,
    pub releases: Arc<AtomicU32>,
}

impl MockAudioSource {
    pub fn new(chunks: Vec<Vec<u8>>, chunk_interval: Duration) -> Self {
        Self {
            chunks,
            chunk_interval,
            deny_permission: false,
            releases: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn denied() -> Self {
        Self {
            chunks: Vec::new(),
            chunk_interval: Duration::ZERO,
            deny_permission: true,
            releases: Arc::new(AtomicU32::new(0)),
        }
    }
}

#[async_trait]
impl AudioSource for MockAudioSource {
    async fn acquire(&self) -> Result<Box<dyn InputStream>, CaptureError> {
        if self.deny_permission {
            return Err(CaptureError::PermissionDenied);
        }
        Ok(Box::new(MockInputStream {
            queue: self.chunks.clone().into(),
            chunk_interval: self.chunk_interval,
            releases: self.releases.clone(),
        }))
    }
}

pub struct MockInputStream {
    queue: VecDeque<Vec<u8>>,
    chunk_interval: Duration,
    releases: Arc<AtomicU32>,
}

#[async_trait]
impl InputStream for MockInputStream {
    async fn next_chunk(&mut self) -> Option<Vec<u8>> {
        match self.queue.pop_front() {
            Some(chunk) => {
                tokio::time::sleep(self.chunk_interval).await;
                Some(chunk)
            }
            // The device stays open producing nothing until released.
            None => std::future::pending().await,
        }
    }

    async fn release(&mut self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}

pub fn test_sender() -> Sender {
    Sender {
        id: "me-1".to_string(),
        name: "tester".to_string(),
    }
}

pub fn other_sender() -> Sender {
    Sender {
        id: "them-2".to_string(),
        name: "counterpart".to_string(),
    }
}

/// Everything a test needs to poke at a wired-up client.
pub struct TestHarness {
    pub client: Arc<Client>,
    pub sent: Arc<StdMutex<Vec<ClientFrame>>>,
    pub store: Arc<MemoryStore>,
    pub mic_releases: Arc<AtomicU32>,
    pub recorder_source: Arc<MockAudioSource>,
    server_tx: Arc<StdMutex<Option<mpsc::Sender<TransportEvent>>>>,
}

impl TestHarness {
    /// Pushes a frame through the transport as if the server sent it.
    pub async fn push_server_frame(&self, frame: &ServerFrame) {
        let tx = self
            .server_tx
            .lock()
            .unwrap()
            .clone()
            .expect("transport not created");
        let bytes = serde_json::to_vec(frame).unwrap();
        tx.send(TransportEvent::FrameReceived(bytes))
            .await
            .expect("transport loop gone");
        // Let the transport loop dispatch it.
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

pub struct TestHarnessBuilder {
    config: ClientConfig,
    responder: Responder,
    uploader: Arc<dyn Uploader>,
    fetcher: Arc<dyn MediaFetcher>,
    audio_output: Arc<dyn AudioOutput>,
    mic: Option<Arc<MockAudioSource>>,
    store: Option<Arc<MemoryStore>>,
}

impl TestHarnessBuilder {
    pub fn new() -> Self {
        Self {
            config: ClientConfig::default(),
            responder: ack_success(),
            uploader: Arc::new(MockUploader::instant("https://cdn.test/voice.ogg")),
            fetcher: Arc::new(MockFetcher::new(vec![0u8; 64])),
            audio_output: Arc::new(MockAudioOutput::new(Duration::from_secs(5))),
            mic: None,
            store: None,
        }
    }

    pub fn config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    pub fn responder(mut self, responder: Responder) -> Self {
        self.responder = responder;
        self
    }

    pub fn uploader(mut self, uploader: impl Uploader + 'static) -> Self {
        self.uploader = Arc::new(uploader);
        self
    }

    pub fn fetcher(mut self, fetcher: impl MediaFetcher + 'static) -> Self {
        self.fetcher = Arc::new(fetcher);
        self
    }

    pub fn audio_output(mut self, output: impl AudioOutput + 'static) -> Self {
        self.audio_output = Arc::new(output);
        self
    }

    pub fn mic(mut self, source: MockAudioSource) -> Self {
        self.mic = Some(Arc::new(source));
        self
    }

    /// Reuses a store from a previous harness, simulating a restart.
    pub fn store(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub async fn build(self) -> TestHarness {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        let factory = Arc::new(ScriptedTransportFactory::new(self.responder));
        let sent = factory.sent.clone();
        let server_tx = factory.server_tx.clone();
        let mic = self
            .mic
            .unwrap_or_else(|| Arc::new(MockAudioSource::new(Vec::new(), Duration::ZERO)));
        let mic_releases = mic.releases.clone();

        let client = Client::new(
            self.config,
            test_sender(),
            store.clone(),
            factory,
            self.uploader,
            self.fetcher,
            self.audio_output,
        );
        client.connect().await.expect("test client should connect");

        TestHarness {
            client,
            sent,
            store,
            mic_releases,
            recorder_source: mic,
            server_tx,
        }
    }
}

impl Default for TestHarnessBuilder {
    fn default() -> Self {
        Self::new()
    }
}
