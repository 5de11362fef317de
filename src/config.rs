use std::time::Duration;

/// Tunables for the delivery pipeline. `Default` yields the production
/// constants; tests shrink the timings through this struct rather than
/// patching module constants.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// WebSocket endpoint of the chat server.
    pub server_url: String,
    /// Delay between send attempts for an unacknowledged message.
    pub send_retry_interval: Duration,
    /// Wall-clock budget for a message send, measured from the first emit.
    /// Once exhausted the message is marked failed and never retried again.
    pub send_budget: Duration,
    /// How long to wait for an acknowledgment before counting the attempt
    /// as failed. A silent server must not stall the retry loop.
    pub ack_timeout: Duration,
    /// Minimum time an upload must appear to take. Uploads finishing faster
    /// have their reported progress ramped so the user sees it move.
    pub min_upload_duration: Duration,
    /// Pause at 100% after the minimum-duration wait was needed.
    pub upload_settle_after_wait: Duration,
    /// Pause at 100% when the upload alone outlasted the minimum duration.
    pub upload_settle_immediate: Duration,
    /// Tick interval of the waveform animation loop.
    pub frame_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_url: "wss://chat.example.com/ws".to_string(),
            send_retry_interval: Duration::from_secs(2),
            send_budget: Duration::from_secs(30),
            ack_timeout: Duration::from_secs(2),
            min_upload_duration: Duration::from_millis(2000),
            upload_settle_after_wait: Duration::from_millis(300),
            upload_settle_immediate: Duration::from_millis(500),
            frame_interval: Duration::from_millis(16),
        }
    }
}
