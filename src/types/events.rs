use crate::playback::WaveformFrame;
use crate::types::message::Message;
use std::sync::Arc;
use tokio::sync::broadcast;

// The size of the broadcast channel buffer.
const CHANNEL_CAPACITY: usize = 100;

/// A user-visible notification (a toast in UI terms).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub level: NotificationLevel,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationLevel {
    Error,
    Info,
}

// Macro to generate EventBus fields and constructor
macro_rules! define_event_bus {
    ($(($field:ident, $type:ty)),* $(,)?) => {
        /// Typed event bus with a separate broadcast channel per event type.
        /// Renderers subscribe to what they care about; sends to channels
        /// with no subscribers are dropped.
        #[derive(Debug)]
        pub struct EventBus {
            $(
                pub $field: broadcast::Sender<$type>,
            )*
        }

        impl EventBus {
            pub fn new() -> Self {
                Self {
                    $(
                        $field: broadcast::channel(CHANNEL_CAPACITY).0,
                    )*
                }
            }
        }
    };
}

define_event_bus! {
    // Message lifecycle
    (message_added, Arc<Message>),
    (message_updated, Arc<Message>),
    (message_received, Arc<Message>),

    // User-facing
    (notification, Arc<Notification>),

    // Playback
    (waveform, Arc<WaveformFrame>),
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
