use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// An event produced by the transport layer.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// The transport has successfully connected.
    Connected,
    /// A frame has been received from the server.
    FrameReceived(Vec<u8>),
    /// The connection was lost.
    Disconnected,
}

/// Represents an active network connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends a frame to the server.
    async fn send(&self, data: &[u8]) -> Result<(), anyhow::Error>;

    /// Closes the connection.
    async fn disconnect(&self);
}

/// A factory responsible for creating new transport instances.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    /// Creates a new transport and returns it, along with a stream of events.
    async fn create_transport(
        &self,
    ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error>;
}

#[cfg(test)]
pub mod mock {
    use super::*;

    /// A transport that swallows everything, for tests that never expect
    /// a server response.
    pub struct NullTransport;

    #[async_trait]
    impl Transport for NullTransport {
        async fn send(&self, _data: &[u8]) -> Result<(), anyhow::Error> {
            Ok(())
        }

        async fn disconnect(&self) {}
    }

    #[derive(Default)]
    pub struct NullTransportFactory;

    #[async_trait]
    impl TransportFactory for NullTransportFactory {
        async fn create_transport(
            &self,
        ) -> Result<(Arc<dyn Transport>, mpsc::Receiver<TransportEvent>), anyhow::Error> {
            let (_tx, rx) = mpsc::channel(1);
            Ok((Arc::new(NullTransport), rx))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::NullTransportFactory;
    use super::*;

    #[tokio::test]
    async fn null_transport_accepts_frames() {
        let factory = NullTransportFactory;
        let (transport, _events) = factory.create_transport().await.unwrap();
        transport.send(b"{}").await.unwrap();
        transport.disconnect().await;
    }
}
