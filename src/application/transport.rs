// Transport port - Uniform connection contract over socket and broker clients
use crate::domain::connection::TransportKind;
use crate::infrastructure::config::TransportConfig;
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("{kind} client unavailable: {reason}")]
    Unavailable { kind: TransportKind, reason: String },
    #[error("{kind} connection failed: {reason}")]
    ConnectionFailed { kind: TransportKind, reason: String },
    #[error("{kind} connection lost: {reason}")]
    ConnectionLost { kind: TransportKind, reason: String },
    #[error("Not connected via {0}.")]
    NotConnected(TransportKind),
}

/// Lifecycle callbacks of a vendor client, normalized
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    Opened,
    Closed { reason: Option<String> },
    Error { reason: String },
    Message(String),
}

/// Event tagged with the generation of the transport that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct TransportSignal {
    pub generation: u64,
    pub event: TransportEvent,
}

/// Handle a transport uses to report its lifecycle. Each transport instance
/// receives its own sink, stamped with the generation it was built for.
#[derive(Debug, Clone)]
pub struct EventSink {
    generation: u64,
    tx: mpsc::UnboundedSender<TransportSignal>,
}

impl EventSink {
    pub fn new(generation: u64, tx: mpsc::UnboundedSender<TransportSignal>) -> Self {
        Self { generation, tx }
    }

    pub fn emit(&self, event: TransportEvent) {
        // The receiver only goes away when the session shuts down
        let _ = self.tx.send(TransportSignal {
            generation: self.generation,
            event,
        });
    }

    pub fn opened(&self) {
        self.emit(TransportEvent::Opened);
    }

    pub fn closed(&self, reason: Option<String>) {
        self.emit(TransportEvent::Closed { reason });
    }

    pub fn error(&self, reason: impl Into<String>) {
        self.emit(TransportEvent::Error {
            reason: reason.into(),
        });
    }

    pub fn message(&self, payload: impl Into<String>) {
        self.emit(TransportEvent::Message(payload.into()));
    }
}

#[async_trait]
pub trait Transport: Send {
    fn kind(&self) -> TransportKind;

    /// Start connecting in the background. Progress is reported through `sink`.
    async fn connect(&mut self, sink: EventSink) -> Result<(), TransportError>;

    /// Hand a payload to the open connection. No queueing when closed.
    async fn send(&mut self, payload: &str) -> Result<(), TransportError>;

    /// Release the connection and stop its I/O task. Safe to call repeatedly.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

pub trait TransportConnector: Send + Sync {
    fn build(&self, config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_stamps_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(7, tx);
        sink.message("{\"last\":1}");
        sink.closed(None);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.generation, 7);
        assert_eq!(first.event, TransportEvent::Message("{\"last\":1}".to_string()));
        let second = rx.recv().await.unwrap();
        assert_eq!(second.event, TransportEvent::Closed { reason: None });
    }

    #[test]
    fn test_not_connected_message() {
        let err = TransportError::NotConnected(TransportKind::Broker);
        assert_eq!(err.to_string(), "Not connected via MQTT.");
    }
}
