// Events emitted to dashboard collaborators (status line, log, panels, chart)
use crate::domain::connection::{ConnectionStatus, TransportKind};
use crate::domain::sensor::SensorEvent;
use crate::domain::series::SeriesMutation;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DashboardEvent {
    Status {
        online: bool,
        transport: TransportKind,
        status: ConnectionStatus,
    },
    Log {
        text: String,
        at: DateTime<Utc>,
    },
    Message {
        event: SensorEvent,
    },
    Series {
        mutation: SeriesMutation,
    },
}

impl DashboardEvent {
    pub fn log(text: impl Into<String>) -> Self {
        DashboardEvent::Log {
            text: text.into(),
            at: Utc::now(),
        }
    }

    pub fn status(transport: TransportKind, status: ConnectionStatus) -> Self {
        DashboardEvent::Status {
            online: status.is_online(),
            transport,
            status,
        }
    }
}

/// Fan-out point for dashboard events. Publishing never fails; events
/// sent while nobody listens are dropped.
#[derive(Debug, Clone)]
pub struct EventPublisher {
    tx: broadcast::Sender<DashboardEvent>,
}

impl EventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: DashboardEvent) {
        if let DashboardEvent::Log { text, .. } = &event {
            tracing::info!("{}", text);
        }
        let _ = self.tx.send(event);
    }

    pub fn log(&self, text: impl Into<String>) {
        self.publish(DashboardEvent::log(text));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.tx.subscribe()
    }
}
