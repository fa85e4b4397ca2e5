// Transport manager - Owns the single active transport and its status
use crate::application::events::{DashboardEvent, EventPublisher};
use crate::application::transport::{
    EventSink, Transport, TransportConnector, TransportError, TransportEvent, TransportSignal,
};
use crate::domain::connection::{ConnectionStatus, TransportKind};
use crate::infrastructure::config::TransportConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct TransportManager {
    connector: Arc<dyn TransportConnector>,
    signals: mpsc::UnboundedSender<TransportSignal>,
    publisher: EventPublisher,
    configs: HashMap<TransportKind, TransportConfig>,
    selected: TransportKind,
    active: Option<Box<dyn Transport>>,
    generation: u64,
    status: ConnectionStatus,
}

impl TransportManager {
    pub fn new(
        connector: Arc<dyn TransportConnector>,
        signals: mpsc::UnboundedSender<TransportSignal>,
        publisher: EventPublisher,
        configs: Vec<TransportConfig>,
        selected: TransportKind,
    ) -> Self {
        Self {
            connector,
            signals,
            publisher,
            configs: configs.into_iter().map(|c| (c.kind, c)).collect(),
            selected,
            active: None,
            generation: 0,
            status: ConnectionStatus::Disconnected,
        }
    }

    pub fn current_status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn selected_kind(&self) -> TransportKind {
        self.selected
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn has_active(&self) -> bool {
        self.active.is_some()
    }

    #[cfg(test)]
    pub fn config_for(&self, kind: TransportKind) -> Option<&TransportConfig> {
        self.configs.get(&kind)
    }

    /// Close whatever is active, then open `kind`. A supplied config replaces
    /// the stored one for that kind; otherwise the stored config is used.
    pub async fn switch_transport(
        &mut self,
        kind: TransportKind,
        config: Option<TransportConfig>,
    ) -> Result<(), TransportError> {
        tracing::debug!("Switching transport to {}", kind);
        self.selected = kind;
        if let Some(config) = config {
            self.configs.insert(config.kind, config);
        }
        self.connect().await
    }

    /// Store a new config for its kind and reconnect only if that kind is selected.
    pub async fn apply_config(&mut self, config: TransportConfig) -> Result<(), TransportError> {
        let kind = config.kind;
        self.configs.insert(kind, config);
        if kind == self.selected {
            self.connect().await
        } else {
            Ok(())
        }
    }

    /// Tear down any active transport and start a new one for the selected kind.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        self.teardown().await;
        self.generation += 1;

        let kind = self.selected;
        let Some(config) = self.configs.get(&kind).cloned() else {
            let err = TransportError::Unavailable {
                kind,
                reason: "no configuration".to_string(),
            };
            self.report_failure(&err, ConnectionStatus::Disconnected);
            return Err(err);
        };

        let mut transport = match self.connector.build(&config) {
            Ok(transport) => transport,
            Err(err) => {
                self.report_failure(&err, ConnectionStatus::Disconnected);
                return Err(err);
            }
        };

        self.set_status(ConnectionStatus::Connecting);
        let sink = EventSink::new(self.generation, self.signals.clone());
        if let Err(err) = transport.connect(sink).await {
            transport.disconnect().await;
            self.report_failure(&err, ConnectionStatus::Failed);
            return Err(err);
        }

        self.active = Some(transport);
        Ok(())
    }

    pub async fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        let kind = self.selected;
        let transport = match self.active.as_mut() {
            Some(t) if self.status == ConnectionStatus::Connected => t,
            _ => {
                let err = TransportError::NotConnected(kind);
                tracing::warn!("Dropping outbound payload: {}", err);
                self.publisher.log(err.to_string());
                return Err(err);
            }
        };

        if let Err(err) = transport.send(payload).await {
            tracing::warn!("Send via {} failed: {}", kind, err);
            self.publisher.log(err.to_string());
            return Err(err);
        }

        if kind == TransportKind::Broker {
            let topic = self.configs.get(&kind).map(|c| c.topic.clone()).unwrap_or_default();
            self.publisher.log(format!("Published to {}", topic));
        }
        Ok(())
    }

    /// Release the active transport. Idempotent.
    pub async fn disconnect(&mut self) {
        self.teardown().await;
        if self.status != ConnectionStatus::Disconnected {
            self.set_status(ConnectionStatus::Disconnected);
        }
    }

    /// Apply one lifecycle event. Returns the payload for message events.
    /// Events from a transport other than the current one are discarded.
    pub async fn handle_signal(&mut self, signal: TransportSignal) -> Option<String> {
        if signal.generation != self.generation || self.active.is_none() {
            tracing::debug!(
                "Discarding stale transport event (generation {}, current {})",
                signal.generation,
                self.generation
            );
            return None;
        }

        let kind = self.selected;
        match signal.event {
            TransportEvent::Opened => {
                self.set_status(ConnectionStatus::Connected);
                self.publisher.log(format!("{} connection established", kind));
                if kind == TransportKind::Broker {
                    let topic = self
                        .configs
                        .get(&kind)
                        .map(|c| c.topic.clone())
                        .unwrap_or_default();
                    self.publisher.log(format!("Subscribed to topic: {}", topic));
                }
                None
            }
            TransportEvent::Closed { reason } => {
                self.teardown().await;
                self.set_status(ConnectionStatus::Disconnected);
                let text = match (kind, reason) {
                    (TransportKind::Broker, Some(reason)) => {
                        format!("MQTT connection lost: {}", reason)
                    }
                    (TransportKind::Broker, None) => "MQTT connection lost".to_string(),
                    (_, Some(reason)) => format!("{} connection closed: {}", kind, reason),
                    (_, None) => format!("{} connection closed", kind),
                };
                self.publisher.log(text);
                None
            }
            TransportEvent::Error { reason } => {
                let err = if self.status == ConnectionStatus::Connecting {
                    TransportError::ConnectionFailed { kind, reason }
                } else {
                    TransportError::ConnectionLost { kind, reason }
                };
                self.teardown().await;
                self.report_failure(&err, ConnectionStatus::Failed);
                None
            }
            TransportEvent::Message(payload) => Some(payload),
        }
    }

    async fn teardown(&mut self) {
        if let Some(mut transport) = self.active.take() {
            tracing::debug!(
                "Closing {} transport (generation {})",
                transport.kind(),
                self.generation
            );
            transport.disconnect().await;
            // Anything the old transport already queued is now stale
            self.generation += 1;
        }
    }

    fn report_failure(&mut self, err: &TransportError, status: ConnectionStatus) {
        tracing::warn!("{}", err);
        self.publisher.log(err.to_string());
        self.set_status(status);
    }

    fn set_status(&mut self, status: ConnectionStatus) {
        self.status = status;
        self.publisher
            .publish(DashboardEvent::status(self.selected, status));
    }
}
