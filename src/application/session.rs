// Dashboard session - Single event loop owning transport, router and buffer
use crate::application::events::{DashboardEvent, EventPublisher};
use crate::application::live_readout::LiveReadout;
use crate::application::message_router::MessageRouter;
use crate::application::phase_buffer::PhaseSeriesBuffer;
use crate::application::transport::{TransportConnector, TransportError, TransportSignal};
use crate::application::transport_manager::TransportManager;
use crate::domain::connection::{ConnectionStatus, TransportKind};
use crate::domain::sensor::FieldValue;
use crate::domain::series::{SeriesMutation, SeriesSnapshot};
use crate::infrastructure::config::{DashboardConfig, TransportConfig};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot};

const COMMAND_CAPACITY: usize = 64;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("dashboard session has stopped")]
    Stopped,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusSnapshot {
    pub status: ConnectionStatus,
    pub online: bool,
    pub transport: TransportKind,
}

pub enum SessionCommand {
    SwitchTransport {
        kind: TransportKind,
        config: Option<TransportConfig>,
    },
    ApplyConfig(TransportConfig),
    Send {
        payload: String,
        reply: oneshot::Sender<Result<(), TransportError>>,
    },
    Reset,
    Relabel {
        key: String,
        label: String,
        reply: oneshot::Sender<bool>,
    },
    RetryConnect {
        generation: u64,
    },
    Status(oneshot::Sender<StatusSnapshot>),
    Series(oneshot::Sender<Vec<SeriesSnapshot>>),
    Live(oneshot::Sender<BTreeMap<String, FieldValue>>),
    Shutdown,
}

/// Cloneable front door to a running session
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    publisher: EventPublisher,
}

impl SessionHandle {
    pub async fn switch_transport(
        &self,
        kind: TransportKind,
        config: Option<TransportConfig>,
    ) -> Result<(), SessionError> {
        self.dispatch(SessionCommand::SwitchTransport { kind, config }).await
    }

    pub async fn apply_config(&self, config: TransportConfig) -> Result<(), SessionError> {
        self.dispatch(SessionCommand::ApplyConfig(config)).await
    }

    pub async fn send(&self, payload: impl Into<String>) -> Result<(), SessionError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(SessionCommand::Send {
            payload: payload.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| SessionError::Stopped)??;
        Ok(())
    }

    pub async fn reset(&self) -> Result<(), SessionError> {
        self.dispatch(SessionCommand::Reset).await
    }

    /// Rename a series for display; `false` when no series has that key
    pub async fn relabel(&self, key: String, label: String) -> Result<bool, SessionError> {
        self.query(|reply| SessionCommand::Relabel { key, label, reply }).await
    }

    pub async fn status(&self) -> Result<StatusSnapshot, SessionError> {
        self.query(SessionCommand::Status).await
    }

    pub async fn series(&self) -> Result<Vec<SeriesSnapshot>, SessionError> {
        self.query(SessionCommand::Series).await
    }

    pub async fn live(&self) -> Result<BTreeMap<String, FieldValue>, SessionError> {
        self.query(SessionCommand::Live).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.dispatch(SessionCommand::Shutdown).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.publisher.subscribe()
    }

    async fn dispatch(&self, command: SessionCommand) -> Result<(), SessionError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| SessionError::Stopped)
    }

    async fn query<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, SessionError> {
        let (reply, rx) = oneshot::channel();
        self.dispatch(command(reply)).await?;
        rx.await.map_err(|_| SessionError::Stopped)
    }
}

pub struct DashboardSession {
    manager: TransportManager,
    router: MessageRouter,
    buffer: PhaseSeriesBuffer,
    live: LiveReadout,
    publisher: EventPublisher,
    commands: mpsc::Receiver<SessionCommand>,
    retry_tx: mpsc::Sender<SessionCommand>,
    signals: mpsc::UnboundedReceiver<TransportSignal>,
    retry_delay: Duration,
}

impl DashboardSession {
    pub fn new(
        config: &DashboardConfig,
        connector: Arc<dyn TransportConnector>,
        publisher: EventPublisher,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_CAPACITY);
        let (signals_tx, signals) = mpsc::unbounded_channel();

        let transport = &config.transport;
        let manager = TransportManager::new(
            connector,
            signals_tx,
            publisher.clone(),
            vec![
                transport.resolve(TransportKind::Socket),
                transport.resolve(TransportKind::Broker),
            ],
            transport.default,
        );

        let session = Self {
            manager,
            router: MessageRouter::new(config.router.clone()),
            buffer: PhaseSeriesBuffer::new(config.buffer.clone()),
            live: LiveReadout::new(),
            publisher: publisher.clone(),
            commands,
            retry_tx: commands_tx.clone(),
            signals,
            retry_delay: Duration::from_millis(transport.retry_delay_ms),
        };
        let handle = SessionHandle {
            commands: commands_tx,
            publisher,
        };
        (session, handle)
    }

    /// Connect the default transport, then process commands and transport
    /// events one at a time until shut down.
    pub async fn run(mut self) {
        let result = self.manager.connect().await;
        self.schedule_retry_if_unavailable(result);

        loop {
            tokio::select! {
                // Inbound traffic goes first so queries observe every
                // message that arrived before them
                biased;
                Some(signal) = self.signals.recv() => self.handle_signal(signal).await,
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Shutdown) | None => break,
                    Some(command) => self.handle_command(command).await,
                },
            }
        }

        self.manager.disconnect().await;
        tracing::info!("Dashboard session stopped");
    }

    async fn handle_command(&mut self, command: SessionCommand) {
        match command {
            SessionCommand::SwitchTransport { kind, config } => {
                let result = self.manager.switch_transport(kind, config).await;
                self.schedule_retry_if_unavailable(result);
            }
            SessionCommand::ApplyConfig(config) => {
                let result = self.manager.apply_config(config).await;
                self.schedule_retry_if_unavailable(result);
            }
            SessionCommand::Send { payload, reply } => {
                let result = self.manager.send(&payload).await;
                let _ = reply.send(result);
            }
            SessionCommand::Reset => {
                let mutation = self.buffer.reset();
                self.publisher.publish(DashboardEvent::Series { mutation });
            }
            SessionCommand::Relabel { key, label, reply } => {
                let found = self.buffer.set_display_label(&key, label.clone());
                if found {
                    self.publisher.publish(DashboardEvent::Series {
                        mutation: SeriesMutation::Relabeled { key, label },
                    });
                }
                let _ = reply.send(found);
            }
            SessionCommand::RetryConnect { generation } => {
                if generation != self.manager.generation() || self.manager.has_active() {
                    tracing::debug!("Skipping deferred connect; transport changed meanwhile");
                    return;
                }
                tracing::info!("Retrying {} connection", self.manager.selected_kind());
                // Single shot: a second failure is only reported
                let _ = self.manager.connect().await;
            }
            SessionCommand::Status(reply) => {
                let status = self.manager.current_status();
                let _ = reply.send(StatusSnapshot {
                    status,
                    online: status.is_online(),
                    transport: self.manager.selected_kind(),
                });
            }
            SessionCommand::Series(reply) => {
                let _ = reply.send(self.buffer.snapshot());
            }
            SessionCommand::Live(reply) => {
                let _ = reply.send(self.live.snapshot());
            }
            SessionCommand::Shutdown => {}
        }
    }

    async fn handle_signal(&mut self, signal: TransportSignal) {
        if let Some(raw) = self.manager.handle_signal(signal).await {
            self.handle_payload(&raw);
        }
    }

    fn handle_payload(&mut self, raw: &str) {
        let event = match self.router.parse(raw) {
            Ok(event) => event,
            Err(err) => {
                tracing::warn!("Dropping inbound message: {}", err);
                self.publisher.log(err.to_string());
                return;
            }
        };

        self.live.update(&event);
        self.publisher.publish(DashboardEvent::Message {
            event: event.clone(),
        });

        match self.buffer.apply(&event) {
            Ok(mutations) => {
                for mutation in mutations {
                    self.publisher.publish(DashboardEvent::Series { mutation });
                }
            }
            Err(err) => {
                self.publisher.log(err.to_string());
            }
        }
    }

    fn schedule_retry_if_unavailable(&self, result: Result<(), TransportError>) {
        if !matches!(result, Err(TransportError::Unavailable { .. })) {
            return;
        }

        let generation = self.manager.generation();
        let delay = self.retry_delay;
        let retry_tx = self.retry_tx.clone();
        tracing::debug!("Deferring connect by {:?}", delay);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = retry_tx.send(SessionCommand::RetryConnect { generation }).await;
        });
    }
}
