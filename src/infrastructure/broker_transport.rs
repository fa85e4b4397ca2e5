// MQTT implementation of the Transport trait
use crate::application::transport::{EventSink, Transport, TransportError};
use crate::domain::connection::TransportKind;
use crate::infrastructure::config::TransportConfig;
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::task::JoinHandle;

const KEEP_ALIVE: Duration = Duration::from_secs(30);
const REQUEST_CAPACITY: usize = 16;
const CLOSE_GRACE: Duration = Duration::from_millis(500);

pub struct BrokerTransport {
    config: TransportConfig,
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
    mqtt_task: Option<JoinHandle<()>>,
}

impl BrokerTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let unavailable = |reason: &str| TransportError::Unavailable {
            kind: TransportKind::Broker,
            reason: reason.to_string(),
        };

        if config.endpoint.trim().is_empty() {
            return Err(unavailable("no broker configured"));
        }
        if config.topic.trim().is_empty() {
            return Err(unavailable("no topic configured"));
        }
        if !rumqttc::valid_filter(&config.topic) {
            return Err(unavailable("invalid topic filter"));
        }
        // MqttOptions rejects empty ids and ids with leading whitespace
        if config.client_id.is_empty() || config.client_id.starts_with(char::is_whitespace) {
            return Err(unavailable("invalid client id"));
        }

        Ok(Self {
            config: config.clone(),
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            mqtt_task: None,
        })
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.endpoint.trim(),
            self.config.port,
        );
        options.set_keep_alive(KEEP_ALIVE);
        options.set_clean_session(true);
        options
    }
}

#[async_trait]
impl Transport for BrokerTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Broker
    }

    async fn connect(&mut self, sink: EventSink) -> Result<(), TransportError> {
        if self.mqtt_task.is_some() {
            return Ok(());
        }

        let (client, eventloop) = AsyncClient::new(self.options(), REQUEST_CAPACITY);
        tracing::debug!(
            "Connecting to MQTT broker {}:{} as {}",
            self.config.endpoint,
            self.config.port,
            self.config.client_id
        );

        self.mqtt_task = Some(tokio::spawn(handle_eventloop(
            eventloop,
            client.clone(),
            self.config.topic.clone(),
            sink,
            self.connected.clone(),
        )));
        self.client = Some(client);
        Ok(())
    }

    async fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        let Some(client) = self.client.as_ref().filter(|_| self.is_connected()) else {
            return Err(TransportError::NotConnected(TransportKind::Broker));
        };
        if rumqttc::has_wildcards(&self.config.topic) {
            return Err(TransportError::Unavailable {
                kind: TransportKind::Broker,
                reason: format!("cannot publish to filter {}", self.config.topic),
            });
        }
        client
            .try_publish(
                self.config.topic.as_str(),
                QoS::AtMostOnce,
                false,
                payload.as_bytes().to_vec(),
            )
            .map_err(|e| TransportError::ConnectionLost {
                kind: TransportKind::Broker,
                reason: e.to_string(),
            })
    }

    async fn disconnect(&mut self) {
        let was_connected = self.connected.swap(false, Ordering::SeqCst);
        if let Some(client) = self.client.take() {
            if was_connected {
                let _ = client.try_disconnect();
            }
        }

        if let Some(mut task) = self.mqtt_task.take() {
            if !was_connected || tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                task.abort();
                let _ = task.await;
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Whether a publish on `topic` belongs to the subscription `filter`
fn accepts_delivery(filter: &str, topic: &str) -> bool {
    rumqttc::matches(topic, filter)
}

/// Drive the client event loop. Subscribes once the broker acknowledges
/// the connection and stops at the first error instead of reconnecting.
async fn handle_eventloop(
    mut eventloop: EventLoop,
    client: AsyncClient,
    topic: String,
    sink: EventSink,
    connected: Arc<AtomicBool>,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtMostOnce) {
                    sink.error(format!("subscribe to {} failed: {}", topic, e));
                    break;
                }
                connected.store(true, Ordering::SeqCst);
                sink.opened();
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if accepts_delivery(&topic, &publish.topic) {
                    sink.message(String::from_utf8_lossy(&publish.payload).into_owned());
                } else {
                    tracing::debug!("Ignoring publish on {}", publish.topic);
                }
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                connected.store(false, Ordering::SeqCst);
                sink.closed(None);
                break;
            }
            Ok(_) => {}
            Err(e) => {
                connected.store(false, Ordering::SeqCst);
                sink.error(e.to_string());
                break;
            }
        }
    }
}

impl Drop for BrokerTransport {
    fn drop(&mut self) {
        if let Some(task) = self.mqtt_task.take() {
            task.abort();
        }
    }
}
