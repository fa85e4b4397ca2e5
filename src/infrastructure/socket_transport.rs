// WebSocket implementation of the Transport trait
use crate::application::transport::{EventSink, Transport, TransportError};
use crate::domain::connection::TransportKind;
use crate::infrastructure::config::TransportConfig;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};

const CLOSE_GRACE: Duration = Duration::from_millis(500);

pub struct SocketTransport {
    url: String,
    outbound: Option<mpsc::UnboundedSender<String>>,
    connected: Arc<AtomicBool>,
    ws_task: Option<JoinHandle<()>>,
}

impl SocketTransport {
    pub fn new(config: &TransportConfig) -> Result<Self, TransportError> {
        let unavailable = |reason: String| TransportError::Unavailable {
            kind: TransportKind::Socket,
            reason,
        };

        if config.endpoint.trim().is_empty() {
            return Err(unavailable("no endpoint configured".to_string()));
        }

        // Normalize localhost to avoid IPv6 issues
        let url = if config.endpoint.trim().eq_ignore_ascii_case("localhost") {
            format!("ws://127.0.0.1:{}", config.port)
        } else {
            config.socket_url()
        };
        url.as_str()
            .into_client_request()
            .map_err(|e| unavailable(format!("invalid url {}: {}", url, e)))?;

        Ok(Self {
            url,
            outbound: None,
            connected: Arc::new(AtomicBool::new(false)),
            ws_task: None,
        })
    }

    #[cfg(test)]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for SocketTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    async fn connect(&mut self, sink: EventSink) -> Result<(), TransportError> {
        if self.ws_task.is_some() {
            return Ok(());
        }

        let (tx_out, rx_out) = mpsc::unbounded_channel::<String>();
        let url = self.url.clone();
        let connected = self.connected.clone();

        tracing::debug!("Opening WebSocket to {}", url);
        self.ws_task = Some(tokio::spawn(async move {
            match connect_async(url.as_str()).await {
                Ok((ws_stream, _)) => {
                    connected.store(true, Ordering::SeqCst);
                    sink.opened();
                    handle_websocket(ws_stream, rx_out, &sink, &connected).await;
                }
                Err(e) => sink.error(e.to_string()),
            }
        }));
        self.outbound = Some(tx_out);
        Ok(())
    }

    async fn send(&mut self, payload: &str) -> Result<(), TransportError> {
        let Some(tx) = self.outbound.as_ref().filter(|_| self.is_connected()) else {
            return Err(TransportError::NotConnected(TransportKind::Socket));
        };
        tx.send(payload.to_string())
            .map_err(|e| TransportError::ConnectionLost {
                kind: TransportKind::Socket,
                reason: e.to_string(),
            })
    }

    async fn disconnect(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        // Dropping the sender asks the task to send a close frame
        self.outbound = None;

        if let Some(mut task) = self.ws_task.take() {
            if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
                task.abort();
                let _ = task.await;
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Pump frames both ways until either side closes
async fn handle_websocket(
    ws_stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    mut rx_out: mpsc::UnboundedReceiver<String>,
    sink: &EventSink,
    connected: &AtomicBool,
) {
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let outcome: Result<Option<String>, String> = loop {
        tokio::select! {
            outbound = rx_out.recv() => match outbound {
                Some(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text)).await {
                        break Err(e.to_string());
                    }
                }
                None => {
                    let _ = ws_sender.close().await;
                    break Ok(None);
                }
            },
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(Message::Text(text))) => sink.message(text),
                Some(Ok(Message::Binary(data))) => {
                    sink.message(String::from_utf8_lossy(&data).into_owned())
                }
                Some(Ok(Message::Close(frame))) => {
                    break Ok(frame.map(|f| f.reason.to_string()).filter(|r| !r.is_empty()));
                }
                Some(Ok(_)) => {} // Ping, Pong and raw frames
                Some(Err(e)) => break Err(e.to_string()),
                None => break Ok(None),
            },
        }
    };

    connected.store(false, Ordering::SeqCst);
    match outcome {
        Ok(reason) => sink.closed(reason),
        Err(reason) => sink.error(reason),
    }
}

impl Drop for SocketTransport {
    fn drop(&mut self) {
        if let Some(task) = self.ws_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::transport::TransportEvent;
    use crate::infrastructure::config::TransportSettings;
    use tokio::net::TcpListener;

    fn config_for(port: u16) -> TransportConfig {
        let mut config = TransportSettings::default().resolve(TransportKind::Socket);
        config.endpoint = "127.0.0.1".to_string();
        config.port = port;
        config
    }

    #[test]
    fn test_localhost_is_normalized() {
        let config = TransportSettings::default().resolve(TransportKind::Socket);
        let transport = SocketTransport::new(&config).unwrap();
        assert_eq!(transport.url(), "ws://127.0.0.1:8080");
    }

    #[test]
    fn test_hosts_containing_localhost_are_kept() {
        let mut config = config_for(9001);
        config.endpoint = "mylocalhost.lan".to_string();
        let transport = SocketTransport::new(&config).unwrap();
        assert_eq!(transport.url(), "ws://mylocalhost.lan:9001");
    }

    #[test]
    fn test_empty_endpoint_is_unavailable() {
        let mut config = config_for(8080);
        config.endpoint = " ".to_string();
        assert!(matches!(
            SocketTransport::new(&config),
            Err(TransportError::Unavailable { .. })
        ));
    }

    #[tokio::test]
    async fn test_send_before_connect_is_rejected() {
        let mut transport = SocketTransport::new(&config_for(8080)).unwrap();
        assert_eq!(
            transport.send("x").await,
            Err(TransportError::NotConnected(TransportKind::Socket))
        );
        transport.disconnect().await;
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            ws.send(Message::Text(r#"{"last": 5}"#.to_string())).await.unwrap();
            let echoed = ws.next().await.unwrap().unwrap();
            assert_eq!(echoed, Message::Text("ack".to_string()));
            ws.close(None).await.unwrap();
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = SocketTransport::new(&config_for(port)).unwrap();
        transport.connect(EventSink::new(1, tx)).await.unwrap();

        assert_eq!(rx.recv().await.unwrap().event, TransportEvent::Opened);
        assert_eq!(
            rx.recv().await.unwrap().event,
            TransportEvent::Message(r#"{"last": 5}"#.to_string())
        );
        transport.send("ack").await.unwrap();
        server.await.unwrap();

        assert!(matches!(rx.recv().await.unwrap().event, TransportEvent::Closed { .. }));
        assert!(!transport.is_connected());
        transport.disconnect().await;
    }

    #[tokio::test]
    async fn test_refused_connection_reports_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut transport = SocketTransport::new(&config_for(port)).unwrap();
        transport.connect(EventSink::new(3, tx)).await.unwrap();

        let signal = rx.recv().await.unwrap();
        assert_eq!(signal.generation, 3);
        assert!(matches!(signal.event, TransportEvent::Error { .. }));
        transport.disconnect().await;
    }
}
