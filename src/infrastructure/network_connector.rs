// Connector building the network transports
use crate::application::transport::{Transport, TransportConnector, TransportError};
use crate::domain::connection::TransportKind;
use crate::infrastructure::broker_transport::BrokerTransport;
use crate::infrastructure::config::TransportConfig;
use crate::infrastructure::socket_transport::SocketTransport;

#[derive(Debug, Clone, Default)]
pub struct NetworkConnector;

impl TransportConnector for NetworkConnector {
    fn build(&self, config: &TransportConfig) -> Result<Box<dyn Transport>, TransportError> {
        let transport: Box<dyn Transport> = match config.kind {
            TransportKind::Socket => Box::new(SocketTransport::new(config)?),
            TransportKind::Broker => Box::new(BrokerTransport::new(config)?),
        };
        Ok(transport)
    }
}
