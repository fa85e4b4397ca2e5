// Infrastructure layer - Network clients, configuration and streaming
pub mod broker_transport;
pub mod config;
pub mod event_stream;
pub mod network_connector;
pub mod socket_transport;
