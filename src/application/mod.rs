// Application layer - Transport lifecycle, routing and series assembly
pub mod events;
pub mod live_readout;
pub mod message_router;
pub mod phase_buffer;
pub mod session;
pub mod transport;
pub mod transport_manager;
