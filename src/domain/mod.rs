// Domain layer - Readings, series and connection state
pub mod connection;
pub mod sensor;
pub mod series;
