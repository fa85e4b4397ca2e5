// Presentation layer - HTTP surface for the dashboard session
pub mod app_state;
pub mod handlers;
