// Application state for HTTP handlers
use crate::application::session::SessionHandle;
use crate::infrastructure::config::TransportSettings;

#[derive(Clone)]
pub struct AppState {
    pub session: SessionHandle,
    pub transport_settings: TransportSettings,
}
