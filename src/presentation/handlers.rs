// HTTP request handlers
use crate::application::session::SessionError;
use crate::application::transport::TransportError;
use crate::domain::connection::TransportKind;
use crate::infrastructure::config::{TransportConfig, TransportOverrides, TransportSettings};
use crate::infrastructure::event_stream::sse_from_receiver;
use crate::presentation::app_state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
pub struct TransportRequest {
    pub kind: TransportKind,
    #[serde(flatten)]
    pub overrides: TransportOverrides,
}

impl TransportRequest {
    /// A config only when the request carries something to override
    fn explicit_config(&self, settings: &TransportSettings) -> Option<TransportConfig> {
        let o = &self.overrides;
        let has_overrides =
            o.endpoint.is_some() || o.port.is_some() || o.topic.is_some() || o.client_id.is_some();
        has_overrides.then(|| settings.resolve_with(self.kind, o))
    }
}

fn session_error(err: SessionError) -> Response {
    match err {
        SessionError::Transport(e @ TransportError::NotConnected(_)) => {
            (StatusCode::CONFLICT, e.to_string()).into_response()
        }
        SessionError::Transport(e) => (StatusCode::BAD_GATEWAY, e.to_string()).into_response(),
        SessionError::Stopped => {
            tracing::error!("Request received after the dashboard session stopped");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
        }
    }
}

/// Health check endpoint
pub async fn health_check() -> &'static str {
    "ok"
}

/// Connection status of the selected transport
pub async fn get_status(State(state): State<Arc<AppState>>) -> Response {
    match state.session.status().await {
        Ok(status) => Json(status).into_response(),
        Err(e) => session_error(e),
    }
}

/// Ordered series for the chart
pub async fn list_series(State(state): State<Arc<AppState>>) -> Response {
    match state.session.series().await {
        Ok(series) => Json(series).into_response(),
        Err(e) => session_error(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct LabelRequest {
    pub label: String,
}

/// Change the display label of one series
pub async fn relabel_series(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(request): Json<LabelRequest>,
) -> Response {
    match state.session.relabel(key, request.label).await {
        Ok(true) => StatusCode::NO_CONTENT.into_response(),
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => session_error(e),
    }
}

/// Latest value per sensor field
pub async fn live_readout(State(state): State<Arc<AppState>>) -> Response {
    match state.session.live().await {
        Ok(fields) => Json(fields).into_response(),
        Err(e) => session_error(e),
    }
}

/// Close the current transport and open the requested one
pub async fn switch_transport(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TransportRequest>,
) -> Response {
    let config = request.explicit_config(&state.transport_settings);
    match state.session.switch_transport(request.kind, config).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => session_error(e),
    }
}

/// Store a new config for a transport kind, reconnecting if it is in use
pub async fn apply_transport_config(
    State(state): State<Arc<AppState>>,
    Json(request): Json<TransportRequest>,
) -> Response {
    let config = state
        .transport_settings
        .resolve_with(request.kind, &request.overrides);
    match state.session.apply_config(config).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => session_error(e),
    }
}

/// Send a raw payload over the active transport
pub async fn send_payload(State(state): State<Arc<AppState>>, body: String) -> Response {
    match state.session.send(body).await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => session_error(e),
    }
}

/// Clear all series locally
pub async fn reset_series(State(state): State<Arc<AppState>>) -> Response {
    match state.session.reset().await {
        Ok(()) => StatusCode::ACCEPTED.into_response(),
        Err(e) => session_error(e),
    }
}

/// Live event stream (status, log, messages, series mutations)
pub async fn stream_events(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    sse_from_receiver(state.session.subscribe())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_kind_uses_stored_config() {
        let request: TransportRequest = serde_json::from_str(r#"{"kind": "broker"}"#).unwrap();
        assert_eq!(request.kind, TransportKind::Broker);
        assert!(request.explicit_config(&TransportSettings::default()).is_none());
    }

    #[test]
    fn test_overrides_build_a_config() {
        let request: TransportRequest =
            serde_json::from_str(r#"{"kind": "broker", "topic": "rig/3", "port": 1884}"#).unwrap();
        let config = request.explicit_config(&TransportSettings::default()).unwrap();
        assert_eq!(config.topic, "rig/3");
        assert_eq!(config.port, 1884);
        assert_eq!(config.endpoint, "broker.hivemq.com");
    }

    #[test]
    fn test_not_connected_maps_to_conflict() {
        let response = session_error(SessionError::Transport(TransportError::NotConnected(
            TransportKind::Socket,
        )));
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
