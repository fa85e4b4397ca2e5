// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc};
use axum::{routing::{get, post}, Router};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::events::EventPublisher;
use crate::application::session::DashboardSession;
use crate::infrastructure::config::load_dashboard_config;
use crate::infrastructure::network_connector::NetworkConnector;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{
    apply_transport_config, get_status, health_check, list_series, live_readout, relabel_series,
    reset_series, send_payload, stream_events, switch_transport,
};

const EVENT_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("rig_dashboard=info")),
        )
        .init();

    // Load configuration
    let config = load_dashboard_config()?;

    // Create the session (application layer) over the network transports
    let publisher = EventPublisher::new(EVENT_CAPACITY);
    let (session, handle) =
        DashboardSession::new(&config, Arc::new(NetworkConnector), publisher);
    let session_task = tokio::spawn(session.run());

    // Create application state
    let state = Arc::new(AppState {
        session: handle.clone(),
        transport_settings: config.transport.clone(),
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/status", get(get_status))
        .route("/series", get(list_series))
        .route("/series/:key/label", post(relabel_series))
        .route("/live", get(live_readout))
        .route("/events", get(stream_events))
        .route("/transport", post(switch_transport))
        .route("/transport/apply", post(apply_transport_config))
        .route("/send", post(send_payload))
        .route("/reset", post(reset_series))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = config.server.bind.parse()?;
    tracing::info!("Starting rig-dashboard on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    // Event streams never end on their own, so stop serving outright on Ctrl-C
    tokio::select! {
        result = axum::serve(listener, router) => result?,
        _ = tokio::signal::ctrl_c() => tracing::info!("Shutting down"),
    }

    // Close the transport before exiting
    handle.shutdown().await.ok();
    session_task.await?;

    Ok(())
}
