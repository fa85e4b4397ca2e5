// Server-Sent Events streaming of dashboard events
use crate::application::events::DashboardEvent;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use tokio::sync::broadcast::{self, error::RecvError};

fn event_name(event: &DashboardEvent) -> &'static str {
    match event {
        DashboardEvent::Status { .. } => "status",
        DashboardEvent::Log { .. } => "log",
        DashboardEvent::Message { .. } => "message",
        DashboardEvent::Series { .. } => "series",
    }
}

/// Serialize a single DashboardEvent to an SSE frame
pub fn to_sse_event(event: &DashboardEvent) -> Result<Event, axum::Error> {
    Event::default().event(event_name(event)).json_data(event)
}

/// Stream events from a broadcast receiver until the session goes away.
/// Slow consumers skip what they missed and are told how much.
pub fn sse_from_receiver(
    mut rx: broadcast::Receiver<DashboardEvent>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => match to_sse_event(&event) {
                    Ok(frame) => yield Ok(frame),
                    Err(e) => tracing::warn!("Failed to encode dashboard event: {}", e),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("Event subscriber lagged, skipped {} events", skipped);
                    yield Ok(Event::default().event("lagged").data(skipped.to_string()));
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
