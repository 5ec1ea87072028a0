//! Server-Sent Events stream of notification lifecycle events

use crate::api::server::AppContext;
use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

/// GET /events
///
/// Each frame carries the event's `type` as the SSE event name and the
/// JSON-serialized event as data. A subscriber that falls behind the bus
/// receives a `lagged` frame with the number of events it missed.
pub async fn event_stream(
    State(ctx): State<AppContext>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("SSE subscriber attached");

    let stream = BroadcastStream::new(ctx.bus.subscribe()).filter_map(|item| async move {
        let frame = match item {
            Ok(event) => serde_json::to_string(&event)
                .map(|json| Event::default().event(event.event_type()).data(json))
                .map_err(|e| warn!("Dropping unserializable lifecycle event: {}", e))
                .ok()?,
            Err(BroadcastStreamRecvError::Lagged(missed)) => {
                warn!(missed, "SSE subscriber lagged behind the event bus");
                Event::default().event("lagged").data(missed.to_string())
            }
        };
        Some(Ok(frame))
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
