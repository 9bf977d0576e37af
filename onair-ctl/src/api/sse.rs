//! Server-Sent Events stream of on-air events
//!
//! `GET /events?types=priority.emergency,live.handover&station_id=s1`
//! Both filters are optional.

use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use super::server::AppContext;

#[derive(Debug, Default, Deserialize)]
pub struct EventFilter {
    /// Comma-separated event types
    pub types: Option<String>,
    pub station_id: Option<String>,
}

/// GET /events
pub async fn event_stream(
    State(ctx): State<AppContext>,
    Query(filter): Query<EventFilter>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let types: Vec<String> = filter
        .types
        .as_deref()
        .map(|t| {
            t.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(String::from)
                .collect()
        })
        .unwrap_or_default();
    let station_id = filter.station_id;

    debug!(?types, ?station_id, "SSE client connected");

    let stream = BroadcastStream::new(ctx.events.subscribe()).filter_map(move |result| {
        let types = types.clone();
        let station_id = station_id.clone();
        async move {
            let event = match result {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = ?e, "SSE subscriber lagged");
                    return None;
                }
            };

            if !types.is_empty() && !types.iter().any(|t| t == event.event_type()) {
                return None;
            }
            if station_id.as_deref().is_some_and(|s| s != event.station_id()) {
                return None;
            }

            match serde_json::to_string(&event) {
                Ok(json) => Some(Ok(Event::default().event(event.event_type()).data(json))),
                Err(e) => {
                    warn!(error = %e, "failed to serialize event");
                    None
                }
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
