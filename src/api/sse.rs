//! Server-Sent Events for flow sessions

use super::types::SessionResponse;
use crate::flow::{FlowDefinition, FlowState};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use serde_json::json;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

/// Stream the current session state, then every published state in order
pub fn session_stream(
    session_id: String,
    flow: FlowDefinition,
    current: FlowState,
    updates_rx: broadcast::Receiver<FlowState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let session_id: Arc<str> = session_id.into();
    let flow = Arc::new(flow);

    let init = {
        let event = state_event(&session_id, &flow, current);
        futures::stream::once(async move { Ok(event) })
    };

    let updates = BroadcastStream::new(updates_rx).filter_map(move |result| match result {
        Ok(state) => Some(Ok(state_event(&session_id, &flow, state))),
        Err(e) => {
            tracing::warn!(session_id = %session_id, error = %e, "SSE subscriber lagged");
            None
        }
    });

    Sse::new(init.chain(updates)).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}

fn state_event(session_id: &str, flow: &FlowDefinition, state: FlowState) -> Event {
    let data = json!({
        "type": "state",
        "session": SessionResponse::new(session_id, flow, state),
    });
    Event::default().event("state").data(data.to_string())
}
