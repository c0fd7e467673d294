use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream};
use tracing::{info, warn};

use crate::scan::{ScanState, StartOutcome};
use crate::state::{AppState, JsonResult, ScanStartResponse};

pub async fn start_scan(State(state): State<AppState>) -> JsonResult<ScanStartResponse> {
    let status = state.scans.start();
    if status == StartOutcome::AlreadyRunning {
        info!("Scan requested while one is running");
    }
    Ok(Json(ScanStartResponse { status }))
}

pub async fn scan_status(State(state): State<AppState>) -> JsonResult<ScanState> {
    Ok(Json(state.scans.status()))
}

/// Pushes every state change as an SSE event. The stream ends after the
/// first event with `done` set, or straight away when no scan has run.
pub async fn scan_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let updates = state.scans.subscribe();
    let events = stream::unfold(Some((updates, true)), |cursor| async move {
        let (mut updates, first) = cursor?;
        if !first {
            updates.changed().await.ok()?;
        }
        let snapshot = ScanState::clone(&updates.borrow_and_update());
        let finished = snapshot.done || snapshot.started_at.is_none();
        let next = if finished { None } else { Some((updates, false)) };
        Some((Ok(to_event(&snapshot)), next))
    });
    Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn to_event(snapshot: &ScanState) -> Event {
    match Event::default().event("progress").json_data(snapshot) {
        Ok(event) => event,
        Err(err) => {
            warn!("Failed to encode scan event: {}", err);
            Event::default().event("error").data(err.to_string())
        }
    }
}
