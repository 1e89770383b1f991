//! `GET /branches/{branch_id}/events`: the branch's committed engine events as
//! Server-Sent Events, so dashboards can refresh instead of polling.
//!
//! ```text
//! event: appointment_booked
//! data: {"AppointmentBooked":{"id":"01J...","branch_id":"01J...",...}}
//! ```
//!
//! A subscriber that falls behind the channel capacity receives a `lagged`
//! event carrying the number of skipped events and should refetch.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::{self, Stream};
use tokio::sync::broadcast::error::RecvError;
use ulid::Ulid;

use crate::engine::Engine;

use super::extract::ApiPath;

pub async fn events(
    State(engine): State<Arc<Engine>>,
    ApiPath(branch_id): ApiPath<Ulid>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let rx = engine.notify.subscribe(branch_id);
    tracing::debug!(branch = %branch_id, "event stream opened");

    let stream = stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(event) => match Event::default().event(event.kind()).json_data(&event) {
                    Ok(sse) => return Some((Ok(sse), rx)),
                    Err(e) => tracing::error!("failed to encode {} for SSE: {e}", event.kind()),
                },
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!("event stream lagged by {skipped}");
                    let sse = Event::default().event("lagged").data(skipped.to_string());
                    return Some((Ok(sse), rx));
                }
                Err(RecvError::Closed) => return None,
            }
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
