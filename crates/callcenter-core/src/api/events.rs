//! Server-sent notification streams for agent desktops and campaign dashboards

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

use crate::notify::{Notification, Topic};

use super::ApiState;

/// `GET /agents/:id/events`
pub async fn agent_events(
    State(engine): State<ApiState>,
    Path(agent_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let topic = Topic::Agent(agent_id.into());
    debug!("🔌 Event stream opened for {}", topic);
    notification_stream(engine.notifier().subscribe(&topic))
}

/// `GET /campaigns/:id/events`
pub async fn campaign_events(
    State(engine): State<ApiState>,
    Path(campaign_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let topic = Topic::Campaign(campaign_id.into());
    debug!("🔌 Event stream opened for {}", topic);
    notification_stream(engine.notifier().subscribe(&topic))
}

/// One SSE event per notification, named after its kind. A subscriber that falls behind
/// gets a `lagged` event carrying the number of notifications it missed.
fn notification_stream(
    receiver: broadcast::Receiver<Notification>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(notification) => match Event::default()
            .event(notification.kind.as_str())
            .id(notification.id.clone())
            .json_data(&notification)
        {
            Ok(event) => Some(Ok(event)),
            Err(e) => {
                warn!("⚠️ Dropping unserializable notification {}: {}", notification.id, e);
                None
            }
        },
        Err(BroadcastStreamRecvError::Lagged(missed)) => {
            Some(Ok(Event::default().event("lagged").data(missed.to_string())))
        }
    });

    Sse::new(stream).keep_alive(KeepAlive::default())
}
