//! Event-stream channel: `GET /api/chat/stream/:peer_id`.
//!
//! A `text/event-stream` response scoped to one (viewer, peer) pair. Every
//! message exchanged between the two, in either direction, is written as a
//! `data:` frame carrying the message JSON. A comment heartbeat keeps
//! intermediaries from closing an idle stream.
//!
//! The registration guard lives inside the response stream, so the channel is
//! unregistered as soon as the client goes away and the body is dropped.

use std::convert::Infallible;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::Extension;
use futures_util::Stream;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, UserContext};
use crate::models::Message;
use crate::registry::{ChannelEvent, ChannelKind, ChannelScope};

pub async fn stream(
    State(ctx): State<ApiContext>,
    Extension(user): Extension<UserContext>,
    Path(peer_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let peer_id = peer_id.trim().to_string();
    if peer_id.is_empty() {
        return Err(ApiError::BadRequest("peer_id is required".into()));
    }
    if peer_id == user.user_id {
        return Err(ApiError::BadRequest("Cannot stream a conversation with yourself".into()));
    }

    let (registration, rx) = ctx.core.registry().register(
        &user.user_id,
        ChannelKind::EventStream,
        ChannelScope::Pair(peer_id.clone()),
    );
    tracing::info!(
        user_id = %user.user_id,
        peer_id = %peer_id,
        channel_id = registration.id(),
        "Event stream opened"
    );

    let viewer = user.user_id;
    let events = ReceiverStream::new(rx).filter_map(move |event| {
        // Keeps the registration alive exactly as long as the stream.
        let _registration = &registration;
        match event {
            ChannelEvent::Message(message) if message.is_between(&viewer, &peer_id) => {
                message_event(&message).map(Ok::<Event, Infallible>)
            }
            _ => None,
        }
    });

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(ctx.core.config().heartbeat_interval)))
}

fn message_event(message: &Message) -> Option<Event> {
    match serde_json::to_string(message) {
        Ok(json) => Some(Event::default().data(json)),
        Err(e) => {
            tracing::warn!(message_id = %message.id, error = %e, "Failed to encode stream frame");
            None
        }
    }
}
