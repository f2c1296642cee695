//! The SSE bridge: one instance's broker multiplexed onto an HTTP response.
//!
//! Each broker event becomes exactly one `data: <json>\n\n` frame, flushed
//! per event; events are never batched across frame boundaries. Dropping the
//! connection drops the subscription, which unregisters it from the broker.

use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, KeepAliveStream, Sse};
use futures::stream::Stream;
use tracing::debug;

use crush_core::pubsub::Subscription;
use crush_shared::event::EventPayload;

use super::ServerState;
use crate::error::Result;

pub async fn stream(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> Result<Sse<KeepAliveStream<EventStream>>> {
    let instance = state.instances.get(&id)?;
    debug!(instance = %id, "event stream attached");
    Ok(Sse::new(EventStream {
        sub: instance.app.events(),
    })
    .keep_alive(KeepAlive::default()))
}

pub struct EventStream {
    sub: Subscription<EventPayload>,
}

impl Stream for EventStream {
    type Item = std::result::Result<SseEvent, Infallible>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.sub.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                let data = serde_json::to_string(&event).unwrap_or_else(|e| {
                    debug!(error = %e, "failed to encode event");
                    "{}".to_string()
                });
                Poll::Ready(Some(Ok(SseEvent::default().data(data))))
            }
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
