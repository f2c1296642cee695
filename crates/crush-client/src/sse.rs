//! SSE decoder: turns the server's `data: <json>` frames back into typed
//! events, with the same bounded-buffer drop-on-backpressure behavior as the
//! server-side broker.

use anyhow::{bail, Result};
use futures::StreamExt;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::Response;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crush_shared::event::{Event, EventPayload};

/// Client-side event buffer. A consumer that stalls past this loses events,
/// same as any slow broker subscriber.
const EVENT_BUFFER: usize = 100;

/// A live `/events` subscription. Dropping it closes the connection.
pub struct EventStream {
    rx: mpsc::Receiver<Event<EventPayload>>,
    reader: JoinHandle<()>,
}

impl EventStream {
    pub(crate) fn start(response: Response<Incoming>) -> Result<Self> {
        if !response.status().is_success() {
            bail!("event stream request failed: {}", response.status());
        }

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let reader = tokio::spawn(read_frames(response, tx));
        Ok(Self { rx, reader })
    }

    /// Next event, `None` once the server side closed the stream.
    pub async fn recv(&mut self) -> Option<Event<EventPayload>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event<EventPayload>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for EventStream {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

async fn read_frames(response: Response<Incoming>, tx: mpsc::Sender<Event<EventPayload>>) {
    let mut body = response.into_body().into_data_stream();
    let mut buffer = String::new();

    while let Some(chunk) = body.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                debug!(error = %e, "event stream read failed");
                return;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&chunk));

        while let Some(boundary) = buffer.find("\n\n") {
            let frame: String = buffer.drain(..boundary + 2).collect();
            let Some(event) = decode_frame(&frame) else {
                continue;
            };
            if tx.try_send(event).is_err() {
                debug!("dropping event for slow consumer");
            }
        }
    }
}

/// Parses one SSE frame. Comment lines (keep-alives) yield nothing; `data:`
/// lines are joined and decoded through the tagged envelope.
fn decode_frame(frame: &str) -> Option<Event<EventPayload>> {
    let data: Vec<&str> = frame
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
        .collect();
    if data.is_empty() {
        return None;
    }

    match serde_json::from_str(&data.join("\n")) {
        Ok(event) => Some(event),
        Err(e) => {
            debug!(error = %e, "failed to decode event frame");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crush_shared::event::EventKind;
    use crush_shared::Session;

    #[test]
    fn decodes_data_frames() {
        let event = Event::new(
            EventKind::Updated,
            EventPayload::Session(Session {
                id: "sess_1".into(),
                title: "t".into(),
                ..Default::default()
            }),
        );
        let frame = format!("data: {}\n\n", serde_json::to_string(&event).unwrap());

        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(decoded.kind, EventKind::Updated);
        match decoded.payload {
            EventPayload::Session(s) => assert_eq!(s.id, "sess_1"),
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    #[test]
    fn keepalive_comments_are_skipped() {
        assert!(decode_frame(": keep-alive\n\n").is_none());
        assert!(decode_frame("\n\n").is_none());
    }
}
