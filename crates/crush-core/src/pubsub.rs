//! Typed topic-less publish/subscribe with per-subscriber buffers.
//!
//! Every subscriber receives every event. The UI is the slow consumer here:
//! a subscriber whose buffer stays full for more than [`SEND_WAIT`] loses
//! that event, and the other subscribers are unaffected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::debug;

use crush_shared::event::{Event, EventKind};

/// Per-subscriber channel capacity.
const SUBSCRIBER_BUFFER: usize = 64;

/// How long a publish waits on one full subscriber before dropping the event
/// for it.
const SEND_WAIT: Duration = Duration::from_millis(2);

struct BrokerState<T> {
    subscribers: HashMap<u64, mpsc::Sender<Event<T>>>,
    closed: bool,
}

/// A typed event fan-out point. Cheap to clone; all clones share the same
/// subscriber set.
pub struct Broker<T> {
    state: Arc<Mutex<BrokerState<T>>>,
    next_id: Arc<AtomicU64>,
}

impl<T> Clone for Broker<T> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            next_id: self.next_id.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Broker<T> {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(BrokerState {
                subscribers: HashMap::new(),
                closed: false,
            })),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a new subscriber. Dropping the returned [`Subscription`]
    /// unregisters it.
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);

        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.subscribers.insert(id, tx);
        }
        // On a closed broker the sender is dropped right away and the
        // subscription yields None immediately.

        Subscription {
            id,
            rx,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Best-effort delivery to every subscriber, in publication order per
    /// subscriber. A full subscriber gets at most [`SEND_WAIT`] to drain
    /// before the event is dropped for it; those waits run concurrently, so
    /// one slow subscriber never delays delivery to any other.
    pub async fn publish(&self, kind: EventKind, payload: T) {
        let senders: Vec<(u64, mpsc::Sender<Event<T>>)> = {
            let state = self.state.lock().unwrap();
            if state.closed {
                return;
            }
            state
                .subscribers
                .iter()
                .map(|(id, tx)| (*id, tx.clone()))
                .collect()
        };

        let mut blocked = Vec::new();
        for (id, tx) in senders {
            let event = Event::new(kind, payload.clone());
            if let Err(mpsc::error::TrySendError::Full(event)) = tx.try_send(event) {
                blocked.push((id, tx, event));
            }
        }
        if blocked.is_empty() {
            return;
        }

        futures::future::join_all(blocked.into_iter().map(|(id, tx, event)| async move {
            match tokio::time::timeout(SEND_WAIT, tx.send(event)).await {
                Ok(Ok(())) => {}
                Ok(Err(_)) => {} // receiver gone, cleaned up on next unsubscribe
                Err(_) => {
                    debug!(subscriber = id, "dropping event for slow subscriber");
                }
            }
        }))
        .await;
    }

    /// Disconnects all subscribers; subsequent publishes are no-ops.
    pub fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closed = true;
        state.subscribers.clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.state.lock().unwrap().subscribers.len()
    }
}

impl<T: Clone + Send + 'static> Default for Broker<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A registered subscriber. Receives every event published after
/// registration; unregisters itself on drop.
pub struct Subscription<T> {
    id: u64,
    rx: mpsc::Receiver<Event<T>>,
    state: std::sync::Weak<Mutex<BrokerState<T>>>,
}

impl<T> Subscription<T> {
    /// Receives the next event; `None` once the broker is closed (or this
    /// subscription was dropped from the broker side).
    pub async fn recv(&mut self) -> Option<Event<T>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Event<T>> {
        self.rx.try_recv().ok()
    }

    pub fn poll_recv(
        &mut self,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Event<T>>> {
        self.rx.poll_recv(cx)
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            state.lock().unwrap().subscribers.remove(&self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type TestBroker = Broker<String>;

    #[tokio::test]
    async fn every_subscriber_receives_every_event_in_order() {
        let broker = TestBroker::new();
        let mut a = broker.subscribe();
        let mut b = broker.subscribe();

        for i in 0..10 {
            broker.publish(EventKind::Created, format!("e{i}")).await;
        }

        for sub in [&mut a, &mut b] {
            for i in 0..10 {
                let ev = sub.recv().await.unwrap();
                assert_eq!(ev.payload, format!("e{i}"));
                assert_eq!(ev.kind, EventKind::Created);
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_drops_without_stalling_others() {
        let broker = TestBroker::new();
        let mut slow = broker.subscribe();
        let mut fast = broker.subscribe();

        // Overfill the slow subscriber's buffer without draining it.
        for i in 0..(SUBSCRIBER_BUFFER + 16) {
            broker.publish(EventKind::Updated, format!("e{i}")).await;
            // Keep the fast subscriber drained so it never blocks.
            while fast.try_recv().is_some() {}
        }

        // The slow subscriber got the buffered prefix; later events were
        // dropped for it, and nothing hung.
        let mut received = 0;
        while slow.try_recv().is_some() {
            received += 1;
        }
        assert!(received <= SUBSCRIBER_BUFFER);
        assert!(received > 0);
    }

    /// Under the paused clock, the wait taken by a publish is exactly the
    /// virtual time that elapses: N full subscribers must cost one
    /// [`SEND_WAIT`], not N of them, and a drained subscriber still gets the
    /// event.
    #[tokio::test(start_paused = true)]
    async fn full_subscribers_wait_concurrently_not_sequentially() {
        let broker = TestBroker::new();
        let mut stuck: Vec<_> = (0..8).map(|_| broker.subscribe()).collect();
        let mut fast = broker.subscribe();

        // Fill every buffer exactly, draining only the fast subscriber.
        for i in 0..SUBSCRIBER_BUFFER {
            broker.publish(EventKind::Created, format!("fill{i}")).await;
            while fast.try_recv().is_some() {}
        }

        let start = tokio::time::Instant::now();
        broker.publish(EventKind::Created, "tail".to_string()).await;
        let elapsed = start.elapsed();
        assert!(
            elapsed <= SEND_WAIT + Duration::from_millis(1),
            "eight full subscribers stalled the publish for {elapsed:?}"
        );

        let tail = fast.recv().await.unwrap();
        assert_eq!(tail.payload, "tail");

        // The stuck subscribers only ever saw their buffered prefix.
        for sub in &mut stuck {
            let mut received = 0;
            while sub.try_recv().is_some() {
                received += 1;
            }
            assert_eq!(received, SUBSCRIBER_BUFFER);
        }
    }

    #[tokio::test]
    async fn close_disconnects_subscribers() {
        let broker = TestBroker::new();
        let mut sub = broker.subscribe();
        broker.publish(EventKind::Created, "one".to_string()).await;
        broker.close();
        broker.publish(EventKind::Created, "two".to_string()).await;

        assert_eq!(sub.recv().await.map(|e| e.payload), Some("one".to_string()));
        assert!(sub.recv().await.is_none());
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let broker = TestBroker::new();
        let sub = broker.subscribe();
        assert_eq!(broker.subscriber_count(), 1);
        drop(sub);
        assert_eq!(broker.subscriber_count(), 0);
    }
}
