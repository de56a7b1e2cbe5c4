//! Topic-keyed pub/sub with bounded per-subscriber mailboxes.
//!
//! Each topic is a broadcast ring of [`MAILBOX_CAPACITY`] frames per
//! subscriber. Emission never blocks the producer; a subscriber that falls
//! behind loses its oldest frames and receives a single synthesized
//! `backpressure-drop` event covering the gap. Within a topic, frames
//! arrive in emission order. Dropping a [`Subscription`] cancels it.

use std::sync::{
    Arc,
    atomic::{AtomicU64, Ordering},
};

use {
    tokio::sync::broadcast,
    tracing::{debug, trace},
};

use crate::types::{AppEvent, AppEventKind, BusEvent, ServerEvent, ServerEventKind};

/// Bounded mailbox size per subscriber and topic.
pub const MAILBOX_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Topic {
    ServerEvents,
    AppEvents,
}

struct BusInner {
    server_tx: broadcast::Sender<BusEvent>,
    app_tx: broadcast::Sender<BusEvent>,
    seq: AtomicU64,
}

/// Cheap-to-clone handle on the in-process event bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        let (server_tx, _) = broadcast::channel(MAILBOX_CAPACITY);
        let (app_tx, _) = broadcast::channel(MAILBOX_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                server_tx,
                app_tx,
                seq: AtomicU64::new(0),
            }),
        }
    }

    fn next_seq(&self) -> u64 {
        self.inner.seq.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Emit a server event. Returns the assigned sequence number.
    pub fn emit_server(
        &self,
        kind: ServerEventKind,
        server_id: impl Into<String>,
        workspace_id: Option<String>,
        data: Option<serde_json::Value>,
    ) -> u64 {
        let seq = self.next_seq();
        let event = ServerEvent {
            kind,
            server_id: server_id.into(),
            workspace_id,
            timestamp: mcphost_common::now_ms(),
            seq,
            data,
        };
        trace!(?kind, server = %event.server_id, seq, "server event");
        // A send error only means there are no subscribers right now.
        let _ = self.inner.server_tx.send(BusEvent::ServerEvent(event));
        seq
    }

    /// Emit an app event. Returns the assigned sequence number.
    pub fn emit_app(&self, kind: AppEventKind, data: serde_json::Value) -> u64 {
        let seq = self.next_seq();
        let event = AppEvent {
            kind,
            timestamp: mcphost_common::now_ms(),
            seq,
            data,
        };
        trace!(?kind, seq, "app event");
        let _ = self.inner.app_tx.send(BusEvent::AppEvent(event));
        seq
    }

    /// Subscribe to one topic. The subscription owns its mailbox; dropping
    /// it releases the mailbox.
    #[must_use]
    pub fn subscribe(&self, topic: Topic) -> Subscription {
        let rx = match topic {
            Topic::ServerEvents => self.inner.server_tx.subscribe(),
            Topic::AppEvents => self.inner.app_tx.subscribe(),
        };
        Subscription { rx }
    }
}

/// A single subscriber mailbox on one topic.
pub struct Subscription {
    rx: broadcast::Receiver<BusEvent>,
}

impl Subscription {
    /// Receive the next event. Returns `None` when the bus is gone.
    ///
    /// When the mailbox overflowed, the oldest events are already lost;
    /// one `backpressure-drop` event is returned in their place and normal
    /// delivery resumes with the next call.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        match self.rx.recv().await {
            Ok(event) => Some(event),
            Err(broadcast::error::RecvError::Lagged(count)) => {
                debug!(dropped = count, "subscriber mailbox overflowed");
                Some(BusEvent::dropped(count))
            },
            Err(broadcast::error::RecvError::Closed) => None,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivers_in_emission_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Topic::ServerEvents);

        for i in 0..10u64 {
            bus.emit_server(ServerEventKind::Started, format!("srv-{i}"), None, None);
        }

        let mut last_seq = 0;
        for i in 0..10u64 {
            let BusEvent::ServerEvent(event) = sub.recv().await.unwrap() else {
                panic!("expected server event");
            };
            assert_eq!(event.server_id, format!("srv-{i}"));
            assert!(event.seq > last_seq);
            last_seq = event.seq;
        }
    }

    #[tokio::test]
    async fn topics_are_independent() {
        let bus = EventBus::new();
        let mut server_sub = bus.subscribe(Topic::ServerEvents);
        let mut app_sub = bus.subscribe(Topic::AppEvents);

        bus.emit_app(AppEventKind::ServerAdded, serde_json::json!({"id": "s"}));
        bus.emit_server(ServerEventKind::Stopped, "s", None, None);

        assert!(matches!(
            app_sub.recv().await.unwrap(),
            BusEvent::AppEvent(_)
        ));
        assert!(matches!(
            server_sub.recv().await.unwrap(),
            BusEvent::ServerEvent(_)
        ));
    }

    #[tokio::test]
    async fn overflow_synthesizes_single_drop_event() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe(Topic::ServerEvents);

        let overflow = 10;
        for _ in 0..(MAILBOX_CAPACITY + overflow) {
            bus.emit_server(ServerEventKind::Started, "noisy", None, None);
        }

        let BusEvent::BackpressureDrop(drop) = sub.recv().await.unwrap() else {
            panic!("expected backpressure-drop first");
        };
        assert_eq!(drop.dropped, overflow as u64);

        // Delivery resumes with the oldest retained event; the remainder of
        // the ring arrives in order without further drops.
        let mut received = 0;
        while received < MAILBOX_CAPACITY {
            match sub.recv().await.unwrap() {
                BusEvent::ServerEvent(_) => received += 1,
                other => panic!("unexpected event: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn slow_subscriber_does_not_block_producer() {
        let bus = EventBus::new();
        let _sub = bus.subscribe(Topic::AppEvents);
        // Far more events than the mailbox holds; emit must not await.
        for _ in 0..(MAILBOX_CAPACITY * 4) {
            bus.emit_app(AppEventKind::ProfileUpdated, serde_json::Value::Null);
        }
    }

    #[tokio::test]
    async fn cancelled_subscription_releases_mailbox() {
        let bus = EventBus::new();
        let sub = bus.subscribe(Topic::ServerEvents);
        drop(sub);
        // Emission to a topic with no subscribers is a no-op.
        bus.emit_server(ServerEventKind::Crashed, "s", None, None);
    }
}
