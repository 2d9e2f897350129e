//! Typed progress events for callers that want to watch a query run.
//!
//! The pipeline publishes into a broadcast channel and never blocks on (or
//! cares about) subscribers; with nobody listening the send is a no-op.

use crate::graph::NodeKind;
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

const DEFAULT_CAPACITY: usize = 64;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    QueryAccepted {
        query_id: Uuid,
        query: String,
    },
    StageStarted {
        query_id: Uuid,
        node: NodeKind,
    },
    StageCompleted {
        query_id: Uuid,
        node: NodeKind,
        elapsed_ms: u64,
    },
    StageFailed {
        query_id: Uuid,
        node: NodeKind,
        error: String,
    },
    QueryCompleted {
        query_id: Uuid,
    },
}

#[derive(Debug, Clone)]
pub struct ProgressBus {
    sender: broadcast::Sender<ProgressEvent>,
}

impl Default for ProgressBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProgressBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ProgressEvent) {
        // Err means no active subscriber, which is fine
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitting_without_subscribers_is_harmless() {
        let bus = ProgressBus::default();
        bus.emit(ProgressEvent::QueryCompleted {
            query_id: Uuid::new_v4(),
        });
    }

    #[tokio::test]
    async fn subscribers_receive_events_in_order() {
        let bus = ProgressBus::default();
        let mut rx = bus.subscribe();
        let id = Uuid::new_v4();

        bus.emit(ProgressEvent::StageStarted {
            query_id: id,
            node: NodeKind::Router,
        });
        bus.emit(ProgressEvent::StageCompleted {
            query_id: id,
            node: NodeKind::Router,
            elapsed_ms: 3,
        });

        assert!(matches!(
            rx.recv().await.unwrap(),
            ProgressEvent::StageStarted { node: NodeKind::Router, .. }
        ));
        assert!(matches!(
            rx.recv().await.unwrap(),
            ProgressEvent::StageCompleted { .. }
        ));
    }
}
