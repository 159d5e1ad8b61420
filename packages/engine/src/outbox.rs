//! In-process outbox for hook side effects that need asynchronous follow-up.

use ci_core::EngineEvent;
use tokio::sync::broadcast;

/// Fan-out channel of [`EngineEvent`]s. Cheap to clone.
#[derive(Clone)]
pub struct Outbox {
    tx: broadcast::Sender<EngineEvent>,
}

impl Outbox {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event. Events with no subscriber are dropped.
    pub fn emit(&self, event: EngineEvent) {
        tracing::debug!("Outbox: {}", event.description());
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
