//! Typed lifecycle events for observers.
//!
//! The engine never talks to a UI; it broadcasts events on a channel and
//! interested layers subscribe. A full channel drops the oldest events for
//! lagging subscribers rather than blocking a sync cycle.

use crate::orchestrator::CycleSummary;
use tidemark_model::RecordFamily;
use tokio::sync::broadcast;

/// Which kind of cycle ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleKind {
    /// Pull both families, prune, then push both families.
    Full,
    /// Push-only flush of local edits.
    Quick,
}

/// A sync lifecycle event.
#[derive(Debug, Clone)]
pub enum SyncEvent {
    /// A cycle began.
    CycleStarted {
        /// Which kind of cycle.
        kind: CycleKind,
    },
    /// A cycle finished; the summary carries its counts.
    CycleCompleted {
        /// The finished cycle's summary.
        summary: CycleSummary,
    },
    /// A cycle aborted before producing a summary.
    CycleFailed {
        /// Human-readable failure description.
        message: String,
    },
    /// A push collided with a newer server version.
    ConflictDetected {
        /// Family of the conflicted record.
        family: RecordFamily,
        /// Business key of the conflicted record.
        logical_id: String,
    },
}

/// Broadcast channel of [`SyncEvent`]s.
pub struct EventBus {
    sender: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    /// Creates a bus holding up to `capacity` undelivered events per
    /// subscriber.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Subscribes to events emitted from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.sender.subscribe()
    }

    /// Emits an event. Having no subscribers is not an error.
    pub(crate) fn emit(&self, event: SyncEvent) {
        let _ = self.sender.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_emitted_events() {
        let bus = EventBus::new(8);
        let mut receiver = bus.subscribe();

        bus.emit(SyncEvent::CycleStarted {
            kind: CycleKind::Quick,
        });

        match receiver.try_recv().unwrap() {
            SyncEvent::CycleStarted { kind } => assert_eq!(kind, CycleKind::Quick),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn emitting_without_subscribers_is_fine() {
        let bus = EventBus::new(8);
        bus.emit(SyncEvent::CycleFailed {
            message: "nobody listening".into(),
        });
    }

    #[test]
    fn late_subscribers_miss_earlier_events() {
        let bus = EventBus::new(8);
        bus.emit(SyncEvent::CycleStarted {
            kind: CycleKind::Full,
        });

        let mut receiver = bus.subscribe();
        assert!(receiver.try_recv().is_err());
    }
}
