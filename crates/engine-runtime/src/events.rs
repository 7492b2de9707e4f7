use tokio::sync::broadcast;

use crate::session::SessionState;

/// Severity of a user-facing notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Lightweight user-facing notification dispatched locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub severity: Severity,
    pub text: String,
}

/// Events emitted to presentation-layer subscribers.
///
/// Snapshot-bearing events are intentionally payload-free: consumers re-read
/// the latest snapshot instead of holding a stale copy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Session lifecycle transition.
    SessionChanged { state: SessionState },
    /// The snapshot changed; re-read it.
    SnapshotUpdated,
    /// User-facing notice.
    Notice(Notice),
    /// A deferred redaction finally reached the backend.
    RedactionSettled { room_id: String, event_id: String },
    /// An administrative purge finished and the room is gone.
    PurgeCompleted { room_id: String },
}

/// Broadcast event stream consumed by the presentation layer.
pub type EventStream = broadcast::Receiver<EngineEvent>;

/// Fan-out hub for engine events.
#[derive(Clone, Debug)]
pub struct EventHub {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> EventStream {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers.
    ///
    /// Emission is best-effort; lagged subscribers are handled by `broadcast`.
    pub fn emit(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn notify(&self, severity: Severity, text: impl Into<String>) {
        self.emit(EngineEvent::Notice(Notice {
            severity,
            text: text.into(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fans_out_events_to_subscribers() {
        let hub = EventHub::new(16);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.emit(EngineEvent::SnapshotUpdated);

        let event_a = a.recv().await.expect("subscriber a should receive event");
        let event_b = b.recv().await.expect("subscriber b should receive event");
        assert_eq!(event_a, event_b);
    }

    #[tokio::test]
    async fn notices_carry_severity_and_text() {
        let hub = EventHub::new(4);
        let mut rx = hub.subscribe();
        hub.notify(Severity::Warning, "channel delete failed");

        match rx.recv().await.expect("event receive") {
            EngineEvent::Notice(notice) => {
                assert_eq!(notice.severity, Severity::Warning);
                assert_eq!(notice.text, "channel delete failed");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
}
