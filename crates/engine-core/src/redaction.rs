use thiserror::Error;

use crate::types::PendingRedactionIntent;

/// Errors produced by redaction phase transitions.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RedactionError {
    #[error("cannot transition redaction from {from:?} to {to:?}")]
    InvalidTransition {
        from: RedactionPhase,
        to: RedactionPhase,
    },
}

/// Lifecycle of one pending delete against a not-yet-durable message.
///
/// Success path: `LocalEchoQueued → RemoteEchoFound → Redacted`, optionally
/// passing through `RetryQueued` after a transient failure. `Cancelled` is
/// reached only when the underlying send was aborted before it left the
/// client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedactionPhase {
    LocalEchoQueued,
    RetryQueued,
    RemoteEchoFound,
    Redacted,
    Cancelled,
}

impl RedactionPhase {
    /// Whether this phase ends the reconciliation.
    pub fn is_terminal(self) -> bool {
        matches!(self, RedactionPhase::Redacted | RedactionPhase::Cancelled)
    }

    /// Attempt a transition, rejecting anything outside the state machine.
    pub fn transition(self, to: RedactionPhase) -> Result<RedactionPhase, RedactionError> {
        use RedactionPhase::*;

        let legal = matches!(
            (self, to),
            (LocalEchoQueued, RemoteEchoFound)
                | (LocalEchoQueued, Cancelled)
                | (LocalEchoQueued, RetryQueued)
                | (RetryQueued, RemoteEchoFound)
                | (RemoteEchoFound, Redacted)
        );
        if legal {
            Ok(to)
        } else {
            Err(RedactionError::InvalidTransition { from: self, to })
        }
    }
}

/// Drop duplicate intents, keeping the first entry per `(room_id, txn_id)`.
pub fn dedupe_intents(intents: Vec<PendingRedactionIntent>) -> Vec<PendingRedactionIntent> {
    let mut out: Vec<PendingRedactionIntent> = Vec::with_capacity(intents.len());
    for intent in intents {
        if !out
            .iter()
            .any(|existing| existing.room_id == intent.room_id && existing.txn_id == intent.txn_id)
        {
            out.push(intent);
        }
    }
    out
}

/// Prune intents by age then count.
///
/// Entries older than `ttl_ms` are dropped first; if more than `cap` remain,
/// only the newest `cap` survive. Run on every load/save cycle.
pub fn prune_intents(
    intents: Vec<PendingRedactionIntent>,
    now_ms: u64,
    ttl_ms: u64,
    cap: usize,
) -> Vec<PendingRedactionIntent> {
    let mut kept: Vec<PendingRedactionIntent> = intents
        .into_iter()
        .filter(|intent| now_ms.saturating_sub(intent.queued_at_ms) <= ttl_ms)
        .collect();
    kept.sort_by(|a, b| b.queued_at_ms.cmp(&a.queued_at_ms));
    kept.truncate(cap);
    kept
}

#[cfg(test)]
mod tests {
    use super::*;

    fn intent(room: &str, txn: &str, queued_at_ms: u64) -> PendingRedactionIntent {
        PendingRedactionIntent {
            room_id: room.to_owned(),
            txn_id: txn.to_owned(),
            source_message_id: format!("~{room}:{txn}"),
            queued_at_ms,
        }
    }

    #[test]
    fn success_path_transitions_are_legal() {
        let phase = RedactionPhase::LocalEchoQueued;
        let phase = phase
            .transition(RedactionPhase::RemoteEchoFound)
            .expect("echo found");
        let phase = phase.transition(RedactionPhase::Redacted).expect("redacted");
        assert!(phase.is_terminal());
    }

    #[test]
    fn retry_path_transitions_are_legal() {
        let phase = RedactionPhase::LocalEchoQueued
            .transition(RedactionPhase::RetryQueued)
            .expect("retry queued");
        let phase = phase
            .transition(RedactionPhase::RemoteEchoFound)
            .expect("echo found");
        assert_eq!(
            phase.transition(RedactionPhase::Redacted),
            Ok(RedactionPhase::Redacted)
        );
    }

    #[test]
    fn cancel_is_only_reachable_from_queued() {
        assert!(
            RedactionPhase::LocalEchoQueued
                .transition(RedactionPhase::Cancelled)
                .expect("cancel from queued")
                .is_terminal()
        );
        let err = RedactionPhase::RemoteEchoFound
            .transition(RedactionPhase::Cancelled)
            .expect_err("cancel after echo found must fail");
        assert_eq!(
            err,
            RedactionError::InvalidTransition {
                from: RedactionPhase::RemoteEchoFound,
                to: RedactionPhase::Cancelled,
            }
        );
    }

    #[test]
    fn terminal_phases_reject_further_transitions() {
        for terminal in [RedactionPhase::Redacted, RedactionPhase::Cancelled] {
            assert!(terminal.transition(RedactionPhase::RetryQueued).is_err());
        }
    }

    #[test]
    fn dedupe_keeps_first_per_room_and_txn() {
        let deduped = dedupe_intents(vec![
            intent("room-1", "tx1", 10),
            intent("room-1", "tx1", 20),
            intent("room-2", "tx1", 30),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].queued_at_ms, 10);
    }

    #[test]
    fn prune_applies_ttl_before_cap() {
        let now = 100_000;
        let pruned = prune_intents(
            vec![
                intent("room-1", "old", 1_000),
                intent("room-1", "new", 99_000),
                intent("room-1", "newer", 99_500),
            ],
            now,
            10_000,
            1,
        );
        assert_eq!(pruned.len(), 1);
        assert_eq!(pruned[0].txn_id, "newer");
    }

    #[test]
    fn prune_keeps_everything_under_limits() {
        let intents = vec![intent("room-1", "a", 50), intent("room-1", "b", 60)];
        let pruned = prune_intents(intents.clone(), 100, 1_000, 10);
        assert_eq!(pruned.len(), 2);
        // Newest-first after pruning.
        assert_eq!(pruned[0].txn_id, "b");
    }
}
