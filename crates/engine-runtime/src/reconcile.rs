//! Deferred redaction reconciliation.
//!
//! Deleting a message that only exists as a local echo cannot be redacted
//! directly: the backend has no durable id for it yet. The session first
//! tries to cancel the unsent echo, then searches the timeline for a durable
//! event carrying the echo's transaction id, and only then persists a
//! pending intent that is retried whenever the echo resolves, the room's
//! timeline moves, or the user re-opens the room.

use engine_core::error::EngineError;
use engine_core::timeline::{is_local_echo_id, local_echo_id, parse_local_echo_id};
use engine_core::types::{AuditAction, MessageStatus, PendingRedactionIntent};
use tracing::{debug, trace, warn};

use crate::events::{EngineEvent, Severity};
use crate::session::Session;

impl Session {
    /// Delete a message, reconciling local echoes against remote truth.
    pub async fn redact_message(
        &self,
        room_id: &str,
        message_id: &str,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if !is_local_echo_id(message_id) {
            return self.redact_durable(room_id, message_id, reason).await;
        }

        let (echo_room, txn_id) = match parse_local_echo_id(message_id) {
            Some((room, txn)) => (room.to_owned(), txn.to_owned()),
            None => (room_id.to_owned(), message_id.trim_start_matches('~').to_owned()),
        };

        // (1) Abort the send outright while it is still cancellable.
        let backend = self.backend();
        if backend.cancel_local_send(&echo_room, &txn_id).await? {
            debug!(room_id = %echo_room, txn_id = %txn_id, "cancelled unsent local echo");
            self.drop_messages(&echo_room, &[message_id.to_owned()]).await;
            return Ok(());
        }

        // (2) The send already left: look for the durable event by txn marker.
        match backend.find_event_by_txn(&echo_room, &txn_id).await {
            Ok(Some(event_id)) if !is_local_echo_id(&event_id) => {
                self.settle_guarded(&echo_room, &txn_id, &event_id, false)
                    .await;
                return Ok(());
            }
            Ok(_) => {}
            Err(err) if err.is_transient() => {
                trace!(error = %err, "txn lookup failed transiently; queueing intent");
            }
            Err(err) => return Err(err),
        }

        // (3) Persist an intent; the echo-resolution signal and timeline
        // sweeps retry it until the TTL expires.
        let intent = PendingRedactionIntent {
            room_id: echo_room.clone(),
            txn_id: txn_id.clone(),
            source_message_id: message_id.to_owned(),
            queued_at_ms: crate::now_ms(),
        };
        let now = crate::now_ms();
        match self.redactions.push(intent, now) {
            Ok(intents) => {
                let mut state = self.state.lock().await;
                state.pending_redactions = intents;
            }
            Err(err) => {
                warn!(error = %err, "failed persisting redaction intent; keeping in memory");
                let mut state = self.state.lock().await;
                state.pending_redactions.push(PendingRedactionIntent {
                    room_id: echo_room.clone(),
                    txn_id: txn_id.clone(),
                    source_message_id: message_id.to_owned(),
                    queued_at_ms: now,
                });
            }
        }
        self.events
            .notify(Severity::Info, "message will be deleted once it finishes sending");
        Ok(())
    }

    /// Redact a message that already has a durable id.
    async fn redact_durable(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<String>,
    ) -> Result<(), EngineError> {
        if let Err(err) = self
            .backend()
            .redact_event(room_id, event_id, reason.as_deref())
            .await
        {
            self.events
                .notify(Severity::Error, format!("delete failed: {}", err.message));
            return Err(err);
        }

        self.drop_messages(room_id, &[event_id.to_owned()]).await;
        let space_id = {
            let state = self.state.lock().await;
            state.room(room_id).map(|room| room.space_id.clone())
        };
        if let Some(space_id) = space_id {
            self.record_space_audit(
                &space_id,
                AuditAction::MessageRedacted,
                room_id,
                Some(event_id.to_owned()),
            )
            .await;
        }
        Ok(())
    }

    /// Opportunistic sweep for one room: retry every pending intent whose
    /// durable event can now be located.
    pub(crate) async fn sweep_room(&self, room_id: &str) {
        let intents: Vec<PendingRedactionIntent> = {
            let state = self.state.lock().await;
            state
                .pending_redactions
                .iter()
                .filter(|intent| intent.room_id == room_id)
                .cloned()
                .collect()
        };
        if intents.is_empty() {
            return;
        }

        let backend = self.backend();
        for intent in intents {
            match backend
                .find_event_by_txn(&intent.room_id, &intent.txn_id)
                .await
            {
                Ok(Some(event_id)) if !is_local_echo_id(&event_id) => {
                    self.settle_guarded(&intent.room_id, &intent.txn_id, &event_id, true)
                        .await;
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(
                        room_id = %intent.room_id,
                        txn_id = %intent.txn_id,
                        error = %err,
                        "redaction sweep lookup failed; will retry"
                    );
                }
            }
        }
    }

    /// React to "local id replaced by durable id": rewrite the echo message
    /// in place, then settle any pending intent for it.
    pub(crate) async fn on_echo_resolved(&self, room_id: &str, txn_id: &str, event_id: &str) {
        let echo_id = local_echo_id(room_id, txn_id);
        {
            let mut state = self.state.lock().await;
            if let Some(messages) = state.messages.get_mut(room_id) {
                if let Some(message) = messages.iter_mut().find(|m| m.id == echo_id) {
                    message.id = event_id.to_owned();
                    message.status = MessageStatus::Sent;
                }
            }
        }
        self.events.emit(EngineEvent::SnapshotUpdated);
        self.settle_intent_if_pending(room_id, txn_id, event_id).await;
    }

    /// Settle one intent if it is still pending.
    pub(crate) async fn settle_intent_if_pending(
        &self,
        room_id: &str,
        txn_id: &str,
        event_id: &str,
    ) {
        self.settle_guarded(room_id, txn_id, event_id, true).await;
    }

    /// Issue exactly one redaction per `(room_id, txn_id)` even when several
    /// triggers fire close together, via the in-memory in-flight set.
    ///
    /// With `require_pending`, the intent's continued existence is checked
    /// under the same lock as the guard insert, so a sweep that lost the
    /// race to an earlier settle backs off instead of redacting twice.
    async fn settle_guarded(
        &self,
        room_id: &str,
        txn_id: &str,
        event_id: &str,
        require_pending: bool,
    ) -> bool {
        let key = (room_id.to_owned(), txn_id.to_owned());
        {
            let mut state = self.state.lock().await;
            if require_pending
                && !state
                    .pending_redactions
                    .iter()
                    .any(|intent| intent.room_id == room_id && intent.txn_id == txn_id)
            {
                return false;
            }
            if !state.redaction_in_flight.insert(key.clone()) {
                trace!(room_id = %room_id, txn_id = %txn_id, "redaction already in flight");
                return false;
            }
        }

        let result = self.backend().redact_event(room_id, event_id, None).await;

        let mut state = self.state.lock().await;
        state.redaction_in_flight.remove(&key);
        match result {
            Ok(()) => {
                state
                    .pending_redactions
                    .retain(|intent| !(intent.room_id == room_id && intent.txn_id == txn_id));
                let remaining = state.pending_redactions.clone();
                drop(state);
                if let Err(err) = self.redactions.save(remaining, crate::now_ms()) {
                    warn!(error = %err, "failed persisting redaction queue after settle");
                }

                let echo_id = local_echo_id(room_id, txn_id);
                self.drop_messages(room_id, &[echo_id, event_id.to_owned()])
                    .await;
                self.events.emit(EngineEvent::RedactionSettled {
                    room_id: room_id.to_owned(),
                    event_id: event_id.to_owned(),
                });
                debug!(room_id = %room_id, txn_id = %txn_id, "pending redaction settled");
                true
            }
            Err(err) => {
                drop(state);
                // Retry-queued: the intent stays for the next sweep; only a
                // fully exhausted reconciliation surfaces to the user.
                warn!(
                    room_id = %room_id,
                    txn_id = %txn_id,
                    error = %err,
                    "deferred redaction attempt failed; keeping intent"
                );
                if !err.is_transient() {
                    self.events
                        .notify(Severity::Warning, "message delete is still syncing");
                }
                false
            }
        }
    }

    /// Remove messages by id from one room's merged list.
    pub(crate) async fn drop_messages(&self, room_id: &str, remove_ids: &[String]) {
        {
            let mut state = self.state.lock().await;
            if let Some(messages) = state.messages.get_mut(room_id) {
                let merged = engine_core::timeline::merge(messages, &[], remove_ids);
                *messages = merged;
            }
        }
        self.events.emit(EngineEvent::SnapshotUpdated);
    }
}
