use engine_core::error::EngineError;
use engine_core::timeline::{self, is_local_echo_id, local_echo_id};
use engine_core::types::{AuditAction, Message, MessageStatus, PermissionAction};
use tracing::{debug, warn};

use crate::events::{EngineEvent, Severity};
use crate::session::Session;

impl Session {
    /// Send a message to a room; returns the committed message id.
    ///
    /// With the offline flag set the message is committed immediately as a
    /// `Queued` local echo. Otherwise it is written through the backend and
    /// committed with its durable id.
    pub async fn send_message(&self, room_id: &str, body: &str) -> Result<String, EngineError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(EngineError::validation("empty_message", "message body is empty"));
        }

        let (space_id, offline) = {
            let state = self.state.lock().await;
            let room = state
                .room(room_id)
                .ok_or_else(|| EngineError::validation("room_not_found", "unknown room"))?;
            (room.space_id.clone(), state.offline)
        };
        self.require_capability(&space_id, PermissionAction::SendMessages)
            .await?;

        let txn_id = self.new_txn_id();
        if offline {
            let id = local_echo_id(room_id, &txn_id);
            let message = self.build_own_message(&id, room_id, body, MessageStatus::Queued);
            self.commit_message(room_id, message).await;
            debug!(room_id = %room_id, txn_id = %txn_id, "queued offline message");
            return Ok(id);
        }

        match self.backend().send_message(room_id, &txn_id, body).await {
            Ok(event_id) => {
                let message =
                    self.build_own_message(&event_id, room_id, body, MessageStatus::Sent);
                self.commit_message(room_id, message).await;
                Ok(event_id)
            }
            Err(err) => {
                self.events
                    .notify(Severity::Error, format!("send failed: {}", err.message));
                Err(err)
            }
        }
    }

    /// Toggle the acting user's reaction on a message.
    ///
    /// Committed optimistically; a failed remote write is surfaced but the
    /// local commit is not rolled back.
    pub async fn toggle_reaction(
        &self,
        room_id: &str,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), EngineError> {
        let user_id = self.user_id();
        {
            let mut state = self.state.lock().await;
            let Some(messages) = state.messages.get_mut(room_id) else {
                return Err(EngineError::validation("room_not_found", "unknown room"));
            };
            if !timeline::toggle_reaction(messages, message_id, emoji, &user_id) {
                return Err(EngineError::validation("message_not_found", "unknown message"));
            }
        }
        self.events.emit(EngineEvent::SnapshotUpdated);

        if !is_local_echo_id(message_id) {
            if let Err(err) = self
                .backend()
                .toggle_reaction(room_id, message_id, emoji)
                .await
            {
                self.events
                    .notify(Severity::Warning, format!("reaction sync failed: {}", err.message));
            }
        }
        Ok(())
    }

    /// Toggle the pinned flag on a message; returns the new state.
    pub async fn toggle_pin(&self, room_id: &str, message_id: &str) -> Result<bool, EngineError> {
        let (space_id, pinned) = {
            let state = self.state.lock().await;
            let room = state
                .room(room_id)
                .ok_or_else(|| EngineError::validation("room_not_found", "unknown room"))?;
            let message = state
                .messages
                .get(room_id)
                .and_then(|messages| messages.iter().find(|m| m.id == message_id))
                .ok_or_else(|| EngineError::validation("message_not_found", "unknown message"))?;
            (room.space_id.clone(), message.pinned)
        };
        self.require_capability(&space_id, PermissionAction::PinMessages)
            .await?;

        let next = !pinned;
        {
            let mut state = self.state.lock().await;
            if let Some(messages) = state.messages.get_mut(room_id) {
                timeline::set_pinned(messages, message_id, next);
            }
        }
        self.events.emit(EngineEvent::SnapshotUpdated);

        if !is_local_echo_id(message_id) {
            if let Err(err) = self.backend().set_pinned(room_id, message_id, next).await {
                self.events
                    .notify(Severity::Warning, format!("pin sync failed: {}", err.message));
            }
        }
        if next {
            self.record_space_audit(
                &space_id,
                AuditAction::MessagePinned,
                room_id,
                Some(message_id.to_owned()),
            )
            .await;
        }
        Ok(next)
    }

    /// Load older history for a room.
    ///
    /// Serialized per room: a second request while one is outstanding is
    /// dropped (returns `false`). A result arriving after the user switched
    /// rooms is discarded.
    pub async fn paginate_history(&self, room_id: &str, limit: u16) -> Result<bool, EngineError> {
        let before = {
            let mut state = self.state.lock().await;
            if state.room(room_id).is_none() {
                return Err(EngineError::validation("room_not_found", "unknown room"));
            }
            if !state.pagination_loading.insert(room_id.to_owned()) {
                debug!(room_id = %room_id, "pagination already in flight; dropping request");
                return Ok(false);
            }
            state
                .messages
                .get(room_id)
                .and_then(|messages| messages.first())
                .map(|message| message.id.clone())
        };

        let result = self
            .backend()
            .paginate_history(room_id, before.as_deref(), limit)
            .await;

        let mut state = self.state.lock().await;
        state.pagination_loading.remove(room_id);
        let older = match result {
            Ok(older) => older,
            Err(err) => {
                drop(state);
                self.events
                    .notify(Severity::Warning, format!("history load failed: {}", err.message));
                return Err(err);
            }
        };

        // The continuation re-reads the latest snapshot: a backfill for a
        // room the user already left must not overwrite newer state.
        if state.active_room_id.as_deref() != Some(room_id) {
            debug!(room_id = %room_id, "dropping stale pagination result");
            return Ok(false);
        }

        let existing = state
            .messages
            .get(room_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        let merged = timeline::merge(existing, &older, &[]);
        state.messages.insert(room_id.to_owned(), merged);
        drop(state);

        self.events.emit(EngineEvent::SnapshotUpdated);
        Ok(true)
    }

    /// Clear a room's unread count locally and at the backend.
    pub async fn mark_read(&self, room_id: &str) -> Result<(), EngineError> {
        {
            let mut state = self.state.lock().await;
            let Some(room) = state.rooms.iter_mut().find(|room| room.id == room_id) else {
                return Err(EngineError::validation("room_not_found", "unknown room"));
            };
            room.unread_count = 0;
        }
        self.events.emit(EngineEvent::SnapshotUpdated);

        if let Err(err) = self.backend().mark_read(room_id).await {
            warn!(room_id = %room_id, error = %err, "mark-read write failed");
        }
        Ok(())
    }

    fn build_own_message(
        &self,
        id: &str,
        room_id: &str,
        body: &str,
        status: MessageStatus,
    ) -> Message {
        Message {
            id: id.to_owned(),
            room_id: room_id.to_owned(),
            author_id: self.user_id(),
            body: body.to_owned(),
            timestamp_ms: crate::now_ms(),
            reactions: Vec::new(),
            attachments: Vec::new(),
            reply_to_id: None,
            thread_root_id: None,
            pinned: false,
            status,
        }
    }

    async fn commit_message(&self, room_id: &str, message: Message) {
        {
            let mut state = self.state.lock().await;
            // Re-check after the remote write: the room may have been purged
            // while the send was in flight.
            if state.room(room_id).is_none() {
                warn!(room_id = %room_id, "room vanished during send; dropping commit");
                return;
            }
            let existing = state
                .messages
                .get(room_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let merged = timeline::merge(existing, &[message], &[]);
            state.messages.insert(room_id.to_owned(), merged);
        }
        self.events.emit(EngineEvent::SnapshotUpdated);
    }
}
