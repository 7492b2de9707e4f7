use engine_core::error::EngineError;
use engine_core::layout;
use engine_core::types::{AuditAction, LOCAL_SPACE_ID, PermissionAction, Room, RoomKind};
use tracing::{info, warn};

use crate::events::{EngineEvent, Severity};
use crate::port::StateDocKind;
use crate::session::Session;

impl Session {
    /// Create a room in a space and place it in the default category.
    pub async fn create_room(
        &self,
        space_id: &str,
        name: &str,
        kind: RoomKind,
    ) -> Result<String, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("empty_name", "room name is empty"));
        }
        {
            let state = self.state.lock().await;
            if !state.spaces.iter().any(|space| space.id == space_id) {
                return Err(EngineError::validation("space_not_found", "unknown space"));
            }
        }
        self.require_capability(space_id, PermissionAction::ManageChannels)
            .await?;

        let parent = if space_id == LOCAL_SPACE_ID {
            None
        } else {
            Some(space_id)
        };
        let room_id = match self.backend().create_room(parent, name, kind).await {
            Ok(room_id) => room_id,
            Err(err) => {
                self.events
                    .notify(Severity::Error, format!("channel create failed: {}", err.message));
                return Err(err);
            }
        };
        info!(room_id = %room_id, space_id = %space_id, "room created");

        // Discovery re-reads the graph and hydrates the new room into the
        // layout; the layout write-through then persists its placement.
        self.refresh_discovery().await?;
        let layout = self.space_layout(space_id).await?;
        if let Err(err) = self.commit_layout(space_id, layout).await {
            self.events.notify(
                Severity::Warning,
                "channel created, but layout sync failed",
            );
            warn!(error = %err, "layout write after room create failed");
        }
        Ok(room_id)
    }

    /// Irreversibly delete a room: an administrative purge, not a leave.
    ///
    /// Admin-only, single purge in flight per room. The layout is only
    /// updated after the backend confirms the purge; a failed secondary
    /// layout write flags partial success without undoing the deletion.
    pub async fn delete_room(&self, room_id: &str) -> Result<(), EngineError> {
        let space_id = {
            let state = self.state.lock().await;
            state
                .room(room_id)
                .map(|room| room.space_id.clone())
                .ok_or_else(|| EngineError::validation("room_not_found", "unknown room"))?
        };
        self.require_purge_capability(&space_id).await?;

        {
            let mut state = self.state.lock().await;
            if !state.purge_in_flight.insert(room_id.to_owned()) {
                return Err(EngineError::validation(
                    "purge_in_progress",
                    "a purge is already running for this room",
                ));
            }
        }

        let result = self.backend().purge_room(room_id).await;
        if let Err(err) = result {
            let mut state = self.state.lock().await;
            state.purge_in_flight.remove(room_id);
            drop(state);
            self.events
                .notify(Severity::Error, format!("channel delete failed: {}", err.message));
            return Err(err);
        }

        let next_layout = {
            let mut state = self.state.lock().await;
            state.purge_in_flight.remove(room_id);
            state.rooms.retain(|room| room.id != room_id);
            state.messages.remove(room_id);
            if state.active_room_id.as_deref() == Some(room_id) {
                state.active_room_id = None;
            }

            let remaining: Vec<Room> = state
                .rooms
                .iter()
                .filter(|room| room.space_id == space_id)
                .cloned()
                .collect();
            let prior = state.layouts.get(&space_id).cloned();
            let next = layout::hydrate(prior.as_ref(), &remaining);
            state.layouts.insert(space_id.clone(), next.clone());
            state.reproject_space(&space_id);
            next
        };
        info!(room_id = %room_id, "room purged");
        self.events.emit(EngineEvent::PurgeCompleted {
            room_id: room_id.to_owned(),
        });
        self.events.emit(EngineEvent::SnapshotUpdated);
        self.record_space_audit(&space_id, AuditAction::RoomPurged, room_id, None)
            .await;

        // Secondary layout write: partial success is surfaced distinctly
        // from a failed deletion.
        let host = match self.state_host(&space_id).await {
            Ok(host) => host,
            Err(_) => return Ok(()),
        };
        let doc = match serde_json::to_value(&next_layout) {
            Ok(doc) => doc,
            Err(err) => {
                warn!(error = %err, "layout encode after purge failed");
                return Ok(());
            }
        };
        if let Err(err) = self
            .backend()
            .state_doc_put(&host, StateDocKind::Layout, doc)
            .await
        {
            warn!(error = %err, "layout write after purge failed");
            self.events.notify(
                Severity::Warning,
                "channel deleted, but layout sync failed",
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use engine_core::types::{DEFAULT_CATEGORY_ID, LOCAL_SPACE_ID, RoomKind};
    use engine_platform::{DocumentSink, InMemorySink};

    use crate::events::EngineEvent;
    use crate::port::{BackendPort, GraphRoom, NullBackend};
    use crate::session::{Session, SessionConfig};

    async fn local_session(rooms: &[&str]) -> (Arc<Session>, Arc<NullBackend>) {
        let sink: Arc<dyn DocumentSink> = Arc::new(InMemorySink::default());
        let session = Session::new(SessionConfig::default(), sink);
        let backend = Arc::new(NullBackend::new("@local:engine"));
        for id in rooms {
            backend.seed_room(GraphRoom {
                id: (*id).to_owned(),
                name: Some(id.trim_start_matches('!').to_owned()),
                ..GraphRoom::default()
            });
        }
        let port: Arc<dyn BackendPort> = backend.clone();
        session.bootstrap(port).await.expect("bootstrap should work");
        (session, backend)
    }

    #[tokio::test]
    async fn created_room_lands_in_the_default_category() {
        let (session, _backend) = local_session(&["!seed:local"]).await;

        let room_id = session
            .create_room(LOCAL_SPACE_ID, "incident", RoomKind::Text)
            .await
            .expect("create should work");

        let snapshot = session.snapshot().await;
        let room = snapshot
            .rooms
            .iter()
            .find(|room| room.id == room_id)
            .expect("room present");
        assert_eq!(room.category_id, DEFAULT_CATEGORY_ID);
        assert_eq!(room.kind, RoomKind::Text);
        assert!(
            snapshot
                .layouts
                .get(LOCAL_SPACE_ID)
                .expect("layout present")
                .rooms
                .contains_key(&room_id)
        );
    }

    #[tokio::test]
    async fn purge_removes_room_layout_placement_and_messages() {
        let (session, _backend) = local_session(&["!a:local", "!b:local"]).await;
        session.set_active_room(Some("!a:local".to_owned())).await;
        session
            .send_message("!a:local", "doomed")
            .await
            .expect("send should work");

        let mut events = session.subscribe();
        session.delete_room("!a:local").await.expect("purge should work");

        let snapshot = session.snapshot().await;
        assert!(!snapshot.rooms.iter().any(|room| room.id == "!a:local"));
        assert!(snapshot.messages_in_room("!a:local").is_empty());
        assert!(
            !snapshot
                .layouts
                .get(LOCAL_SPACE_ID)
                .expect("layout present")
                .rooms
                .contains_key("!a:local")
        );
        assert_eq!(snapshot.active_room_id, None);

        // Audit trail and purge event emitted.
        let audit = snapshot.audit.get(LOCAL_SPACE_ID).expect("audit present");
        assert!(audit.iter().any(|entry| entry.target == "!a:local"));
        let mut saw_purge = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, EngineEvent::PurgeCompleted { ref room_id } if room_id == "!a:local")
            {
                saw_purge = true;
            }
        }
        assert!(saw_purge);
    }

    #[tokio::test]
    async fn double_purge_of_same_room_is_rejected() {
        let (session, _backend) = local_session(&["!a:local"]).await;
        {
            let mut state = session.state.lock().await;
            state.purge_in_flight.insert("!a:local".to_owned());
        }

        let err = session
            .delete_room("!a:local")
            .await
            .expect_err("second purge must be rejected");
        assert_eq!(err.code, "purge_in_progress");
    }

    #[tokio::test]
    async fn unknown_room_purge_fails_validation() {
        let (session, _backend) = local_session(&[]).await;
        let err = session
            .delete_room("!missing:local")
            .await
            .expect_err("unknown room must fail");
        assert_eq!(err.code, "room_not_found");
    }
}
