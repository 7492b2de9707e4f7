use std::{
    collections::HashMap,
    sync::Mutex,
};

use async_trait::async_trait;
use engine_core::error::{EngineError, EngineErrorCategory};
use engine_core::permissions::Membership;
use engine_core::types::{Message, MessageStatus, RoomKind};
use serde_json::Value;
use tokio::sync::broadcast;

/// Which backend implementation is driving the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// In-memory mock graph; local simulation mode.
    Null,
    /// Federated protocol backend.
    Federated,
}

/// One room as reported by the backend's membership graph.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphRoom {
    pub id: String,
    pub name: Option<String>,
    pub topic: Option<String>,
    /// Member of the direct-message registry.
    pub is_direct: bool,
    /// Explicit custom room-type marker, when one was written.
    pub kind_marker: Option<RoomKind>,
    /// Administrative "deleted" marker; the room is tombstoned but the
    /// backend has not purged it yet.
    pub tombstoned: bool,
    /// This room is a space grouping container, not a chat room.
    pub is_space_container: bool,
    /// Child room ids, for containers.
    pub child_room_ids: Vec<String>,
    pub unread_count: u64,
    pub is_welcome: bool,
}

/// Joined/invited room graph snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RoomGraph {
    pub rooms: Vec<GraphRoom>,
}

/// Custom state documents layered on the backend's state-event mechanism.
///
/// Each lives at a fixed state key (empty string, singleton per room) and is
/// defensively re-normalized on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateDocKind {
    RoomKind,
    Layout,
    Settings,
    NameOverride,
    Overrides,
    Audit,
}

impl StateDocKind {
    /// Wire event type for this document.
    pub fn event_type(self) -> &'static str {
        match self {
            StateDocKind::RoomKind => "io.quorum.room.kind",
            StateDocKind::Layout => "io.quorum.space.layout",
            StateDocKind::Settings => "io.quorum.space.settings",
            StateDocKind::NameOverride => "io.quorum.space.name",
            StateDocKind::Overrides => "io.quorum.space.overrides",
            StateDocKind::Audit => "io.quorum.space.audit",
        }
    }

    /// Reverse lookup used when classifying incoming state events.
    pub fn from_event_type(event_type: &str) -> Option<Self> {
        match event_type {
            "io.quorum.room.kind" => Some(StateDocKind::RoomKind),
            "io.quorum.space.layout" => Some(StateDocKind::Layout),
            "io.quorum.space.settings" => Some(StateDocKind::Settings),
            "io.quorum.space.name" => Some(StateDocKind::NameOverride),
            "io.quorum.space.overrides" => Some(StateDocKind::Overrides),
            "io.quorum.space.audit" => Some(StateDocKind::Audit),
            _ => None,
        }
    }
}

/// Asynchronous backend happenings forwarded to the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendSignal {
    /// New timeline event in a room.
    Timeline {
        room_id: String,
        message: Message,
        /// Protocol-level transaction marker, when the event carries one.
        txn_id: Option<String>,
    },
    /// A local echo was replaced by a durable event id.
    EchoResolved {
        room_id: String,
        txn_id: String,
        event_id: String,
    },
    /// Room name/account-data changed.
    RoomMetaChanged { room_id: String },
    /// One of the custom state documents changed in a room.
    StateDocChanged { room_id: String, kind: StateDocKind },
    /// Generic sync-state transition.
    SyncState { syncing: bool },
}

/// Capability surface of a chat backend.
///
/// Exactly two implementations exist: [`NullBackend`] for local simulation
/// and the federated adapter. Façade operations depend only on this trait,
/// which keeps them free of connected/local branching.
#[async_trait]
pub trait BackendPort: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Acting user id.
    fn user_id(&self) -> String;

    /// Subscribe to backend signals. Safe to call repeatedly.
    fn subscribe(&self) -> broadcast::Receiver<BackendSignal>;

    /// Current joined/invited room graph.
    async fn room_graph(&self) -> Result<RoomGraph, EngineError>;

    /// Create a chat room, optionally parented to a grouping container.
    async fn create_room(
        &self,
        parent_space_id: Option<&str>,
        name: &str,
        kind: RoomKind,
    ) -> Result<String, EngineError>;

    /// Create a space grouping container, returning its id.
    async fn create_space(&self, name: &str) -> Result<String, EngineError>;

    /// Send a message; returns the durable event id.
    async fn send_message(
        &self,
        room_id: &str,
        txn_id: &str,
        body: &str,
    ) -> Result<String, EngineError>;

    /// Redact a durable event.
    async fn redact_event(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
    ) -> Result<(), EngineError>;

    /// Abort a still-unsent local echo. Returns whether cancellation won the
    /// race against the send progressing past its cancellable stage.
    async fn cancel_local_send(&self, room_id: &str, txn_id: &str) -> Result<bool, EngineError>;

    /// Search the room timeline for a durable event carrying `txn_id`.
    async fn find_event_by_txn(
        &self,
        room_id: &str,
        txn_id: &str,
    ) -> Result<Option<String>, EngineError>;

    /// Fetch older history. `before` is an opaque pagination token.
    async fn paginate_history(
        &self,
        room_id: &str,
        before: Option<&str>,
        limit: u16,
    ) -> Result<Vec<Message>, EngineError>;

    async fn toggle_reaction(
        &self,
        room_id: &str,
        event_id: &str,
        emoji: &str,
    ) -> Result<(), EngineError>;

    async fn set_pinned(
        &self,
        room_id: &str,
        event_id: &str,
        pinned: bool,
    ) -> Result<(), EngineError>;

    async fn mark_read(&self, room_id: &str) -> Result<(), EngineError>;

    /// Read a custom state document from a room.
    async fn state_doc_get(
        &self,
        room_id: &str,
        kind: StateDocKind,
    ) -> Result<Option<Value>, EngineError>;

    /// Write a custom state document to a room.
    async fn state_doc_put(
        &self,
        room_id: &str,
        kind: StateDocKind,
        content: Value,
    ) -> Result<(), EngineError>;

    /// Membership and durable power level of a user in a room.
    async fn membership_power_level(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<(Membership, Option<i64>), EngineError>;

    /// Irreversibly purge a room and its history.
    async fn purge_room(&self, room_id: &str) -> Result<(), EngineError>;
}

#[derive(Debug, Default)]
struct NullState {
    rooms: Vec<GraphRoom>,
    timelines: HashMap<String, Vec<Message>>,
    archives: HashMap<String, Vec<Message>>,
    docs: HashMap<(String, &'static str), Value>,
    txn_index: HashMap<(String, String), String>,
    cancellable: HashMap<(String, String), bool>,
    next_id: u64,
    redaction_calls: u64,
}

/// In-memory backend powering local simulation mode and tests.
///
/// Every operation succeeds instantly against a mock graph; event ids are
/// engine-generated. Test helpers simulate remote deliveries and echo
/// resolution so reconciliation paths can be exercised without a server.
pub struct NullBackend {
    user_id: String,
    state: Mutex<NullState>,
    signals: broadcast::Sender<BackendSignal>,
}

impl NullBackend {
    pub fn new(user_id: impl Into<String>) -> Self {
        let (signals, _) = broadcast::channel(64);
        Self {
            user_id: user_id.into(),
            state: Mutex::new(NullState::default()),
            signals,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NullState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_id(state: &mut NullState, prefix: &str) -> String {
        state.next_id += 1;
        format!("{prefix}-{}:local", state.next_id)
    }

    /// Number of redaction calls issued so far. Used to assert that
    /// reconciliation sweeps never double-redact.
    pub fn redaction_calls(&self) -> u64 {
        self.lock().redaction_calls
    }

    /// Seed one graph room directly.
    pub fn seed_room(&self, room: GraphRoom) {
        self.lock().rooms.push(room);
    }

    /// Seed older history returned by pagination.
    pub fn seed_archive(&self, room_id: &str, messages: Vec<Message>) {
        self.lock().archives.insert(room_id.to_owned(), messages);
    }

    /// Mark a send as still cancellable, simulating a queued outbound event.
    pub fn mark_cancellable(&self, room_id: &str, txn_id: &str) {
        self.lock()
            .cancellable
            .insert((room_id.to_owned(), txn_id.to_owned()), true);
    }

    /// Simulate a remote timeline delivery carrying an optional txn marker.
    pub fn deliver_remote(&self, room_id: &str, message: Message, txn_id: Option<String>) {
        {
            let mut state = self.lock();
            if let Some(txn) = &txn_id {
                state
                    .txn_index
                    .insert((room_id.to_owned(), txn.clone()), message.id.clone());
            }
            state
                .timelines
                .entry(room_id.to_owned())
                .or_default()
                .push(message.clone());
        }
        let _ = self.signals.send(BackendSignal::Timeline {
            room_id: room_id.to_owned(),
            message,
            txn_id,
        });
    }

    /// Simulate the "local id replaced by durable id" backend callback.
    pub fn resolve_echo(&self, room_id: &str, txn_id: &str, event_id: &str) {
        self.lock().txn_index.insert(
            (room_id.to_owned(), txn_id.to_owned()),
            event_id.to_owned(),
        );
        let _ = self.signals.send(BackendSignal::EchoResolved {
            room_id: room_id.to_owned(),
            txn_id: txn_id.to_owned(),
            event_id: event_id.to_owned(),
        });
    }
}

#[async_trait]
impl BackendPort for NullBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Null
    }

    fn user_id(&self) -> String {
        self.user_id.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendSignal> {
        self.signals.subscribe()
    }

    async fn room_graph(&self) -> Result<RoomGraph, EngineError> {
        Ok(RoomGraph {
            rooms: self.lock().rooms.clone(),
        })
    }

    async fn create_room(
        &self,
        parent_space_id: Option<&str>,
        name: &str,
        kind: RoomKind,
    ) -> Result<String, EngineError> {
        let mut state = self.lock();
        let id = Self::next_id(&mut state, "!room");
        state.rooms.push(GraphRoom {
            id: id.clone(),
            name: Some(name.to_owned()),
            is_direct: kind == RoomKind::Direct,
            kind_marker: Some(kind),
            ..GraphRoom::default()
        });
        if let Some(parent) = parent_space_id {
            if let Some(container) = state
                .rooms
                .iter_mut()
                .find(|room| room.id == parent && room.is_space_container)
            {
                container.child_room_ids.push(id.clone());
            }
        }
        Ok(id)
    }

    async fn create_space(&self, name: &str) -> Result<String, EngineError> {
        let mut state = self.lock();
        let id = Self::next_id(&mut state, "!space");
        state.rooms.push(GraphRoom {
            id: id.clone(),
            name: Some(name.to_owned()),
            is_space_container: true,
            ..GraphRoom::default()
        });
        Ok(id)
    }

    async fn send_message(
        &self,
        room_id: &str,
        txn_id: &str,
        body: &str,
    ) -> Result<String, EngineError> {
        let mut state = self.lock();
        state.next_id += 1;
        let event_id = format!("$local-{}", state.next_id);
        let message = Message {
            id: event_id.clone(),
            room_id: room_id.to_owned(),
            author_id: self.user_id.clone(),
            body: body.to_owned(),
            timestamp_ms: crate::now_ms(),
            reactions: Vec::new(),
            attachments: Vec::new(),
            reply_to_id: None,
            thread_root_id: None,
            pinned: false,
            status: MessageStatus::Sent,
        };
        state
            .txn_index
            .insert((room_id.to_owned(), txn_id.to_owned()), event_id.clone());
        state
            .timelines
            .entry(room_id.to_owned())
            .or_default()
            .push(message);
        Ok(event_id)
    }

    async fn redact_event(
        &self,
        room_id: &str,
        event_id: &str,
        _reason: Option<&str>,
    ) -> Result<(), EngineError> {
        let mut state = self.lock();
        state.redaction_calls += 1;
        if let Some(timeline) = state.timelines.get_mut(room_id) {
            timeline.retain(|message| message.id != event_id);
        }
        Ok(())
    }

    async fn cancel_local_send(&self, room_id: &str, txn_id: &str) -> Result<bool, EngineError> {
        let mut state = self.lock();
        Ok(state
            .cancellable
            .remove(&(room_id.to_owned(), txn_id.to_owned()))
            .unwrap_or(false))
    }

    async fn find_event_by_txn(
        &self,
        room_id: &str,
        txn_id: &str,
    ) -> Result<Option<String>, EngineError> {
        Ok(self
            .lock()
            .txn_index
            .get(&(room_id.to_owned(), txn_id.to_owned()))
            .cloned())
    }

    async fn paginate_history(
        &self,
        room_id: &str,
        _before: Option<&str>,
        limit: u16,
    ) -> Result<Vec<Message>, EngineError> {
        let mut state = self.lock();
        let Some(archive) = state.archives.get_mut(room_id) else {
            return Ok(Vec::new());
        };
        let take = (limit as usize).min(archive.len());
        let start = archive.len() - take;
        Ok(archive.drain(start..).collect())
    }

    async fn toggle_reaction(
        &self,
        room_id: &str,
        event_id: &str,
        emoji: &str,
    ) -> Result<(), EngineError> {
        let user = self.user_id.clone();
        let mut state = self.lock();
        if let Some(timeline) = state.timelines.get_mut(room_id) {
            engine_core::timeline::toggle_reaction(timeline, event_id, emoji, &user);
        }
        Ok(())
    }

    async fn set_pinned(
        &self,
        room_id: &str,
        event_id: &str,
        pinned: bool,
    ) -> Result<(), EngineError> {
        let mut state = self.lock();
        if let Some(timeline) = state.timelines.get_mut(room_id) {
            engine_core::timeline::set_pinned(timeline, event_id, pinned);
        }
        Ok(())
    }

    async fn mark_read(&self, room_id: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        if let Some(room) = state.rooms.iter_mut().find(|room| room.id == room_id) {
            room.unread_count = 0;
        }
        Ok(())
    }

    async fn state_doc_get(
        &self,
        room_id: &str,
        kind: StateDocKind,
    ) -> Result<Option<Value>, EngineError> {
        Ok(self
            .lock()
            .docs
            .get(&(room_id.to_owned(), kind.event_type()))
            .cloned())
    }

    async fn state_doc_put(
        &self,
        room_id: &str,
        kind: StateDocKind,
        content: Value,
    ) -> Result<(), EngineError> {
        self.lock()
            .docs
            .insert((room_id.to_owned(), kind.event_type()), content);
        let _ = self.signals.send(BackendSignal::StateDocChanged {
            room_id: room_id.to_owned(),
            kind,
        });
        Ok(())
    }

    async fn membership_power_level(
        &self,
        _room_id: &str,
        _user_id: &str,
    ) -> Result<(Membership, Option<i64>), EngineError> {
        // Local mode boosts the acting user to full power.
        Ok((Membership::Join, Some(100)))
    }

    async fn purge_room(&self, room_id: &str) -> Result<(), EngineError> {
        let mut state = self.lock();
        let existed = state.rooms.iter().any(|room| room.id == room_id);
        if !existed {
            return Err(EngineError::new(
                EngineErrorCategory::Purge,
                "room_not_found",
                format!("room not found: {room_id}"),
            ));
        }
        state.rooms.retain(|room| room.id != room_id);
        for room in state.rooms.iter_mut() {
            room.child_room_ids.retain(|child| child != room_id);
        }
        state.timelines.remove(room_id);
        state.archives.remove(room_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_backend_round_trips_messages_and_txn_index() {
        let backend = NullBackend::new("@local:engine");
        let event_id = backend
            .send_message("!room-1:local", "tx-1", "hello")
            .await
            .expect("send should work");
        assert!(event_id.starts_with("$local-"));

        let found = backend
            .find_event_by_txn("!room-1:local", "tx-1")
            .await
            .expect("lookup should work");
        assert_eq!(found, Some(event_id));
    }

    #[tokio::test]
    async fn purge_removes_room_and_child_links() {
        let backend = NullBackend::new("@local:engine");
        let space = backend.create_space("Ops").await.expect("space");
        let room = backend
            .create_room(Some(&space), "incident", RoomKind::Text)
            .await
            .expect("room");

        backend.purge_room(&room).await.expect("purge should work");
        let graph = backend.room_graph().await.expect("graph");
        assert!(!graph.rooms.iter().any(|r| r.id == room));
        let container = graph
            .rooms
            .iter()
            .find(|r| r.id == space)
            .expect("container survives");
        assert!(container.child_room_ids.is_empty());

        let err = backend.purge_room(&room).await.expect_err("second purge fails");
        assert_eq!(err.code, "room_not_found");
    }

    #[tokio::test]
    async fn cancel_only_wins_for_marked_sends() {
        let backend = NullBackend::new("@local:engine");
        backend.mark_cancellable("!room-1:local", "tx-1");

        assert!(
            backend
                .cancel_local_send("!room-1:local", "tx-1")
                .await
                .expect("cancel should work")
        );
        // Second attempt has nothing left to cancel.
        assert!(
            !backend
                .cancel_local_send("!room-1:local", "tx-1")
                .await
                .expect("cancel should work")
        );
    }

    #[tokio::test]
    async fn state_doc_put_emits_change_signal() {
        let backend = NullBackend::new("@local:engine");
        let mut signals = backend.subscribe();
        backend
            .state_doc_put(
                "!host:local",
                StateDocKind::Layout,
                serde_json::json!({"version": 1}),
            )
            .await
            .expect("put should work");

        match signals.recv().await.expect("signal receive") {
            BackendSignal::StateDocChanged { room_id, kind } => {
                assert_eq!(room_id, "!host:local");
                assert_eq!(kind, StateDocKind::Layout);
            }
            other => panic!("unexpected signal: {other:?}"),
        }
    }
}
