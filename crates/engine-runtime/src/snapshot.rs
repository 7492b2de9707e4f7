use std::collections::{BTreeMap, HashSet};

use engine_core::types::{
    Category, Message, ModerationAuditEvent, PendingRedactionIntent, Room, ScopedOverrides,
    ServerSettings, Space, SpaceLayout,
};

use crate::session::SessionState;

/// Immutable read surface handed to the presentation layer.
///
/// Cloned out of the engine state on demand; consumers never observe
/// in-place mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineSnapshot {
    pub session: SessionState,
    pub spaces: Vec<Space>,
    pub rooms: Vec<Room>,
    pub layouts: BTreeMap<String, SpaceLayout>,
    pub settings: BTreeMap<String, ServerSettings>,
    pub overrides: BTreeMap<String, ScopedOverrides>,
    pub audit: BTreeMap<String, Vec<ModerationAuditEvent>>,
    pub messages: BTreeMap<String, Vec<Message>>,
    pub active_space_id: Option<String>,
    pub active_room_id: Option<String>,
}

impl EngineSnapshot {
    /// Rooms belonging to one space, ordered for presentation.
    pub fn rooms_in_space(&self, space_id: &str) -> Vec<&Room> {
        let mut rooms: Vec<&Room> = self
            .rooms
            .iter()
            .filter(|room| room.space_id == space_id)
            .collect();
        rooms.sort_by_key(|room| room.sort_order);
        rooms
    }

    /// Category list for one space, derived from its layout.
    pub fn categories_in_space(&self, space_id: &str) -> Vec<Category> {
        self.layouts
            .get(space_id)
            .map(|layout| layout.categories.clone())
            .unwrap_or_default()
    }

    /// Messages for one room, in display order.
    pub fn messages_in_room(&self, room_id: &str) -> &[Message] {
        self.messages
            .get(room_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }
}

/// Mutable engine state owned by the session manager.
///
/// All in-flight bookkeeping lives here as instance state so independent
/// sessions never share guards.
#[derive(Debug)]
pub(crate) struct EngineState {
    pub session: SessionState,
    pub spaces: Vec<Space>,
    pub rooms: Vec<Room>,
    pub layouts: BTreeMap<String, SpaceLayout>,
    pub settings: BTreeMap<String, ServerSettings>,
    pub overrides: BTreeMap<String, ScopedOverrides>,
    pub audit: BTreeMap<String, Vec<ModerationAuditEvent>>,
    pub messages: BTreeMap<String, Vec<Message>>,
    /// Resolved state host room per space.
    pub state_hosts: BTreeMap<String, String>,
    pub active_space_id: Option<String>,
    pub active_room_id: Option<String>,
    /// Offline flag: disconnected sends become `Queued` instead of `Sent`.
    pub offline: bool,
    /// Per-room pagination serialization; a second request is dropped.
    pub pagination_loading: HashSet<String>,
    /// Single in-flight administrative purge per room id.
    pub purge_in_flight: HashSet<String>,
    /// Deduplicates concurrent redaction sweeps, keyed `(room_id, txn_id)`.
    pub redaction_in_flight: HashSet<(String, String)>,
    /// Intents awaiting a durable event id; mirrored to persistence.
    pub pending_redactions: Vec<PendingRedactionIntent>,
}

impl EngineState {
    pub fn new() -> Self {
        Self {
            session: SessionState::Disconnected,
            spaces: Vec::new(),
            rooms: Vec::new(),
            layouts: BTreeMap::new(),
            settings: BTreeMap::new(),
            overrides: BTreeMap::new(),
            audit: BTreeMap::new(),
            messages: BTreeMap::new(),
            state_hosts: BTreeMap::new(),
            active_space_id: None,
            active_room_id: None,
            offline: false,
            pagination_loading: HashSet::new(),
            purge_in_flight: HashSet::new(),
            redaction_in_flight: HashSet::new(),
            pending_redactions: Vec::new(),
        }
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            session: self.session.clone(),
            spaces: self.spaces.clone(),
            rooms: self.rooms.clone(),
            layouts: self.layouts.clone(),
            settings: self.settings.clone(),
            overrides: self.overrides.clone(),
            audit: self.audit.clone(),
            messages: self.messages.clone(),
            active_space_id: self.active_space_id.clone(),
            active_room_id: self.active_room_id.clone(),
        }
    }

    pub fn room(&self, room_id: &str) -> Option<&Room> {
        self.rooms.iter().find(|room| room.id == room_id)
    }

    /// Re-derive room projections for one space from its layout.
    pub fn reproject_space(&mut self, space_id: &str) {
        let Some(layout) = self.layouts.get(space_id).cloned() else {
            return;
        };
        let mut owned: Vec<&mut Room> = self
            .rooms
            .iter_mut()
            .filter(|room| room.space_id == space_id)
            .collect();
        // apply_to_rooms works on a slice; project through a scratch buffer.
        let mut scratch: Vec<Room> = owned.iter().map(|room| (**room).clone()).collect();
        engine_core::layout::apply_to_rooms(&layout, &mut scratch);
        for (target, projected) in owned.iter_mut().zip(scratch.into_iter()) {
            **target = projected;
        }
    }
}
