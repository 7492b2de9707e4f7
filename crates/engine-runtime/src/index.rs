use std::collections::BTreeMap;
use std::sync::Arc;

use engine_core::error::EngineError;
use engine_core::types::{
    LOCAL_SPACE_ID, ModerationAuditEvent, Room, RoomKind, ScopedOverrides, ServerSettings, Space,
    SpaceLayout,
};
use engine_core::{audit, layout, settings};
use tracing::{debug, warn};

use crate::port::{BackendPort, GraphRoom, RoomGraph, StateDocKind};

/// Display name of the synthetic aggregate space.
const AGGREGATE_SPACE_NAME: &str = "Home";

/// Space/room graph derived from one backend room graph.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpaceIndex {
    pub spaces: Vec<Space>,
    pub rooms: Vec<Room>,
    /// Exactly one state host room per space.
    pub state_hosts: BTreeMap<String, String>,
}

/// Index plus the normalized per-space documents read from each state host.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DiscoveredState {
    pub index: SpaceIndex,
    pub layouts: BTreeMap<String, SpaceLayout>,
    pub settings: BTreeMap<String, ServerSettings>,
    pub overrides: BTreeMap<String, ScopedOverrides>,
    pub audit: BTreeMap<String, Vec<ModerationAuditEvent>>,
}

/// Derive the Space→Room graph from a backend room graph.
///
/// Rooms not claimed by any grouping container land in a single synthetic
/// aggregate space so the engine stays usable against backends with no
/// grouping at all. Tombstoned rooms are dropped entirely: the UI must
/// never show an administratively-deleted room as live.
pub fn build_index(graph: &RoomGraph) -> SpaceIndex {
    let mut spaces: Vec<Space> = Vec::new();
    let mut claimed: BTreeMap<&str, String> = BTreeMap::new();

    for container in graph
        .rooms
        .iter()
        .filter(|room| room.is_space_container && !room.tombstoned)
    {
        spaces.push(Space {
            id: container.id.clone(),
            name: container
                .name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| container.id.clone()),
            icon: None,
        });
        for child in &container.child_room_ids {
            claimed.insert(child.as_str(), container.id.clone());
        }
    }

    let mut rooms: Vec<Room> = Vec::new();
    let mut needs_aggregate = false;
    for graph_room in graph
        .rooms
        .iter()
        .filter(|room| !room.is_space_container && !room.tombstoned)
    {
        let space_id = match claimed.get(graph_room.id.as_str()) {
            Some(space_id) => space_id.clone(),
            None => {
                needs_aggregate = true;
                LOCAL_SPACE_ID.to_owned()
            }
        };
        rooms.push(Room {
            id: graph_room.id.clone(),
            space_id,
            name: graph_room
                .name
                .clone()
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| graph_room.id.clone()),
            kind: resolve_kind(graph_room),
            category_id: String::new(),
            topic: graph_room.topic.clone(),
            unread_count: graph_room.unread_count,
            sort_order: 0,
            is_welcome: graph_room.is_welcome,
        });
    }

    if needs_aggregate || spaces.is_empty() {
        spaces.insert(
            0,
            Space {
                id: LOCAL_SPACE_ID.to_owned(),
                name: AGGREGATE_SPACE_NAME.to_owned(),
                icon: None,
            },
        );
    }

    let mut state_hosts = BTreeMap::new();
    for space in &spaces {
        if let Some(host) = resolve_state_host(space, &rooms) {
            state_hosts.insert(space.id.clone(), host);
        }
    }

    SpaceIndex {
        spaces,
        rooms,
        state_hosts,
    }
}

/// Room→type resolution precedence: direct registry > custom marker > text.
fn resolve_kind(room: &GraphRoom) -> RoomKind {
    if room.is_direct {
        return RoomKind::Direct;
    }
    room.kind_marker.unwrap_or(RoomKind::Text)
}

/// Locate the room whose state storage persists this space's documents.
///
/// The space's own container room when one exists, else a deterministic
/// fallback: first non-direct room, else first room at all.
fn resolve_state_host(space: &Space, rooms: &[Room]) -> Option<String> {
    if space.id != LOCAL_SPACE_ID {
        return Some(space.id.clone());
    }
    let members: Vec<&Room> = rooms
        .iter()
        .filter(|room| room.space_id == space.id)
        .collect();
    members
        .iter()
        .find(|room| room.kind != RoomKind::Direct)
        .or_else(|| members.first())
        .map(|room| room.id.clone())
}

/// Full discovery: build the index, then read and normalize every space
/// document from its state host.
pub async fn discover(backend: &Arc<dyn BackendPort>) -> Result<DiscoveredState, EngineError> {
    let graph = backend.room_graph().await?;
    let mut index = build_index(&graph);
    debug!(
        space_count = index.spaces.len(),
        room_count = index.rooms.len(),
        "built space index"
    );

    let mut discovered = DiscoveredState::default();
    let space_ids: Vec<String> = index.spaces.iter().map(|space| space.id.clone()).collect();

    for space_id in &space_ids {
        let Some(host) = index.state_hosts.get(space_id).cloned() else {
            // A space with no rooms at all still gets defaults.
            discovered
                .layouts
                .insert(space_id.clone(), layout::hydrate(None, &[]));
            discovered
                .settings
                .insert(space_id.clone(), settings::normalize(None));
            discovered
                .overrides
                .insert(space_id.clone(), ScopedOverrides::default());
            discovered.audit.insert(space_id.clone(), Vec::new());
            continue;
        };

        let raw_layout = read_doc(backend, &host, StateDocKind::Layout).await;
        let prior_layout = raw_layout
            .as_ref()
            .and_then(|raw| serde_json::from_value::<SpaceLayout>(raw.clone()).ok());

        let space_rooms: Vec<Room> = index
            .rooms
            .iter()
            .filter(|room| room.space_id == *space_id)
            .cloned()
            .collect();
        discovered.layouts.insert(
            space_id.clone(),
            layout::hydrate(prior_layout.as_ref(), &space_rooms),
        );

        let raw_settings = read_doc(backend, &host, StateDocKind::Settings).await;
        discovered
            .settings
            .insert(space_id.clone(), settings::normalize(raw_settings.as_ref()));

        let raw_overrides = read_doc(backend, &host, StateDocKind::Overrides).await;
        discovered.overrides.insert(
            space_id.clone(),
            settings::normalize_overrides(raw_overrides.as_ref()),
        );

        let raw_audit = read_doc(backend, &host, StateDocKind::Audit).await;
        discovered
            .audit
            .insert(space_id.clone(), audit::normalize_audit(raw_audit.as_ref()));

        let name_override = read_doc(backend, &host, StateDocKind::NameOverride)
            .await
            .as_ref()
            .and_then(|raw| raw.get("name"))
            .and_then(|name| name.as_str())
            .filter(|name| !name.trim().is_empty())
            .map(ToOwned::to_owned);
        if let Some(name) = name_override {
            if let Some(space) = index.spaces.iter_mut().find(|s| s.id == *space_id) {
                space.name = name;
            }
        }
    }

    for space_id in &space_ids {
        let Some(layout) = discovered.layouts.get(space_id) else {
            continue;
        };
        let mut scratch: Vec<Room> = index
            .rooms
            .iter()
            .filter(|room| room.space_id == *space_id)
            .cloned()
            .collect();
        layout::apply_to_rooms(layout, &mut scratch);
        for projected in scratch {
            if let Some(target) = index.rooms.iter_mut().find(|room| room.id == projected.id) {
                *target = projected;
            }
        }
    }

    discovered.index = index;
    Ok(discovered)
}

async fn read_doc(
    backend: &Arc<dyn BackendPort>,
    host: &str,
    kind: StateDocKind,
) -> Option<serde_json::Value> {
    match backend.state_doc_get(host, kind).await {
        Ok(doc) => doc,
        Err(err) => {
            warn!(
                host = %host,
                doc = kind.event_type(),
                error = %err,
                "state document read failed; using defaults"
            );
            None
        }
    }
}
