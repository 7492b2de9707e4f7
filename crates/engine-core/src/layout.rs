use std::collections::BTreeMap;

use thiserror::Error;

use crate::types::{
    Category, DEFAULT_CATEGORY_ID, DEFAULT_CATEGORY_NAME, Room, RoomPlacement, SpaceLayout,
};

const CATEGORY_ID_MAX_LEN: usize = 48;

/// Errors produced by layout transformations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LayoutError {
    /// The default category cannot be deleted or moved out of position 0.
    #[error("the default category cannot be {0}")]
    DefaultCategoryProtected(&'static str),
    /// A transformation referenced a category that is not in the layout.
    #[error("category '{0}' does not exist")]
    CategoryNotFound(String),
    /// Category creation collided with an existing id.
    #[error("category '{0}' already exists")]
    CategoryExists(String),
    /// A room transformation referenced a room without a placement.
    #[error("room '{0}' has no placement in this layout")]
    RoomNotPlaced(String),
    /// The requested transformation would not change the layout.
    #[error("requested move is a no-op")]
    NoOp,
}

/// Derive a category id from its display name.
///
/// Lowercased, non-alphanumerics collapsed to single dashes, bounded length.
pub fn category_id_from_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len().min(CATEGORY_ID_MAX_LEN));
    let mut last_was_sep = false;
    for ch in name.chars() {
        let next = if ch.is_ascii_alphanumeric() {
            ch.to_ascii_lowercase()
        } else {
            '-'
        };

        if next == '-' {
            if last_was_sep {
                continue;
            }
            last_was_sep = true;
        } else {
            last_was_sep = false;
        }

        out.push(next);
        if out.len() >= CATEGORY_ID_MAX_LEN {
            break;
        }
    }

    let trimmed = out.trim_matches('-');
    if trimmed.is_empty() {
        "category".to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Rebuild a valid layout from a possibly-missing or malformed prior one.
///
/// Guarantees: the default category exists at position 0; every placeable
/// room has exactly one placement pointing at an existing category (orphaned
/// placements fall back to the default category); per-category orders are a
/// dense `0..n` sequence preserving prior relative order, ties broken by
/// case-insensitive room name. Direct rooms never receive a placement.
pub fn hydrate(prior: Option<&SpaceLayout>, rooms: &[Room]) -> SpaceLayout {
    let mut categories: Vec<Category> = Vec::new();
    if let Some(prior) = prior {
        for category in &prior.categories {
            if category.id == DEFAULT_CATEGORY_ID
                || categories.iter().any(|c| c.id == category.id)
                || category.id.is_empty()
            {
                continue;
            }
            categories.push(category.clone());
        }
        categories.sort_by_key(|c| c.order);
    }
    let default_name = prior
        .and_then(|p| p.categories.iter().find(|c| c.id == DEFAULT_CATEGORY_ID))
        .map(|c| c.name.clone())
        .unwrap_or_else(|| DEFAULT_CATEGORY_NAME.to_owned());
    categories.insert(
        0,
        Category {
            id: DEFAULT_CATEGORY_ID.to_owned(),
            name: default_name,
            order: 0,
        },
    );
    for (index, category) in categories.iter_mut().enumerate() {
        category.order = index as u32;
    }

    let name_of: BTreeMap<&str, &str> = rooms
        .iter()
        .map(|room| (room.id.as_str(), room.name.as_str()))
        .collect();

    let mut placements: BTreeMap<String, RoomPlacement> = BTreeMap::new();
    for room in rooms.iter().filter(|room| room.kind.placeable()) {
        let prior_placement = prior.and_then(|p| p.rooms.get(&room.id));
        let placement = match prior_placement {
            Some(placement) if categories.iter().any(|c| c.id == placement.category_id) => {
                placement.clone()
            }
            // Previously-recorded category no longer exists, or the room is
            // new to the layout: append to the default category.
            _ => RoomPlacement {
                category_id: DEFAULT_CATEGORY_ID.to_owned(),
                order: u32::MAX,
            },
        };
        placements.insert(room.id.clone(), placement);
    }

    let mut layout = SpaceLayout {
        version: prior.map(|p| p.version).unwrap_or(0),
        categories,
        rooms: placements,
    };
    densify(&mut layout, |room_id| {
        name_of.get(room_id).copied().unwrap_or("")
    });
    layout
}

/// Create a category named `name`; its id is derived from the name.
pub fn create_category(layout: &SpaceLayout, name: &str) -> Result<SpaceLayout, LayoutError> {
    let id = category_id_from_name(name);
    if layout.categories.iter().any(|c| c.id == id) {
        return Err(LayoutError::CategoryExists(id));
    }

    let mut next = layout.clone();
    next.categories.push(Category {
        id,
        name: name.trim().to_owned(),
        order: next.categories.len() as u32,
    });
    Ok(bumped(next))
}

/// Rename an existing category. The id is stable across renames.
pub fn rename_category(
    layout: &SpaceLayout,
    category_id: &str,
    new_name: &str,
) -> Result<SpaceLayout, LayoutError> {
    let mut next = layout.clone();
    let category = next
        .categories
        .iter_mut()
        .find(|c| c.id == category_id)
        .ok_or_else(|| LayoutError::CategoryNotFound(category_id.to_owned()))?;
    let trimmed = new_name.trim();
    if category.name == trimmed {
        return Err(LayoutError::NoOp);
    }
    category.name = trimmed.to_owned();
    Ok(bumped(next))
}

/// Delete a non-default category.
///
/// Its rooms are reassigned into the default category, appended after the
/// default category's existing rooms with their relative order preserved.
pub fn delete_category(layout: &SpaceLayout, category_id: &str) -> Result<SpaceLayout, LayoutError> {
    if category_id == DEFAULT_CATEGORY_ID {
        return Err(LayoutError::DefaultCategoryProtected("deleted"));
    }
    if !layout.categories.iter().any(|c| c.id == category_id) {
        return Err(LayoutError::CategoryNotFound(category_id.to_owned()));
    }

    let mut next = layout.clone();
    next.categories.retain(|c| c.id != category_id);

    let default_tail = next
        .rooms
        .values()
        .filter(|p| p.category_id == DEFAULT_CATEGORY_ID)
        .map(|p| p.order + 1)
        .max()
        .unwrap_or(0);
    for placement in next.rooms.values_mut() {
        if placement.category_id == category_id {
            placement.category_id = DEFAULT_CATEGORY_ID.to_owned();
            // Shift after the existing default rooms; relative order survives
            // because the original per-category sequence was dense.
            placement.order += default_tail;
        }
    }

    renumber(&mut next);
    Ok(bumped(next))
}

/// Move a non-default category to `new_index` in the category list.
///
/// Index 0 is reserved for the default category.
pub fn move_category(
    layout: &SpaceLayout,
    category_id: &str,
    new_index: usize,
) -> Result<SpaceLayout, LayoutError> {
    if category_id == DEFAULT_CATEGORY_ID {
        return Err(LayoutError::DefaultCategoryProtected("moved"));
    }
    if new_index == 0 {
        return Err(LayoutError::DefaultCategoryProtected("displaced"));
    }

    let mut next = layout.clone();
    let current = next
        .categories
        .iter()
        .position(|c| c.id == category_id)
        .ok_or_else(|| LayoutError::CategoryNotFound(category_id.to_owned()))?;
    let target = new_index.min(next.categories.len() - 1);
    if target == current {
        return Err(LayoutError::NoOp);
    }

    let category = next.categories.remove(current);
    next.categories.insert(target, category);
    renumber(&mut next);
    Ok(bumped(next))
}

/// Move a room into `category_id`, at `position` or appended at the end.
pub fn move_room_to_category(
    layout: &SpaceLayout,
    room_id: &str,
    category_id: &str,
    position: Option<usize>,
) -> Result<SpaceLayout, LayoutError> {
    if !layout.categories.iter().any(|c| c.id == category_id) {
        return Err(LayoutError::CategoryNotFound(category_id.to_owned()));
    }
    let placement = layout
        .rooms
        .get(room_id)
        .ok_or_else(|| LayoutError::RoomNotPlaced(room_id.to_owned()))?;
    if placement.category_id == category_id && position.is_none() {
        return Err(LayoutError::NoOp);
    }

    let mut next = layout.clone();
    let mut ordered = rooms_in_category(&next, category_id);
    ordered.retain(|id| id != room_id);
    let insert_at = position.unwrap_or(ordered.len()).min(ordered.len());
    ordered.insert(insert_at, room_id.to_owned());

    if let Some(placement) = next.rooms.get_mut(room_id) {
        placement.category_id = category_id.to_owned();
    }
    for (index, id) in ordered.iter().enumerate() {
        if let Some(placement) = next.rooms.get_mut(id) {
            placement.order = index as u32;
        }
    }

    renumber(&mut next);
    Ok(bumped(next))
}

/// Reorder a room within its current category.
pub fn reorder_room(
    layout: &SpaceLayout,
    room_id: &str,
    new_index: usize,
) -> Result<SpaceLayout, LayoutError> {
    let placement = layout
        .rooms
        .get(room_id)
        .ok_or_else(|| LayoutError::RoomNotPlaced(room_id.to_owned()))?;
    let category_id = placement.category_id.clone();

    let mut ordered = rooms_in_category(layout, &category_id);
    let current = ordered
        .iter()
        .position(|id| id == room_id)
        .ok_or_else(|| LayoutError::RoomNotPlaced(room_id.to_owned()))?;
    let target = new_index.min(ordered.len() - 1);
    if target == current {
        return Err(LayoutError::NoOp);
    }

    let id = ordered.remove(current);
    ordered.insert(target, id);

    let mut next = layout.clone();
    for (index, id) in ordered.iter().enumerate() {
        if let Some(placement) = next.rooms.get_mut(id) {
            placement.order = index as u32;
        }
    }
    Ok(bumped(next))
}

/// Rewrite room projections (`category_id`, `sort_order`) from the layout.
///
/// Direct rooms carry an empty category id and sort after every placed room,
/// ordered by case-insensitive name.
pub fn apply_to_rooms(layout: &SpaceLayout, rooms: &mut [Room]) {
    let category_rank: BTreeMap<&str, u32> = layout
        .categories
        .iter()
        .map(|c| (c.id.as_str(), c.order))
        .collect();

    let mut max_placed: u32 = 0;
    for room in rooms.iter_mut() {
        if let Some(placement) = layout.rooms.get(&room.id) {
            let rank = category_rank
                .get(placement.category_id.as_str())
                .copied()
                .unwrap_or(0);
            room.category_id = placement.category_id.clone();
            room.sort_order = rank * 1_000 + placement.order;
            max_placed = max_placed.max(room.sort_order);
        }
    }

    let mut direct: Vec<usize> = rooms
        .iter()
        .enumerate()
        .filter(|(_, room)| !room.kind.placeable())
        .map(|(index, _)| index)
        .collect();
    direct.sort_by(|a, b| {
        let left = rooms[*a].name.to_lowercase();
        let right = rooms[*b].name.to_lowercase();
        left.cmp(&right).then_with(|| rooms[*a].id.cmp(&rooms[*b].id))
    });
    for (offset, index) in direct.into_iter().enumerate() {
        rooms[index].category_id = String::new();
        rooms[index].sort_order = max_placed + 1 + offset as u32;
    }
}

/// Room ids in one category, ordered by their placement order.
pub fn rooms_in_category(layout: &SpaceLayout, category_id: &str) -> Vec<String> {
    let mut entries: Vec<(&String, &RoomPlacement)> = layout
        .rooms
        .iter()
        .filter(|(_, p)| p.category_id == category_id)
        .collect();
    entries.sort_by(|a, b| a.1.order.cmp(&b.1.order).then_with(|| a.0.cmp(b.0)));
    entries.into_iter().map(|(id, _)| id.clone()).collect()
}

fn bumped(mut layout: SpaceLayout) -> SpaceLayout {
    layout.version += 1;
    layout
}

fn renumber(layout: &mut SpaceLayout) {
    for (index, category) in layout.categories.iter_mut().enumerate() {
        category.order = index as u32;
    }
    densify(layout, |_| "");
}

fn densify<'a, F>(layout: &mut SpaceLayout, name_of: F)
where
    F: Fn(&str) -> &'a str,
{
    let category_ids: Vec<String> = layout.categories.iter().map(|c| c.id.clone()).collect();
    for category_id in category_ids {
        let mut entries: Vec<(String, u32)> = layout
            .rooms
            .iter()
            .filter(|(_, p)| p.category_id == category_id)
            .map(|(id, p)| (id.clone(), p.order))
            .collect();
        entries.sort_by(|a, b| {
            a.1.cmp(&b.1)
                .then_with(|| {
                    name_of(&a.0)
                        .to_lowercase()
                        .cmp(&name_of(&b.0).to_lowercase())
                })
                .then_with(|| a.0.cmp(&b.0))
        });
        for (index, (room_id, _)) in entries.into_iter().enumerate() {
            if let Some(placement) = layout.rooms.get_mut(&room_id) {
                placement.order = index as u32;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::RoomKind;

    fn room(id: &str, name: &str, kind: RoomKind) -> Room {
        Room {
            id: id.to_owned(),
            space_id: "space-1".to_owned(),
            name: name.to_owned(),
            kind,
            category_id: String::new(),
            topic: None,
            unread_count: 0,
            sort_order: 0,
            is_welcome: false,
        }
    }

    fn placement(category: &str, order: u32) -> RoomPlacement {
        RoomPlacement {
            category_id: category.to_owned(),
            order,
        }
    }

    #[test]
    fn hydrate_from_nothing_places_every_room_in_default_category() {
        let rooms = vec![
            room("room-b", "beta", RoomKind::Text),
            room("room-a", "alpha", RoomKind::Text),
        ];
        let layout = hydrate(None, &rooms);

        assert_eq!(layout.categories[0].id, DEFAULT_CATEGORY_ID);
        assert_eq!(layout.categories[0].order, 0);
        assert_eq!(layout.rooms.len(), 2);
        // Ties (both appended) break by case-insensitive name.
        assert_eq!(layout.rooms["room-a"].order, 0);
        assert_eq!(layout.rooms["room-b"].order, 1);
    }

    #[test]
    fn hydrate_excludes_direct_rooms() {
        let rooms = vec![
            room("room-1", "general", RoomKind::Text),
            room("dm-1", "alice", RoomKind::Direct),
        ];
        let layout = hydrate(None, &rooms);
        assert!(layout.rooms.contains_key("room-1"));
        assert!(!layout.rooms.contains_key("dm-1"));
    }

    #[test]
    fn hydrate_falls_back_to_default_for_orphaned_placements() {
        let mut prior = SpaceLayout::default();
        prior
            .rooms
            .insert("room-1".to_owned(), placement("vanished", 3));
        let rooms = vec![room("room-1", "general", RoomKind::Text)];

        let layout = hydrate(Some(&prior), &rooms);
        assert_eq!(layout.rooms["room-1"].category_id, DEFAULT_CATEGORY_ID);
        assert_eq!(layout.rooms["room-1"].order, 0);
    }

    #[test]
    fn hydrate_densifies_gapped_orders_preserving_relative_order() {
        let mut prior = SpaceLayout::default();
        prior.categories.push(Category {
            id: DEFAULT_CATEGORY_ID.to_owned(),
            name: "General".to_owned(),
            order: 0,
        });
        prior
            .rooms
            .insert("room-a".to_owned(), placement(DEFAULT_CATEGORY_ID, 7));
        prior
            .rooms
            .insert("room-b".to_owned(), placement(DEFAULT_CATEGORY_ID, 2));
        let rooms = vec![
            room("room-a", "alpha", RoomKind::Text),
            room("room-b", "beta", RoomKind::Text),
        ];

        let layout = hydrate(Some(&prior), &rooms);
        assert_eq!(layout.rooms["room-b"].order, 0);
        assert_eq!(layout.rooms["room-a"].order, 1);
    }

    #[test]
    fn hydrate_drops_placements_for_departed_rooms() {
        let mut prior = SpaceLayout::default();
        prior
            .rooms
            .insert("gone".to_owned(), placement(DEFAULT_CATEGORY_ID, 0));
        let layout = hydrate(Some(&prior), &[]);
        assert!(layout.rooms.is_empty());
    }

    #[test]
    fn create_category_derives_slug_id() {
        let layout = hydrate(None, &[]);
        let next = create_category(&layout, "Ops").expect("create should work");
        assert!(next.categories.iter().any(|c| c.id == "ops"));
        assert_eq!(category_id_from_name("Voice  & Video"), "voice-video");
    }

    #[test]
    fn create_category_rejects_duplicate_id() {
        let layout = hydrate(None, &[]);
        let next = create_category(&layout, "Ops").expect("create should work");
        let err = create_category(&next, "ops").expect_err("duplicate must fail");
        assert_eq!(err, LayoutError::CategoryExists("ops".to_owned()));
    }

    #[test]
    fn move_room_into_new_category_re_densifies_origin() {
        let rooms = vec![
            room("room-x", "x-room", RoomKind::Text),
            room("room-y", "y-room", RoomKind::Text),
        ];
        let layout = hydrate(None, &rooms);
        let layout = create_category(&layout, "Ops").expect("create should work");

        let layout =
            move_room_to_category(&layout, "room-x", "ops", None).expect("move should work");
        assert_eq!(layout.rooms["room-x"].category_id, "ops");
        assert_eq!(layout.rooms["room-x"].order, 0);
        // Origin category is re-densified.
        assert_eq!(layout.rooms["room-y"].order, 0);
    }

    #[test]
    fn move_room_to_same_category_without_position_is_a_no_op() {
        let rooms = vec![room("room-x", "x-room", RoomKind::Text)];
        let layout = hydrate(None, &rooms);
        let err = move_room_to_category(&layout, "room-x", DEFAULT_CATEGORY_ID, None)
            .expect_err("no-op move must be rejected");
        assert_eq!(err, LayoutError::NoOp);
    }

    #[test]
    fn delete_category_appends_rooms_after_existing_default_rooms() {
        let rooms = vec![
            room("room-a", "a", RoomKind::Text),
            room("room-b", "b", RoomKind::Text),
            room("room-c", "c", RoomKind::Text),
        ];
        let layout = hydrate(None, &rooms);
        let layout = create_category(&layout, "Ops").expect("create should work");
        let layout =
            move_room_to_category(&layout, "room-a", "ops", None).expect("move a should work");
        let layout =
            move_room_to_category(&layout, "room-b", "ops", None).expect("move b should work");

        let layout = delete_category(&layout, "ops").expect("delete should work");
        assert!(!layout.categories.iter().any(|c| c.id == "ops"));
        let ordered = rooms_in_category(&layout, DEFAULT_CATEGORY_ID);
        assert_eq!(ordered, vec!["room-c", "room-a", "room-b"]);
    }

    #[test]
    fn default_category_cannot_be_deleted_or_moved() {
        let layout = hydrate(None, &[]);
        assert_eq!(
            delete_category(&layout, DEFAULT_CATEGORY_ID),
            Err(LayoutError::DefaultCategoryProtected("deleted"))
        );
        assert_eq!(
            move_category(&layout, DEFAULT_CATEGORY_ID, 2),
            Err(LayoutError::DefaultCategoryProtected("moved"))
        );

        let layout = create_category(&layout, "Ops").expect("create should work");
        assert_eq!(
            move_category(&layout, "ops", 0),
            Err(LayoutError::DefaultCategoryProtected("displaced"))
        );
    }

    #[test]
    fn move_category_reorders_non_default_categories() {
        let layout = hydrate(None, &[]);
        let layout = create_category(&layout, "Ops").expect("create ops");
        let layout = create_category(&layout, "Voice").expect("create voice");

        let layout = move_category(&layout, "voice", 1).expect("move should work");
        let ids: Vec<&str> = layout.categories.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec![DEFAULT_CATEGORY_ID, "voice", "ops"]);
        assert_eq!(layout.categories[1].order, 1);
    }

    #[test]
    fn reorder_room_moves_within_category() {
        let rooms = vec![
            room("room-a", "a", RoomKind::Text),
            room("room-b", "b", RoomKind::Text),
            room("room-c", "c", RoomKind::Text),
        ];
        let layout = hydrate(None, &rooms);
        let layout = reorder_room(&layout, "room-c", 0).expect("reorder should work");
        assert_eq!(
            rooms_in_category(&layout, DEFAULT_CATEGORY_ID),
            vec!["room-c", "room-a", "room-b"]
        );

        let err = reorder_room(&layout, "room-c", 0).expect_err("no-op must fail");
        assert_eq!(err, LayoutError::NoOp);
    }

    #[test]
    fn apply_to_rooms_sorts_direct_rooms_after_placed_rooms() {
        let mut rooms = vec![
            room("room-1", "general", RoomKind::Text),
            room("dm-zoe", "zoe", RoomKind::Direct),
            room("dm-abe", "abe", RoomKind::Direct),
        ];
        let layout = hydrate(None, &rooms);
        apply_to_rooms(&layout, &mut rooms);

        assert_eq!(rooms[0].category_id, DEFAULT_CATEGORY_ID);
        assert!(rooms[1].sort_order > rooms[0].sort_order);
        assert!(rooms[2].sort_order > rooms[0].sort_order);
        // Direct rooms order by name.
        assert!(rooms[2].sort_order < rooms[1].sort_order);
        assert_eq!(rooms[1].category_id, "");
    }

    #[test]
    fn every_mutation_bumps_the_layout_version() {
        let layout = hydrate(None, &[room("room-a", "a", RoomKind::Text)]);
        let v0 = layout.version;
        let layout = create_category(&layout, "Ops").expect("create");
        assert_eq!(layout.version, v0 + 1);
        let layout = move_room_to_category(&layout, "room-a", "ops", None).expect("move");
        assert_eq!(layout.version, v0 + 2);
    }
}
