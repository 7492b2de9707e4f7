use std::collections::BTreeMap;

use crate::types::{Message, Reaction};

/// Build the temporary id for an optimistic local echo.
///
/// Format: `~<room_id>:<txn_id>`. The room id may itself contain colons,
/// so parsing splits on the last one; transaction ids never contain `:`.
pub fn local_echo_id(room_id: &str, txn_id: &str) -> String {
    format!("~{room_id}:{txn_id}")
}

/// Whether an id denotes a local echo not yet acknowledged by the backend.
pub fn is_local_echo_id(id: &str) -> bool {
    id.starts_with('~')
}

/// Split a local echo id into `(room_id, txn_id)`.
pub fn parse_local_echo_id(id: &str) -> Option<(&str, &str)> {
    id.strip_prefix('~')?.rsplit_once(':')
}

/// Merge local and remote message sets for one room.
///
/// Map semantics by id (a later write for the same id wins), followed by
/// removal of every id in `remove_ids`, followed by a total order on
/// `(timestamp_ms, id)` so duplicate timestamps stay deterministic.
/// Idempotent: merging the same remote snapshot twice is a no-op.
pub fn merge(existing: &[Message], incoming: &[Message], remove_ids: &[String]) -> Vec<Message> {
    let mut by_id: BTreeMap<&str, &Message> = BTreeMap::new();
    for message in existing.iter().chain(incoming.iter()) {
        by_id.insert(message.id.as_str(), message);
    }
    for id in remove_ids {
        by_id.remove(id.as_str());
    }

    let mut merged: Vec<Message> = by_id.into_values().cloned().collect();
    merged.sort_by(|a, b| {
        a.timestamp_ms
            .cmp(&b.timestamp_ms)
            .then_with(|| a.id.cmp(&b.id))
    });
    merged
}

/// Toggle `user_id`'s reaction with `emoji` on one message.
///
/// Returns `false` when the message is unknown. Empty reaction entries are
/// compacted away.
pub fn toggle_reaction(
    messages: &mut [Message],
    message_id: &str,
    emoji: &str,
    user_id: &str,
) -> bool {
    let Some(message) = messages.iter_mut().find(|m| m.id == message_id) else {
        return false;
    };

    match message.reactions.iter_mut().find(|r| r.emoji == emoji) {
        Some(reaction) => {
            if let Some(index) = reaction.user_ids.iter().position(|u| u == user_id) {
                reaction.user_ids.remove(index);
            } else {
                reaction.user_ids.push(user_id.to_owned());
            }
        }
        None => message.reactions.push(Reaction {
            emoji: emoji.to_owned(),
            user_ids: vec![user_id.to_owned()],
        }),
    }
    message.reactions.retain(|r| !r.user_ids.is_empty());
    true
}

/// Set the pinned flag on one message. Returns `false` when unknown.
pub fn set_pinned(messages: &mut [Message], message_id: &str, pinned: bool) -> bool {
    let Some(message) = messages.iter_mut().find(|m| m.id == message_id) else {
        return false;
    };
    message.pinned = pinned;
    true
}
