use engine_core::redaction::{dedupe_intents, prune_intents};
use engine_core::types::{
    PENDING_REDACTION_CAP, PENDING_REDACTION_TTL_MS, PendingRedactionIntent,
};

use crate::sink::{DocumentSink, StoreError};

const REDACTION_QUEUE_KEY: &str = "pending-redactions";

/// Persisted queue of redaction intents awaiting a durable event id.
///
/// Every load and save prunes by TTL (24 h) and cap (200) and deduplicates
/// by `(room_id, txn_id)`.
#[derive(Clone)]
pub struct RedactionQueueStore<S: DocumentSink> {
    sink: S,
}

impl<S: DocumentSink> RedactionQueueStore<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    pub fn load(&self, now_ms: u64) -> Result<Vec<PendingRedactionIntent>, StoreError> {
        let raw = match self.sink.read(REDACTION_QUEUE_KEY) {
            Ok(raw) => raw,
            Err(StoreError::NotFound) => return Ok(Vec::new()),
            Err(err) => return Err(err),
        };
        let intents: Vec<PendingRedactionIntent> =
            serde_json::from_str(&raw).map_err(|err| StoreError::Serialization(err.to_string()))?;
        Ok(self.bound(intents, now_ms))
    }

    pub fn save(
        &self,
        intents: Vec<PendingRedactionIntent>,
        now_ms: u64,
    ) -> Result<Vec<PendingRedactionIntent>, StoreError> {
        let bounded = self.bound(intents, now_ms);
        let encoded = serde_json::to_string(&bounded)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        self.sink.write(REDACTION_QUEUE_KEY, &encoded)?;
        Ok(bounded)
    }

    /// Append one intent (deduplicated) and persist.
    pub fn push(
        &self,
        intent: PendingRedactionIntent,
        now_ms: u64,
    ) -> Result<Vec<PendingRedactionIntent>, StoreError> {
        let mut intents = self.load(now_ms)?;
        intents.push(intent);
        self.save(intents, now_ms)
    }

    /// Remove one intent by key and persist.
    pub fn remove(
        &self,
        room_id: &str,
        txn_id: &str,
        now_ms: u64,
    ) -> Result<Vec<PendingRedactionIntent>, StoreError> {
        let mut intents = self.load(now_ms)?;
        intents.retain(|intent| !(intent.room_id == room_id && intent.txn_id == txn_id));
        self.save(intents, now_ms)
    }

    fn bound(
        &self,
        intents: Vec<PendingRedactionIntent>,
        now_ms: u64,
    ) -> Vec<PendingRedactionIntent> {
        prune_intents(
            dedupe_intents(intents),
            now_ms,
            PENDING_REDACTION_TTL_MS,
            PENDING_REDACTION_CAP,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InMemorySink;

    fn intent(room: &str, txn: &str, queued_at_ms: u64) -> PendingRedactionIntent {
        PendingRedactionIntent {
            room_id: room.to_owned(),
            txn_id: txn.to_owned(),
            source_message_id: format!("~{room}:{txn}"),
            queued_at_ms,
        }
    }

    #[test]
    fn push_deduplicates_by_room_and_txn() {
        let store = RedactionQueueStore::new(InMemorySink::default());
        store.push(intent("room-1", "tx1", 10), 100).expect("push");
        let intents = store.push(intent("room-1", "tx1", 20), 100).expect("push");
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].queued_at_ms, 10);
    }

    #[test]
    fn load_prunes_expired_intents() {
        let store = RedactionQueueStore::new(InMemorySink::default());
        store.push(intent("room-1", "old", 0), 0).expect("push");
        store
            .push(intent("room-1", "new", PENDING_REDACTION_TTL_MS), PENDING_REDACTION_TTL_MS)
            .expect("push");

        let now = PENDING_REDACTION_TTL_MS + 1;
        let intents = store.load(now).expect("load");
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].txn_id, "new");
    }

    #[test]
    fn save_enforces_the_cap() {
        let store = RedactionQueueStore::new(InMemorySink::default());
        let intents: Vec<PendingRedactionIntent> = (0..(PENDING_REDACTION_CAP + 20))
            .map(|index| intent("room-1", &format!("tx-{index}"), index as u64))
            .collect();

        let bounded = store.save(intents, 1_000).expect("save");
        assert_eq!(bounded.len(), PENDING_REDACTION_CAP);
        // Newest entries survive.
        assert_eq!(bounded[0].txn_id, format!("tx-{}", PENDING_REDACTION_CAP + 19));
    }

    #[test]
    fn remove_drops_only_the_matching_intent() {
        let store = RedactionQueueStore::new(InMemorySink::default());
        store.push(intent("room-1", "tx1", 10), 100).expect("push");
        store.push(intent("room-2", "tx1", 20), 100).expect("push");

        let intents = store.remove("room-1", "tx1", 100).expect("remove");
        assert_eq!(intents.len(), 1);
        assert_eq!(intents[0].room_id, "room-2");
    }

    #[test]
    fn corrupt_document_surfaces_serialization_error() {
        let sink = InMemorySink::default();
        sink.write("pending-redactions", "not json").expect("seed");
        let store = RedactionQueueStore::new(sink);
        assert!(matches!(
            store.load(0),
            Err(StoreError::Serialization(_))
        ));
    }
}
