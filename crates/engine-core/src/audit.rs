use serde_json::Value;

use crate::types::{AUDIT_LOG_CAP, ModerationAuditEvent};

/// Append one entry to the audit log, newest-first, bounded by the cap.
pub fn record_audit(
    log: &[ModerationAuditEvent],
    event: ModerationAuditEvent,
) -> Vec<ModerationAuditEvent> {
    let mut out = Vec::with_capacity((log.len() + 1).min(AUDIT_LOG_CAP));
    out.push(event);
    out.extend(log.iter().take(AUDIT_LOG_CAP - 1).cloned());
    out
}

/// Defensive read of a remotely-stored audit document.
///
/// Malformed entries are dropped; the result is newest-first and capped.
pub fn normalize_audit(raw: Option<&Value>) -> Vec<ModerationAuditEvent> {
    let Some(entries) = raw
        .and_then(Value::as_object)
        .and_then(|o| o.get("entries"))
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut out: Vec<ModerationAuditEvent> = entries
        .iter()
        .filter_map(|entry| serde_json::from_value(entry.clone()).ok())
        .collect();
    out.sort_by(|a: &ModerationAuditEvent, b: &ModerationAuditEvent| {
        b.timestamp_ms.cmp(&a.timestamp_ms)
    });
    out.truncate(AUDIT_LOG_CAP);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::AuditAction;
    use serde_json::json;

    fn event(id: &str, timestamp_ms: u64) -> ModerationAuditEvent {
        ModerationAuditEvent {
            id: id.to_owned(),
            action: AuditAction::MessageRedacted,
            actor_id: "@mod:example.org".to_owned(),
            target: "$msg".to_owned(),
            timestamp_ms,
            source_event_id: None,
        }
    }

    #[test]
    fn record_prepends_newest_first_and_caps() {
        let mut log = Vec::new();
        for index in 0..(AUDIT_LOG_CAP + 10) {
            log = record_audit(&log, event(&format!("audit-{index}"), index as u64));
        }
        assert_eq!(log.len(), AUDIT_LOG_CAP);
        assert_eq!(log[0].id, format!("audit-{}", AUDIT_LOG_CAP + 9));
    }

    #[test]
    fn normalize_drops_malformed_entries() {
        let raw = json!({
            "entries": [
                {
                    "id": "audit-1",
                    "action": "message_redacted",
                    "actor_id": "@mod:example.org",
                    "target": "$msg",
                    "timestamp_ms": 50,
                },
                { "id": "broken" },
                "garbage",
            ]
        });
        let log = normalize_audit(Some(&raw));
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].id, "audit-1");
    }

    #[test]
    fn normalize_orders_newest_first() {
        let raw = json!({
            "entries": [
                { "id": "a", "action": "room_purged", "actor_id": "@m:x", "target": "r", "timestamp_ms": 10 },
                { "id": "b", "action": "room_purged", "actor_id": "@m:x", "target": "r", "timestamp_ms": 30 },
            ]
        });
        let log = normalize_audit(Some(&raw));
        assert_eq!(log[0].id, "b");
    }

    #[test]
    fn normalize_tolerates_arbitrary_shapes() {
        for raw in [json!(null), json!([]), json!("x"), json!({"entries": 5})] {
            assert!(normalize_audit(Some(&raw)).is_empty());
        }
    }
}
