use serde_json::Value;
use uuid::Uuid;

use crate::types::{
    InvitePolicy, InviteScope, ModerationPolicy, OverrideMap, OverrideRule, PermissionAction,
    RoleDefinition, RoleSettings, ScopedOverrides, ServerSettings,
};

pub const POWER_LEVEL_MAX: u8 = 100;
pub const DEFAULT_ADMIN_LEVEL: u8 = 100;
pub const DEFAULT_MODERATOR_LEVEL: u8 = 50;
pub const DEFAULT_MEMBER_LEVEL: u8 = 0;
pub const INVITE_EXPIRY_HOURS_MIN: u32 = 1;
pub const INVITE_EXPIRY_HOURS_MAX: u32 = 168;
pub const DEFAULT_INVITE_EXPIRY_HOURS: u32 = 24;
pub const AUDIT_RETENTION_DAYS_MIN: u32 = 7;
pub const AUDIT_RETENTION_DAYS_MAX: u32 = 365;
pub const DEFAULT_AUDIT_RETENTION_DAYS: u32 = 90;
pub const DEFAULT_ROLE_COLOR: &str = "#99aab5";

/// Produce a complete, clamped settings structure from untrusted input.
///
/// Total over any JSON shape including `null`, arrays and strings: every
/// invalid or missing field is replaced by a bounded default. The document
/// is technically writable by any sufficiently-privileged remote party, so
/// nothing read here is trusted.
pub fn normalize(raw: Option<&Value>) -> ServerSettings {
    let object = raw.and_then(Value::as_object);

    let roles_raw = object.and_then(|o| o.get("roles")).and_then(Value::as_object);
    let roles = RoleSettings {
        admin_level: level_field(roles_raw, "admin_level", "adminLevel", DEFAULT_ADMIN_LEVEL),
        moderator_level: level_field(
            roles_raw,
            "moderator_level",
            "moderatorLevel",
            DEFAULT_MODERATOR_LEVEL,
        ),
        default_level: level_field(
            roles_raw,
            "default_level",
            "defaultLevel",
            DEFAULT_MEMBER_LEVEL,
        ),
        custom: normalize_roles(roles_raw.and_then(|o| o.get("custom").or_else(|| o.get("roles")))),
    };

    let invite_raw = object
        .and_then(|o| o.get("invite_policy").or_else(|| o.get("invitePolicy")))
        .and_then(Value::as_object);
    let invite_policy = InvitePolicy {
        who_can_invite: invite_raw
            .and_then(|o| o.get("who_can_invite").or_else(|| o.get("whoCanInvite")))
            .and_then(|v| serde_json::from_value::<InviteScope>(v.clone()).ok())
            .unwrap_or(InviteScope::Moderators),
        expiry_hours: bounded_u32(
            invite_raw.and_then(|o| o.get("expiry_hours").or_else(|| o.get("expiryHours"))),
            INVITE_EXPIRY_HOURS_MIN,
            INVITE_EXPIRY_HOURS_MAX,
            DEFAULT_INVITE_EXPIRY_HOURS,
        ),
    };

    let moderation_raw = object
        .and_then(|o| o.get("moderation"))
        .and_then(Value::as_object);
    let moderation = ModerationPolicy {
        audit_retention_days: bounded_u32(
            moderation_raw.and_then(|o| {
                o.get("audit_retention_days")
                    .or_else(|| o.get("auditRetentionDays"))
            }),
            AUDIT_RETENTION_DAYS_MIN,
            AUDIT_RETENTION_DAYS_MAX,
            DEFAULT_AUDIT_RETENTION_DAYS,
        ),
        notify_on_action: moderation_raw
            .and_then(|o| o.get("notify_on_action").or_else(|| o.get("notifyOnAction")))
            .and_then(Value::as_bool)
            .unwrap_or(true),
    };

    ServerSettings {
        version: object
            .and_then(|o| o.get("version"))
            .and_then(Value::as_u64)
            .map(|v| v.min(u32::MAX as u64) as u32)
            .unwrap_or(1),
        overview: object
            .and_then(|o| o.get("overview"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_owned(),
        roles,
        invite_policy,
        moderation,
    }
}

/// Normalize a per-scope override document.
///
/// Only explicit `allow`/`deny` rules survive; `inherit`, unknown actions
/// and empty scopes are dropped so the persisted document stays minimal.
pub fn normalize_overrides(raw: Option<&Value>) -> ScopedOverrides {
    let object = raw.and_then(Value::as_object);
    let mut out = ScopedOverrides::default();

    for (field, target) in [("categories", &mut out.categories), ("rooms", &mut out.rooms)] {
        let Some(scopes) = object.and_then(|o| o.get(field)).and_then(Value::as_object) else {
            continue;
        };
        for (scope_id, rules) in scopes {
            let map = normalize_override_map(rules);
            if !map.is_empty() {
                target.insert(scope_id.clone(), map);
            }
        }
    }

    out
}

fn normalize_override_map(raw: &Value) -> OverrideMap {
    let mut map = OverrideMap::new();
    let Some(rules) = raw.as_object() else {
        return map;
    };
    for (action_raw, rule_raw) in rules {
        let Ok(action) =
            serde_json::from_value::<PermissionAction>(Value::String(action_raw.clone()))
        else {
            continue;
        };
        let Some(rule) = rule_raw
            .as_str()
            .and_then(|s| serde_json::from_value::<OverrideRule>(Value::String(s.to_owned())).ok())
        else {
            continue;
        };
        map.insert(action, rule);
    }
    map
}

fn normalize_roles(raw: Option<&Value>) -> Vec<RoleDefinition> {
    let Some(entries) = raw.and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut out: Vec<RoleDefinition> = Vec::with_capacity(entries.len());
    for entry in entries {
        let object = entry.as_object();
        let id = object
            .and_then(|o| o.get("id"))
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("role-{}", Uuid::new_v4()));
        if out.iter().any(|role| role.id == id) {
            continue;
        }

        out.push(RoleDefinition {
            id,
            name: object
                .and_then(|o| o.get("name"))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .unwrap_or("Role")
                .to_owned(),
            color: object
                .and_then(|o| o.get("color"))
                .and_then(Value::as_str)
                .filter(|s| s.starts_with('#'))
                .unwrap_or(DEFAULT_ROLE_COLOR)
                .to_owned(),
            power_level: clamp_level(
                object.and_then(|o| o.get("power_level").or_else(|| o.get("powerLevel"))),
                DEFAULT_MEMBER_LEVEL,
            ),
            grants: object
                .and_then(|o| o.get("grants"))
                .and_then(Value::as_array)
                .map(|grants| {
                    grants
                        .iter()
                        .filter_map(|g| serde_json::from_value::<PermissionAction>(g.clone()).ok())
                        .collect()
                })
                .unwrap_or_default(),
        });
    }
    out
}

fn level_field(
    object: Option<&serde_json::Map<String, Value>>,
    key: &str,
    alt_key: &str,
    default: u8,
) -> u8 {
    clamp_level(
        object.and_then(|o| o.get(key).or_else(|| o.get(alt_key))),
        default,
    )
}

fn clamp_level(raw: Option<&Value>, default: u8) -> u8 {
    let Some(value) = raw else {
        return default;
    };
    match value.as_i64() {
        Some(level) => level.clamp(0, POWER_LEVEL_MAX as i64) as u8,
        None => default,
    }
}

fn bounded_u32(raw: Option<&Value>, min: u32, max: u32, default: u32) -> u32 {
    let Some(value) = raw.and_then(Value::as_i64) else {
        return default;
    };
    value.clamp(min as i64, max as i64) as u32
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn returns_defaults_for_null_arrays_and_strings() {
        for raw in [None, Some(json!(null)), Some(json!([1, 2])), Some(json!("x"))] {
            let settings = normalize(raw.as_ref());
            assert_eq!(settings.roles.admin_level, DEFAULT_ADMIN_LEVEL);
            assert_eq!(settings.roles.moderator_level, DEFAULT_MODERATOR_LEVEL);
            assert_eq!(settings.invite_policy.expiry_hours, DEFAULT_INVITE_EXPIRY_HOURS);
            assert_eq!(
                settings.moderation.audit_retention_days,
                DEFAULT_AUDIT_RETENTION_DAYS
            );
        }
    }

    #[test]
    fn non_numeric_admin_level_falls_back_to_default() {
        let raw = json!({ "roles": { "adminLevel": "nope" } });
        let settings = normalize(Some(&raw));
        assert_eq!(settings.roles.admin_level, 100);
    }

    #[test]
    fn clamps_levels_and_policy_bounds() {
        let raw = json!({
            "roles": { "admin_level": 900, "moderator_level": -3 },
            "invite_policy": { "expiry_hours": 0 },
            "moderation": { "audit_retention_days": 10_000 },
        });
        let settings = normalize(Some(&raw));
        assert_eq!(settings.roles.admin_level, 100);
        assert_eq!(settings.roles.moderator_level, 0);
        assert_eq!(settings.invite_policy.expiry_hours, INVITE_EXPIRY_HOURS_MIN);
        assert_eq!(
            settings.moderation.audit_retention_days,
            AUDIT_RETENTION_DAYS_MAX
        );
    }

    #[test]
    fn dedupes_roles_by_id_and_synthesizes_missing_ids() {
        let raw = json!({
            "roles": {
                "custom": [
                    { "id": "mods", "name": "Mods", "power_level": 50 },
                    { "id": "mods", "name": "Shadow", "power_level": 99 },
                    { "name": "Anonymous" },
                    "garbage",
                ]
            }
        });
        let settings = normalize(Some(&raw));
        assert_eq!(settings.roles.custom.len(), 3);
        assert_eq!(settings.roles.custom[0].name, "Mods");
        assert_eq!(settings.roles.custom[0].power_level, 50);
        assert!(settings.roles.custom[1].id.starts_with("role-"));
        assert_eq!(settings.roles.custom[1].name, "Anonymous");
        assert!(settings.roles.custom[2].id.starts_with("role-"));
        assert_eq!(settings.roles.custom[2].name, "Role");
    }

    #[test]
    fn parses_role_grants_and_drops_unknown_actions() {
        let raw = json!({
            "roles": {
                "custom": [{
                    "id": "helpers",
                    "name": "Helpers",
                    "grants": ["pin_messages", "launch_rockets"],
                }]
            }
        });
        let settings = normalize(Some(&raw));
        assert_eq!(
            settings.roles.custom[0].grants,
            vec![PermissionAction::PinMessages]
        );
    }

    #[test]
    fn overrides_drop_inherit_and_empty_scopes() {
        let raw = json!({
            "categories": {
                "ops": {
                    "send_messages": "deny",
                    "pin_messages": "inherit",
                },
                "empty": { "manage_roles": "inherit" },
            },
            "rooms": {
                "room-1": { "manage_channels": "allow", "bogus_action": "deny" },
            },
        });
        let overrides = normalize_overrides(Some(&raw));

        let ops = overrides.categories.get("ops").expect("ops scope kept");
        assert_eq!(ops.len(), 1);
        assert_eq!(
            ops.get(&PermissionAction::SendMessages),
            Some(&OverrideRule::Deny)
        );
        assert!(!overrides.categories.contains_key("empty"));

        let room = overrides.rooms.get("room-1").expect("room scope kept");
        assert_eq!(
            room.get(&PermissionAction::ManageChannels),
            Some(&OverrideRule::Allow)
        );
        assert_eq!(room.len(), 1);
    }

    #[test]
    fn overrides_tolerate_arbitrary_shapes() {
        for raw in [json!(null), json!("x"), json!([{"a": 1}]), json!(42)] {
            let overrides = normalize_overrides(Some(&raw));
            assert!(overrides.categories.is_empty());
            assert!(overrides.rooms.is_empty());
        }
    }
}
