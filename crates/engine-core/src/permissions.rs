use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{OverrideMap, OverrideRule, PermissionAction, ServerSettings};

/// Membership state of the acting user in the room being evaluated.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Membership {
    Join,
    Invite,
    Leave,
    Ban,
}

/// Which rule decided a capability, in precedence order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DecisionSource {
    /// The user is not a joined member; everything is denied.
    Membership,
    RoomOverride,
    CategoryOverride,
    RoleGrant,
    PowerLevel,
}

/// One explainable allow/deny decision.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilityDecision {
    pub allowed: bool,
    pub source: DecisionSource,
}

/// Resolved capability snapshot for one user in one room scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    decisions: BTreeMap<PermissionAction, CapabilityDecision>,
}

impl Capabilities {
    pub fn allows(&self, action: PermissionAction) -> bool {
        self.decisions
            .get(&action)
            .map(|decision| decision.allowed)
            .unwrap_or(false)
    }

    pub fn decision(&self, action: PermissionAction) -> Option<CapabilityDecision> {
        self.decisions.get(&action).copied()
    }
}

/// Resolve every permission action for one user.
///
/// Precedence: room override > category override > role grant >
/// power-level threshold. Non-joined membership denies everything up front.
/// In local/offline mode the caller passes a boosted `power_level` of 100.
pub fn resolve(
    membership: Membership,
    power_level: Option<i64>,
    settings: &ServerSettings,
    held_role_ids: &[String],
    category_override: Option<&OverrideMap>,
    room_override: Option<&OverrideMap>,
) -> Capabilities {
    let mut decisions = BTreeMap::new();
    for action in PermissionAction::ALL {
        decisions.insert(
            action,
            resolve_action(
                action,
                membership,
                power_level,
                settings,
                held_role_ids,
                category_override,
                room_override,
            ),
        );
    }
    Capabilities { decisions }
}

/// Whether the user may run an irreversible administrative room purge.
///
/// Purge authorization deliberately ignores role-definition grants: only a
/// durable power level at or above the admin threshold qualifies.
pub fn can_purge_rooms(power_level: Option<i64>, settings: &ServerSettings) -> bool {
    power_level.unwrap_or(i64::MIN) >= settings.roles.admin_level as i64
}

fn resolve_action(
    action: PermissionAction,
    membership: Membership,
    power_level: Option<i64>,
    settings: &ServerSettings,
    held_role_ids: &[String],
    category_override: Option<&OverrideMap>,
    room_override: Option<&OverrideMap>,
) -> CapabilityDecision {
    if membership != Membership::Join {
        return CapabilityDecision {
            allowed: false,
            source: DecisionSource::Membership,
        };
    }

    if let Some(rule) = room_override.and_then(|map| map.get(&action)) {
        return CapabilityDecision {
            allowed: *rule == OverrideRule::Allow,
            source: DecisionSource::RoomOverride,
        };
    }

    if let Some(rule) = category_override.and_then(|map| map.get(&action)) {
        return CapabilityDecision {
            allowed: *rule == OverrideRule::Allow,
            source: DecisionSource::CategoryOverride,
        };
    }

    let granted_by_role = settings
        .roles
        .custom
        .iter()
        .filter(|role| held_role_ids.iter().any(|held| *held == role.id))
        .any(|role| role.grants.contains(&action));
    if granted_by_role {
        return CapabilityDecision {
            allowed: true,
            source: DecisionSource::RoleGrant,
        };
    }

    let effective = power_level.unwrap_or(settings.roles.default_level as i64);
    CapabilityDecision {
        allowed: effective >= required_level(action, settings) as i64,
        source: DecisionSource::PowerLevel,
    }
}

/// Power-level threshold for each action, from the settings document.
fn required_level(action: PermissionAction, settings: &ServerSettings) -> u8 {
    match action {
        PermissionAction::SendMessages => settings.roles.default_level,
        PermissionAction::ManageMessages
        | PermissionAction::ManageChannels
        | PermissionAction::PinMessages
        | PermissionAction::MentionEveryone
        | PermissionAction::KickMembers
        | PermissionAction::BanMembers => settings.roles.moderator_level,
        PermissionAction::ManageRoles => settings.roles.admin_level,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::normalize;
    use crate::types::RoleDefinition;

    fn default_settings() -> ServerSettings {
        normalize(None)
    }

    fn override_map(action: PermissionAction, rule: OverrideRule) -> OverrideMap {
        let mut map = OverrideMap::new();
        map.insert(action, rule);
        map
    }

    #[test]
    fn joined_member_sends_messages_by_default() {
        let caps = resolve(
            Membership::Join,
            Some(0),
            &default_settings(),
            &[],
            None,
            None,
        );
        assert!(caps.allows(PermissionAction::SendMessages));
        assert!(!caps.allows(PermissionAction::ManageChannels));
        assert_eq!(
            caps.decision(PermissionAction::SendMessages)
                .expect("decision present")
                .source,
            DecisionSource::PowerLevel
        );
    }

    #[test]
    fn non_joined_membership_denies_everything() {
        for membership in [Membership::Invite, Membership::Leave, Membership::Ban] {
            let caps = resolve(membership, Some(100), &default_settings(), &[], None, None);
            for action in PermissionAction::ALL {
                assert!(!caps.allows(action));
            }
        }
    }

    #[test]
    fn room_override_beats_category_override() {
        let category = override_map(PermissionAction::SendMessages, OverrideRule::Allow);
        let room = override_map(PermissionAction::SendMessages, OverrideRule::Deny);
        let caps = resolve(
            Membership::Join,
            Some(100),
            &default_settings(),
            &[],
            Some(&category),
            Some(&room),
        );

        let decision = caps
            .decision(PermissionAction::SendMessages)
            .expect("decision present");
        assert!(!decision.allowed);
        assert_eq!(decision.source, DecisionSource::RoomOverride);
    }

    #[test]
    fn category_override_beats_role_derived_decision() {
        let category = override_map(PermissionAction::ManageChannels, OverrideRule::Allow);
        let caps = resolve(
            Membership::Join,
            Some(0),
            &default_settings(),
            &[],
            Some(&category),
            None,
        );
        let decision = caps
            .decision(PermissionAction::ManageChannels)
            .expect("decision present");
        assert!(decision.allowed);
        assert_eq!(decision.source, DecisionSource::CategoryOverride);
    }

    #[test]
    fn held_role_grant_allows_without_power_level() {
        let mut settings = default_settings();
        settings.roles.custom.push(RoleDefinition {
            id: "helpers".to_owned(),
            name: "Helpers".to_owned(),
            color: "#00ff00".to_owned(),
            power_level: 0,
            grants: vec![PermissionAction::PinMessages],
        });

        let caps = resolve(
            Membership::Join,
            Some(0),
            &settings,
            &["helpers".to_owned()],
            None,
            None,
        );
        let decision = caps
            .decision(PermissionAction::PinMessages)
            .expect("decision present");
        assert!(decision.allowed);
        assert_eq!(decision.source, DecisionSource::RoleGrant);

        // Same settings, role not held: falls through to the level check.
        let caps = resolve(Membership::Join, Some(0), &settings, &[], None, None);
        assert!(!caps.allows(PermissionAction::PinMessages));
    }

    #[test]
    fn purge_requires_durable_admin_power_level() {
        let mut settings = default_settings();
        settings.roles.custom.push(RoleDefinition {
            id: "janitors".to_owned(),
            name: "Janitors".to_owned(),
            color: "#ff0000".to_owned(),
            power_level: 0,
            grants: vec![PermissionAction::ManageChannels],
        });

        assert!(!can_purge_rooms(None, &settings));
        assert!(!can_purge_rooms(Some(99), &settings));
        assert!(can_purge_rooms(Some(100), &settings));
    }

    #[test]
    fn boosted_local_mode_level_allows_moderation() {
        let caps = resolve(
            Membership::Join,
            Some(100),
            &default_settings(),
            &[],
            None,
            None,
        );
        assert!(caps.allows(PermissionAction::ManageChannels));
        assert!(caps.allows(PermissionAction::ManageRoles));
    }
}
