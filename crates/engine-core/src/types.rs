use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Reserved space id for the aggregate view when no backend grouping exists.
pub const LOCAL_SPACE_ID: &str = "space-local";

/// Reserved category id that always exists and is pinned to position 0.
pub const DEFAULT_CATEGORY_ID: &str = "general";

/// Display name of the reserved default category.
pub const DEFAULT_CATEGORY_NAME: &str = "General";

/// Maximum retained moderation audit entries (newest-first).
pub const AUDIT_LOG_CAP: usize = 250;

/// Maximum persisted pending-redaction intents.
pub const PENDING_REDACTION_CAP: usize = 200;

/// Time-to-live for persisted pending-redaction intents.
pub const PENDING_REDACTION_TTL_MS: u64 = 24 * 60 * 60 * 1000;

/// Logical server/community container grouping rooms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Space {
    /// Space id. Backend room id of the container room, or [`LOCAL_SPACE_ID`].
    pub id: String,
    /// Display name.
    pub name: String,
    /// Optional icon reference (`mxc://` URI or embedded data).
    pub icon: Option<String>,
}

/// Room kind. Direct rooms are excluded from layout placement.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum RoomKind {
    Text,
    Voice,
    Video,
    Direct,
}

impl RoomKind {
    /// Whether rooms of this kind participate in category placement.
    pub fn placeable(self) -> bool {
        self != RoomKind::Direct
    }
}

/// A channel or direct-message conversation owned by exactly one space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Room {
    /// Room id (backend room id, or engine-generated in local mode).
    pub id: String,
    /// Owning space id.
    pub space_id: String,
    /// Display name.
    pub name: String,
    /// Room kind.
    pub kind: RoomKind,
    /// Projected category id, re-derived from the layout after every mutation.
    pub category_id: String,
    /// Optional topic text.
    pub topic: Option<String>,
    /// Unread message count reported by sync.
    pub unread_count: u64,
    /// Projected position within its category, re-derived from the layout.
    pub sort_order: u32,
    /// Whether this is the space's welcome room.
    pub is_welcome: bool,
}

/// Grouping of non-direct rooms within a space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub order: u32,
}

/// Placement of one room inside the layout document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomPlacement {
    pub category_id: String,
    pub order: u32,
}

/// The authoritative category/ordering document for one space.
///
/// Persisted as a state document when backend-connected, held in memory in
/// local mode. Invariant after every mutation: every non-direct room has
/// exactly one placement, every placement's category exists, and per-category
/// orders form a dense `0..n` sequence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct SpaceLayout {
    pub version: u32,
    pub categories: Vec<Category>,
    pub rooms: BTreeMap<String, RoomPlacement>,
}

/// One emoji reaction and the users who applied it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reaction {
    pub emoji: String,
    pub user_ids: Vec<String>,
}

/// Uploaded or referenced file attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    /// Content source (`mxc://` URI when backend-connected).
    pub source: String,
}

/// Delivery status of a message as seen by this client.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Accepted by the backend, or committed in local mode.
    Sent,
    /// Created while offline; awaiting a connection.
    Queued,
}

/// A timeline message.
///
/// In backend mode ids are protocol event ids, except local echoes which
/// carry a temporary `~<room_id>:<txn_id>` id until acknowledged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub room_id: String,
    pub author_id: String,
    pub body: String,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub reactions: Vec<Reaction>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub reply_to_id: Option<String>,
    #[serde(default)]
    pub thread_root_id: Option<String>,
    #[serde(default)]
    pub pinned: bool,
    pub status: MessageStatus,
}

/// Moderation action recorded in the audit log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    MessageRedacted,
    MessagePinned,
    MemberKicked,
    MemberBanned,
    RoomPurged,
    SettingsChanged,
    PermissionRuleChanged,
    CategoryDeleted,
}

/// One append-only audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModerationAuditEvent {
    pub id: String,
    pub action: AuditAction,
    pub actor_id: String,
    pub target: String,
    pub timestamp_ms: u64,
    #[serde(default)]
    pub source_event_id: Option<String>,
}

/// "The user asked to delete a message that has no durable remote id yet."
///
/// Persisted across restarts, pruned by TTL and cap, deduplicated by
/// `(room_id, txn_id)`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PendingRedactionIntent {
    pub room_id: String,
    pub txn_id: String,
    pub source_message_id: String,
    pub queued_at_ms: u64,
}

/// Fixed enumeration of permission actions subject to overrides.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum PermissionAction {
    SendMessages,
    ManageMessages,
    ManageChannels,
    ManageRoles,
    PinMessages,
    MentionEveryone,
    KickMembers,
    BanMembers,
}

impl PermissionAction {
    /// All actions, in a stable order.
    pub const ALL: [PermissionAction; 8] = [
        PermissionAction::SendMessages,
        PermissionAction::ManageMessages,
        PermissionAction::ManageChannels,
        PermissionAction::ManageRoles,
        PermissionAction::PinMessages,
        PermissionAction::MentionEveryone,
        PermissionAction::KickMembers,
        PermissionAction::BanMembers,
    ];
}

/// Explicit override rule. Absence of a rule means "inherit".
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OverrideRule {
    Allow,
    Deny,
}

/// Compact override document for one scope; inherit is never stored.
pub type OverrideMap = BTreeMap<PermissionAction, OverrideRule>;

/// Per-category and per-room override maps for one space.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ScopedOverrides {
    #[serde(default)]
    pub categories: BTreeMap<String, OverrideMap>,
    #[serde(default)]
    pub rooms: BTreeMap<String, OverrideMap>,
}

/// Custom role definition carried by the settings document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleDefinition {
    pub id: String,
    pub name: String,
    /// Hex color string, e.g. `#ffaa00`.
    pub color: String,
    /// Power level in `0..=100`.
    pub power_level: u8,
    #[serde(default)]
    pub grants: Vec<PermissionAction>,
}

/// Power-level thresholds plus custom role definitions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoleSettings {
    pub admin_level: u8,
    pub moderator_level: u8,
    pub default_level: u8,
    #[serde(default)]
    pub custom: Vec<RoleDefinition>,
}

/// Who may create invites for the space.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InviteScope {
    Admins,
    Moderators,
    Everyone,
}

/// Invite creation policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InvitePolicy {
    pub who_can_invite: InviteScope,
    /// Invite expiry in hours, `1..=168`.
    pub expiry_hours: u32,
}

/// Moderation bookkeeping policy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModerationPolicy {
    /// Audit retention in days, `7..=365`.
    pub audit_retention_days: u32,
    pub notify_on_action: bool,
}

/// Versioned server settings document.
///
/// Normalization ([`crate::settings::normalize`]) always produces a complete,
/// clamped structure from partial or untrusted input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ServerSettings {
    pub version: u32,
    pub overview: String,
    pub roles: RoleSettings,
    pub invite_policy: InvitePolicy,
    pub moderation: ModerationPolicy,
}
