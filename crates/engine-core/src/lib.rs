//! Pure reconciliation core shared by the runtime and backend adapters.
//!
//! This crate holds the data model and the deterministic, I/O-free pieces of
//! the engine: layout hydration, settings normalization, permission
//! resolution, timeline merging, redaction bookkeeping and the audit log.

/// Moderation audit log helpers.
pub mod audit;
/// Stable engine error types and HTTP classification helpers.
pub mod error;
/// Category/room placement document and its pure transformations.
pub mod layout;
/// Permission resolution with override precedence.
pub mod permissions;
/// Pending-redaction state machine and intent bookkeeping.
pub mod redaction;
/// Backoff policy used by retry loops.
pub mod retry;
/// Server settings and permission-override normalization.
pub mod settings;
/// Message merge and local-echo helpers.
pub mod timeline;
/// Shared data model types.
pub mod types;

pub use audit::{normalize_audit, record_audit};
pub use error::{EngineError, EngineErrorCategory, classify_http_status};
pub use layout::{LayoutError, hydrate};
pub use permissions::{Capabilities, CapabilityDecision, DecisionSource, Membership, resolve};
pub use redaction::{RedactionError, RedactionPhase, dedupe_intents, prune_intents};
pub use retry::RetryPolicy;
pub use settings::{normalize, normalize_overrides};
pub use timeline::{is_local_echo_id, local_echo_id, merge, parse_local_echo_id};
pub use types::{
    Attachment, AuditAction, Category, InvitePolicy, InviteScope, Message, MessageStatus,
    ModerationAuditEvent, ModerationPolicy, OverrideMap, OverrideRule, PendingRedactionIntent,
    PermissionAction, Reaction, RoleDefinition, RoleSettings, Room, RoomKind, RoomPlacement,
    ScopedOverrides, ServerSettings, Space, SpaceLayout,
};
