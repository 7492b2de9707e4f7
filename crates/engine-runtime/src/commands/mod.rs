//! Externally-invoked operations.
//!
//! Every operation follows one shape: validate and short-circuit locally,
//! perform the remote write first for layout/settings-class operations, then
//! commit the canonical structure and re-derive dependent projections.
//! Messaging-class operations commit optimistically instead.

/// Category and room placement operations.
pub mod categories;
/// Message send/react/pin/paginate operations.
pub mod messaging;
/// Room creation and irreversible deletion.
pub mod rooms;
/// Space, settings and permission-rule operations.
pub mod spaces;

pub use spaces::OverrideScope;
