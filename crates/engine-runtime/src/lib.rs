//! Reconciliation runtime: session manager, index builder and command façade.
//!
//! The runtime keeps one consistent snapshot of spaces, rooms, layouts,
//! settings and timelines, reconciling optimistic local mutations against
//! asynchronous remote truth delivered through a [`port::BackendPort`]. The
//! engine stays correct whether a federated backend is connected or the
//! in-memory [`port::NullBackend`] is driving local simulation mode.

use std::time::{SystemTime, UNIX_EPOCH};

/// Command façade operations grouped by domain.
pub mod commands;
/// Engine event stream for presentation-layer subscribers.
pub mod events;
/// Space/room index builder and document discovery.
pub mod index;
/// Backend capability interface and the local-mode implementation.
pub mod port;
/// Deferred redaction reconciliation.
pub mod reconcile;
/// Session lifecycle and backend subscriptions.
pub mod session;
/// Snapshot read surface.
pub mod snapshot;

pub use commands::OverrideScope;
pub use events::{EngineEvent, EventHub, EventStream, Notice, Severity};
pub use index::{DiscoveredState, SpaceIndex, build_index, discover};
pub use port::{
    BackendKind, BackendPort, BackendSignal, GraphRoom, NullBackend, RoomGraph, StateDocKind,
};
pub use session::{Session, SessionConfig, SessionState};
pub use snapshot::EngineSnapshot;

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}
