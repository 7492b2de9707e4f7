//! Local persistence for process-wide engine side tables.
//!
//! Two documents survive restarts: the preferences document and the
//! pending-redaction queue. Both are JSON files written through an atomic
//! replace, with an in-memory sink available for tests.

/// Preferences document and store.
pub mod prefs;
/// Pending-redaction queue store.
pub mod redactions;
/// Document sink abstraction and implementations.
pub mod sink;

pub use prefs::{
    Accessibility, Composer, Density, Preferences, PreferencesStore, Profile, Theme,
};
pub use redactions::RedactionQueueStore;
pub use sink::{DocumentSink, FileSink, InMemorySink, StoreError};
