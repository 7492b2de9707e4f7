use std::sync::{Arc, Mutex as StdMutex, RwLock};

use engine_core::error::EngineError;
use engine_core::permissions::{self, Membership};
use engine_core::timeline;
use engine_core::types::{AuditAction, ModerationAuditEvent, PermissionAction};
use engine_platform::{DocumentSink, RedactionQueueStore};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::events::{EngineEvent, EventHub, EventStream, Severity};
use crate::index;
use crate::port::{BackendKind, BackendPort, BackendSignal, NullBackend, StateDocKind};
use crate::snapshot::{EngineSnapshot, EngineState};

/// Session lifecycle as exposed to the presentation layer.
///
/// `Error` is reachable from `Connecting`/`Syncing` and is only left by an
/// explicit `bootstrap` retry; there is no silent auto-retry loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Syncing,
    Idle,
    Error(String),
}

/// Construction-time session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Acting user id used in local mode.
    pub local_user_id: String,
    /// Start with the offline flag set: sends queue instead of committing.
    pub offline: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            local_user_id: "@local:engine".to_owned(),
            offline: false,
        }
    }
}

/// Owns the backend connection lifecycle, the engine state and all in-flight
/// bookkeeping. Constructed at most once per process by contract, but
/// `bootstrap` tolerates repeated invocation.
pub struct Session {
    pub(crate) state: Mutex<EngineState>,
    pub(crate) events: EventHub,
    pub(crate) redactions: RedactionQueueStore<Arc<dyn DocumentSink>>,
    backend: RwLock<Arc<dyn BackendPort>>,
    listener: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    /// Create a session in local simulation mode.
    pub fn new(config: SessionConfig, sink: Arc<dyn DocumentSink>) -> Arc<Self> {
        let redactions = RedactionQueueStore::new(sink);
        let mut state = EngineState::new();
        state.offline = config.offline;
        match redactions.load(crate::now_ms()) {
            Ok(intents) => state.pending_redactions = intents,
            Err(err) => {
                warn!(error = %err, "failed loading pending redactions; starting empty");
            }
        }

        Arc::new(Self {
            state: Mutex::new(state),
            events: EventHub::new(256),
            redactions,
            backend: RwLock::new(Arc::new(NullBackend::new(config.local_user_id))),
            listener: StdMutex::new(None),
        })
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> EventStream {
        self.events.subscribe()
    }

    /// Latest consistent snapshot.
    pub async fn snapshot(&self) -> EngineSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Flip the offline flag; queued sends are not replayed automatically.
    pub async fn set_offline(&self, offline: bool) {
        self.state.lock().await.offline = offline;
    }

    pub(crate) fn backend(&self) -> Arc<dyn BackendPort> {
        self.backend
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Whether a federated backend is driving the session.
    pub fn connected(&self) -> bool {
        self.backend().kind() == BackendKind::Federated
    }

    /// Acting user id.
    pub fn user_id(&self) -> String {
        self.backend().user_id()
    }

    /// Fresh client-generated transaction id.
    pub(crate) fn new_txn_id(&self) -> String {
        format!("tx-{}", Uuid::new_v4())
    }

    /// Run initial discovery in local mode and start listening to the mock
    /// backend. The session stays `Disconnected`.
    pub async fn bootstrap_local(self: &Arc<Self>) -> Result<(), EngineError> {
        self.attach_listener();
        self.refresh_discovery().await?;
        Ok(())
    }

    /// Connect a federated backend and run the full discovery sequence.
    ///
    /// Idempotent: a second call while connected is a no-op. After an
    /// `Error`, calling again is the explicit user retry path.
    pub async fn bootstrap(
        self: &Arc<Self>,
        backend: Arc<dyn BackendPort>,
    ) -> Result<(), EngineError> {
        {
            let state = self.state.lock().await;
            let already_connected = self.connected()
                && !matches!(
                    state.session,
                    SessionState::Disconnected | SessionState::Error(_)
                );
            if already_connected {
                debug!("bootstrap requested while connected; ignoring");
                return Ok(());
            }
        }

        info!("bootstrapping backend session");
        self.set_session_state(SessionState::Connecting).await;
        {
            let mut guard = self
                .backend
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = backend;
        }
        self.attach_listener();

        self.set_session_state(SessionState::Syncing).await;
        if let Err(err) = self.refresh_discovery().await {
            self.set_session_state(SessionState::Error(err.message.clone()))
                .await;
            self.events
                .notify(Severity::Error, format!("connection failed: {}", err.message));
            return Err(err);
        }

        // Opportunistic sweep of intents persisted before this connection.
        let rooms_with_intents: Vec<String> = {
            let state = self.state.lock().await;
            let mut rooms: Vec<String> = state
                .pending_redactions
                .iter()
                .map(|intent| intent.room_id.clone())
                .collect();
            rooms.dedup();
            rooms
        };
        for room_id in rooms_with_intents {
            self.sweep_room(&room_id).await;
        }

        self.set_session_state(SessionState::Idle).await;
        Ok(())
    }

    /// Drop the backend and return to local mode with empty state.
    pub async fn logout(self: &Arc<Self>) {
        if let Some(handle) = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            handle.abort();
        }

        let local_user = {
            let guard = self
                .backend
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.user_id()
        };
        {
            let mut guard = self
                .backend
                .write()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            *guard = Arc::new(NullBackend::new(local_user));
        }

        let mut state = self.state.lock().await;
        let offline = state.offline;
        let pending = state.pending_redactions.clone();
        *state = EngineState::new();
        state.offline = offline;
        state.pending_redactions = pending;
        drop(state);

        self.set_session_state(SessionState::Disconnected).await;
        self.events.emit(EngineEvent::SnapshotUpdated);
    }

    /// Select the active space.
    pub async fn set_active_space(&self, space_id: Option<String>) {
        let mut state = self.state.lock().await;
        if let Some(space_id) = &space_id {
            if !state.spaces.iter().any(|space| space.id == *space_id) {
                warn!(space_id = %space_id, "ignoring selection of unknown space");
                return;
            }
        }
        state.active_space_id = space_id;
        state.active_room_id = None;
        drop(state);
        self.events.emit(EngineEvent::SnapshotUpdated);
    }

    /// Select the active room; re-opening a room triggers a redaction sweep.
    pub async fn set_active_room(self: &Arc<Self>, room_id: Option<String>) {
        {
            let mut state = self.state.lock().await;
            if let Some(room_id) = &room_id {
                if state.room(room_id).is_none() {
                    warn!(room_id = %room_id, "ignoring selection of unknown room");
                    return;
                }
            }
            state.active_room_id = room_id.clone();
        }
        self.events.emit(EngineEvent::SnapshotUpdated);

        if let Some(room_id) = room_id {
            self.sweep_room(&room_id).await;
        }
    }

    /// Re-run space/room discovery and replace the derived state.
    ///
    /// Messages are preserved; stale active selections are cleared.
    pub(crate) async fn refresh_discovery(&self) -> Result<(), EngineError> {
        let backend = self.backend();
        let discovered = index::discover(&backend).await?;

        let mut state = self.state.lock().await;
        state.spaces = discovered.index.spaces;
        state.rooms = discovered.index.rooms;
        state.state_hosts = discovered.index.state_hosts;
        state.layouts = discovered.layouts;
        state.settings = discovered.settings;
        state.overrides = discovered.overrides;
        state.audit = discovered.audit;

        if let Some(active_room) = state.active_room_id.clone() {
            if state.room(&active_room).is_none() {
                warn!(room_id = %active_room, "active room disappeared during discovery");
                state.active_room_id = None;
            }
        }
        if let Some(active_space) = state.active_space_id.clone() {
            if !state.spaces.iter().any(|space| space.id == active_space) {
                state.active_space_id = None;
                state.active_room_id = None;
            }
        }
        drop(state);

        self.events.emit(EngineEvent::SnapshotUpdated);
        Ok(())
    }

    pub(crate) async fn set_session_state(&self, next: SessionState) {
        {
            let mut state = self.state.lock().await;
            if state.session == next {
                return;
            }
            state.session = next.clone();
        }
        self.events.emit(EngineEvent::SessionChanged { state: next });
    }

    /// Resolve the state host room for a space.
    pub(crate) async fn state_host(&self, space_id: &str) -> Result<String, EngineError> {
        let state = self.state.lock().await;
        state
            .state_hosts
            .get(space_id)
            .cloned()
            .ok_or_else(|| EngineError::validation("no_state_host", "space has no state host room"))
    }

    /// Capability gate for one action against a space's settings.
    pub(crate) async fn require_capability(
        &self,
        space_id: &str,
        action: PermissionAction,
    ) -> Result<(), EngineError> {
        let (settings, host) = {
            let state = self.state.lock().await;
            let settings = state
                .settings
                .get(space_id)
                .cloned()
                .unwrap_or_else(|| engine_core::settings::normalize(None));
            let host = state.state_hosts.get(space_id).cloned();
            (settings, host)
        };

        let backend = self.backend();
        let (membership, power) = match &host {
            Some(host) => {
                backend
                    .membership_power_level(host, &backend.user_id())
                    .await?
            }
            None => (Membership::Join, Some(100)),
        };

        let caps = permissions::resolve(membership, power, &settings, &[], None, None);
        if caps.allows(action) {
            Ok(())
        } else {
            Err(EngineError::forbidden(format!("{action:?}")))
        }
    }

    /// Admin gate for the irreversible purge path.
    pub(crate) async fn require_purge_capability(&self, space_id: &str) -> Result<(), EngineError> {
        let (settings, host) = {
            let state = self.state.lock().await;
            let settings = state
                .settings
                .get(space_id)
                .cloned()
                .unwrap_or_else(|| engine_core::settings::normalize(None));
            let host = state.state_hosts.get(space_id).cloned();
            (settings, host)
        };

        let backend = self.backend();
        let power = match &host {
            Some(host) => {
                backend
                    .membership_power_level(host, &backend.user_id())
                    .await?
                    .1
            }
            None => Some(100),
        };

        if permissions::can_purge_rooms(power, &settings) {
            Ok(())
        } else {
            Err(EngineError::forbidden("purge channels"))
        }
    }

    /// Append to a space's audit log and mirror it to the state host.
    ///
    /// The remote write is best-effort: a failure is logged, never surfaced.
    pub(crate) async fn record_space_audit(
        &self,
        space_id: &str,
        action: AuditAction,
        target: impl Into<String>,
        source_event_id: Option<String>,
    ) {
        let event = ModerationAuditEvent {
            id: format!("audit-{}", Uuid::new_v4()),
            action,
            actor_id: self.user_id(),
            target: target.into(),
            timestamp_ms: crate::now_ms(),
            source_event_id,
        };

        let (log, host) = {
            let mut state = self.state.lock().await;
            let log = engine_core::audit::record_audit(
                state.audit.get(space_id).map(Vec::as_slice).unwrap_or_default(),
                event,
            );
            state.audit.insert(space_id.to_owned(), log.clone());
            (log, state.state_hosts.get(space_id).cloned())
        };

        if let Some(host) = host {
            let doc = serde_json::json!({ "entries": log });
            if let Err(err) = self
                .backend()
                .state_doc_put(&host, StateDocKind::Audit, doc)
                .await
            {
                warn!(space_id = %space_id, error = %err, "audit log write failed");
            }
        }
    }

    fn attach_listener(self: &Arc<Self>) {
        let mut guard = self
            .listener
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = guard.take() {
            previous.abort();
        }

        let mut signals = self.backend().subscribe();
        let session = Arc::clone(self);
        *guard = Some(tokio::spawn(async move {
            debug!("backend signal listener started");
            loop {
                match signals.recv().await {
                    Ok(signal) => session.handle_signal(signal).await,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, "signal listener lagged; resyncing");
                        if let Err(err) = session.refresh_discovery().await {
                            warn!(error = %err, "post-lag discovery failed");
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            debug!("backend signal listener exiting");
        }));
    }

    async fn handle_signal(self: &Arc<Self>, signal: BackendSignal) {
        match signal {
            BackendSignal::Timeline {
                room_id,
                message,
                txn_id,
            } => {
                trace!(room_id = %room_id, "timeline signal");
                {
                    let mut state = self.state.lock().await;
                    let is_active = state.active_room_id.as_deref() == Some(room_id.as_str());
                    if is_active || state.messages.contains_key(&room_id) {
                        let existing = state
                            .messages
                            .get(&room_id)
                            .map(Vec::as_slice)
                            .unwrap_or_default();
                        let merged = timeline::merge(existing, &[message.clone()], &[]);
                        state.messages.insert(room_id.clone(), merged);
                    }
                    if !is_active {
                        if let Some(room) = state.rooms.iter_mut().find(|r| r.id == room_id) {
                            room.unread_count += 1;
                        }
                    }
                }
                self.events.emit(EngineEvent::SnapshotUpdated);

                if let Some(txn_id) = txn_id {
                    self.settle_intent_if_pending(&room_id, &txn_id, &message.id)
                        .await;
                }
                self.sweep_room(&room_id).await;
            }
            BackendSignal::EchoResolved {
                room_id,
                txn_id,
                event_id,
            } => {
                self.on_echo_resolved(&room_id, &txn_id, &event_id).await;
            }
            BackendSignal::RoomMetaChanged { room_id } => {
                let active_space = {
                    let state = self.state.lock().await;
                    state.active_space_id.clone()
                };
                let relevant = match &active_space {
                    Some(space_id) => {
                        let state = self.state.lock().await;
                        state
                            .room(&room_id)
                            .map(|room| room.space_id == *space_id)
                            .unwrap_or(true)
                    }
                    None => true,
                };
                if relevant {
                    if let Err(err) = self.refresh_discovery().await {
                        warn!(error = %err, "discovery after room meta change failed");
                    }
                }
            }
            BackendSignal::StateDocChanged { room_id, kind } => {
                let is_active_host = {
                    let state = self.state.lock().await;
                    match &state.active_space_id {
                        Some(space_id) => {
                            state.state_hosts.get(space_id).map(String::as_str)
                                == Some(room_id.as_str())
                        }
                        // No active space yet: any host change refreshes.
                        None => true,
                    }
                };
                if is_active_host {
                    trace!(doc = kind.event_type(), "state document changed on active host");
                    if let Err(err) = self.refresh_discovery().await {
                        warn!(error = %err, "discovery after state doc change failed");
                    }
                }
            }
            BackendSignal::SyncState { syncing } => {
                if self.connected() {
                    let current = {
                        let state = self.state.lock().await;
                        state.session.clone()
                    };
                    // Only flip between the two steady states.
                    if matches!(current, SessionState::Syncing | SessionState::Idle) {
                        let next = if syncing {
                            SessionState::Syncing
                        } else {
                            SessionState::Idle
                        };
                        self.set_session_state(next).await;
                    }
                }
            }
        }
    }
}
