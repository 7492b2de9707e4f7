//! Federated backend adapter over `matrix-sdk`.
//!
//! Implements the engine's backend port against a Matrix homeserver: message
//! and redaction writes, backward pagination, the custom state documents the
//! engine layers on generic state events, membership/power queries, and the
//! administrative purge protocol.

use std::{collections::HashMap, path::PathBuf, sync::Mutex as StdMutex};

use async_trait::async_trait;
use engine_core::error::{EngineError, EngineErrorCategory, classify_http_status};
use engine_core::permissions::Membership;
use engine_core::retry::RetryPolicy;
use engine_core::types::{Message, MessageStatus, RoomKind};
use engine_runtime::port::{BackendKind, BackendPort, BackendSignal, GraphRoom, RoomGraph, StateDocKind};
use matrix_sdk::{
    Client, ClientBuildError, HttpError, Room as MatrixRoom, RoomState,
    authentication::matrix::MatrixSession,
    config::SyncSettings,
    deserialized_responses::RawAnySyncOrStrippedState,
    room::MessagesOptions,
    ruma::{
        MilliSecondsSinceUnixEpoch, OwnedEventId, OwnedRoomId, UInt,
        api::client::error::{ErrorKind, RetryAfter},
        api::client::receipt::create_receipt::v3::ReceiptType,
        api::client::room::create_room::v3::{CreationContent, Request as CreateRoomRequest},
        events::AnySyncStateEvent,
        events::receipt::ReceiptThread,
        events::reaction::ReactionEventContent,
        events::relation::Annotation,
        events::room::message::{OriginalSyncRoomMessageEvent, RoomMessageEventContent},
        events::room::name::OriginalSyncRoomNameEvent,
        events::room::member::MembershipState,
        room::RoomType,
        serde::Raw,
    },
};
use serde_json::Value;
use tokio::{
    sync::{Mutex, broadcast},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub mod admin;

use admin::AdminPurgeClient;

const DEFAULT_DEVICE_DISPLAY_NAME: &str = "Quorum Desktop";
const TXN_SEARCH_WINDOW: u16 = 50;
const SIGNAL_BUFFER: usize = 512;

/// Connection configuration for the federated backend.
#[derive(Debug, Clone)]
pub struct FederatedBackendConfig {
    pub homeserver: String,
    pub data_dir: PathBuf,
    pub store_passphrase: Option<String>,
}

impl FederatedBackendConfig {
    pub fn new(
        homeserver: impl Into<String>,
        data_dir: impl Into<PathBuf>,
        store_passphrase: Option<String>,
    ) -> Self {
        Self {
            homeserver: homeserver.into(),
            data_dir: data_dir.into(),
            store_passphrase,
        }
    }
}

#[derive(Debug)]
struct RunningSyncTask {
    stop: CancellationToken,
    task: JoinHandle<()>,
}

/// Backend port implementation backed by a Matrix homeserver.
pub struct FederatedBackend {
    client: Client,
    signals: broadcast::Sender<BackendSignal>,
    sync_task: Mutex<Option<RunningSyncTask>>,
    pagination_tokens: StdMutex<HashMap<String, Option<String>>>,
}

impl FederatedBackend {
    /// Build the client and install sync event forwarders.
    pub async fn connect(config: FederatedBackendConfig) -> Result<Self, EngineError> {
        let client = Client::builder()
            .homeserver_url(&config.homeserver)
            .sqlite_store(&config.data_dir, config.store_passphrase.as_deref())
            .build()
            .await
            .map_err(map_client_build_error)?;

        let (signals, _) = broadcast::channel(SIGNAL_BUFFER);
        install_forwarders(&client, signals.clone());

        Ok(Self {
            client,
            signals,
            sync_task: Mutex::new(None),
            pagination_tokens: StdMutex::new(HashMap::new()),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn session(&self) -> Option<MatrixSession> {
        self.client.matrix_auth().session()
    }

    pub async fn login_password(&self, user_id: &str, password: &str) -> Result<(), EngineError> {
        self.client
            .matrix_auth()
            .login_username(user_id, password)
            .initial_device_display_name(DEFAULT_DEVICE_DISPLAY_NAME)
            .send()
            .await
            .map(|_| ())
            .map_err(map_matrix_error)
    }

    pub async fn restore_session(&self, session: MatrixSession) -> Result<(), EngineError> {
        self.client
            .restore_session(session)
            .await
            .map_err(map_matrix_error)
    }

    /// Start the continuous sync loop, retrying transient failures with
    /// exponential backoff and surfacing sync-state transitions as signals.
    pub async fn start_sync(&self) -> Result<(), EngineError> {
        let mut guard = self.sync_task.lock().await;
        if guard.is_some() {
            return Err(EngineError::new(
                EngineErrorCategory::Internal,
                "sync_already_running",
                "sync task is already running",
            ));
        }

        let stop = CancellationToken::new();
        let stop_child = stop.child_token();
        let signals = self.signals.clone();
        let client = self.client.clone();
        let task = tokio::spawn(async move {
            let _ = signals.send(BackendSignal::SyncState { syncing: true });

            let retry_policy = RetryPolicy::default();
            let mut attempt: u32 = 0;
            let mut sync_settings = SyncSettings::default();

            loop {
                tokio::select! {
                    _ = stop_child.cancelled() => break,
                    sync_result = client.sync_once(sync_settings.clone()) => {
                        match sync_result {
                            Ok(sync_response) => {
                                attempt = 0;
                                sync_settings = sync_settings.token(sync_response.next_batch);
                                let _ = signals.send(BackendSignal::SyncState { syncing: false });
                            }
                            Err(err) => {
                                let mapped = map_matrix_error(err);
                                if !mapped.is_transient() {
                                    warn!(error = %mapped, "sync failed fatally; stopping loop");
                                    break;
                                }

                                let delay = retry_policy.delay_for_attempt(attempt, mapped.retry_after_ms);
                                attempt = attempt.saturating_add(1);
                                debug!(delay_ms = delay.as_millis() as u64, "sync retry scheduled");
                                let _ = signals.send(BackendSignal::SyncState { syncing: true });

                                tokio::select! {
                                    _ = stop_child.cancelled() => break,
                                    _ = tokio::time::sleep(delay) => {}
                                }
                            }
                        }
                    }
                }
            }

            let _ = signals.send(BackendSignal::SyncState { syncing: false });
        });

        *guard = Some(RunningSyncTask { stop, task });
        Ok(())
    }

    pub async fn stop_sync(&self) -> Result<(), EngineError> {
        let running = {
            let mut guard = self.sync_task.lock().await;
            guard.take()
        };

        let Some(running) = running else {
            return Err(EngineError::new(
                EngineErrorCategory::Internal,
                "sync_not_running",
                "sync task is not running",
            ));
        };

        running.stop.cancel();
        let _ = running.task.await;
        Ok(())
    }

    fn lookup_room(&self, room_id: &str) -> Result<MatrixRoom, EngineError> {
        let room_id = parse_room_id(room_id)?;
        self.client.get_room(&room_id).ok_or_else(|| {
            EngineError::new(
                EngineErrorCategory::Config,
                "room_not_found",
                format!("room not found: {room_id}"),
            )
        })
    }

    async fn graph_room_from(&self, room: &MatrixRoom) -> GraphRoom {
        let room_id = room.room_id().to_string();
        let kind_doc = self
            .state_doc_get(&room_id, StateDocKind::RoomKind)
            .await
            .unwrap_or(None);
        let kind_marker = kind_doc
            .as_ref()
            .and_then(|doc| doc.get("kind"))
            .and_then(Value::as_str)
            .and_then(|raw| serde_json::from_value::<RoomKind>(Value::String(raw.to_owned())).ok());
        let tombstoned = kind_doc
            .as_ref()
            .and_then(|doc| doc.get("deleted"))
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let is_welcome = kind_doc
            .as_ref()
            .and_then(|doc| doc.get("welcome"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let is_space_container = room.is_space();
        let child_room_ids = if is_space_container {
            self.space_children(room).await
        } else {
            Vec::new()
        };

        let unread = room.unread_notification_counts();
        GraphRoom {
            id: room_id,
            name: room.name(),
            topic: room.topic(),
            is_direct: room.direct_targets_length() > 0,
            kind_marker,
            tombstoned,
            is_space_container,
            child_room_ids,
            unread_count: unread.notification_count,
            is_welcome,
        }
    }

    async fn space_children(&self, room: &MatrixRoom) -> Vec<String> {
        let events = match room
            .get_state_events("m.space.child".into())
            .await
        {
            Ok(events) => events,
            Err(err) => {
                warn!(room_id = %room.room_id(), error = %err, "space child read failed");
                return Vec::new();
            }
        };

        events
            .into_iter()
            .filter_map(|raw| raw_state_field::<String>(&raw, "state_key"))
            .filter(|state_key| !state_key.is_empty())
            .collect()
    }

    /// Scan recent timeline events for the acting user's reaction to a
    /// target event. Returns the reaction event id when found.
    async fn find_own_reaction(
        &self,
        room: &MatrixRoom,
        target_event_id: &str,
        emoji: &str,
    ) -> Result<Option<OwnedEventId>, EngineError> {
        let own_user = self
            .client
            .user_id()
            .map(|user| user.to_string())
            .unwrap_or_default();

        let messages = room
            .messages(backward_options(None, TXN_SEARCH_WINDOW)?)
            .await
            .map_err(map_matrix_error)?;

        for event in &messages.chunk {
            let raw = event.raw();
            let event_type = raw.get_field::<String>("type").ok().flatten();
            if event_type.as_deref() != Some("m.reaction") {
                continue;
            }
            let sender = raw.get_field::<String>("sender").ok().flatten();
            if sender.as_deref() != Some(own_user.as_str()) {
                continue;
            }
            let relates = raw
                .get_field::<Value>("content")
                .ok()
                .flatten()
                .and_then(|content| content.get("m.relates_to").cloned());
            let matches = relates
                .as_ref()
                .map(|relation| {
                    relation.get("event_id").and_then(Value::as_str) == Some(target_event_id)
                        && relation.get("key").and_then(Value::as_str) == Some(emoji)
                })
                .unwrap_or(false);
            if matches {
                return Ok(event.event_id().map(|event_id| event_id.to_owned()));
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl BackendPort for FederatedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Federated
    }

    fn user_id(&self) -> String {
        self.client
            .user_id()
            .map(|user| user.to_string())
            .unwrap_or_default()
    }

    fn subscribe(&self) -> broadcast::Receiver<BackendSignal> {
        self.signals.subscribe()
    }

    async fn room_graph(&self) -> Result<RoomGraph, EngineError> {
        let mut rooms = Vec::new();
        for room in self.client.rooms() {
            if room.state() != RoomState::Joined && room.state() != RoomState::Invited {
                continue;
            }
            rooms.push(self.graph_room_from(&room).await);
        }
        rooms.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(RoomGraph { rooms })
    }

    async fn create_room(
        &self,
        parent_space_id: Option<&str>,
        name: &str,
        kind: RoomKind,
    ) -> Result<String, EngineError> {
        let mut request = CreateRoomRequest::new();
        request.name = Some(name.to_owned());
        let room = self
            .client
            .create_room(request)
            .await
            .map_err(map_matrix_error)?;
        let room_id = room.room_id().to_string();
        info!(room_id = %room_id, "created room");

        let marker = serde_json::to_value(kind).map_err(map_encode_error)?;
        room.send_state_event_raw(
            StateDocKind::RoomKind.event_type(),
            "",
            serde_json::json!({ "kind": marker }),
        )
        .await
        .map_err(map_matrix_error)?;

        if let Some(parent) = parent_space_id {
            let parent_room = self.lookup_room(parent)?;
            let via = self
                .client
                .user_id()
                .map(|user| vec![user.server_name().to_string()])
                .unwrap_or_default();
            parent_room
                .send_state_event_raw(
                    "m.space.child",
                    &room_id,
                    serde_json::json!({ "suggested": false, "via": via }),
                )
                .await
                .map_err(map_matrix_error)?;
        }

        Ok(room_id)
    }

    async fn create_space(&self, name: &str) -> Result<String, EngineError> {
        let mut creation = CreationContent::new();
        creation.room_type = Some(RoomType::Space);

        let mut request = CreateRoomRequest::new();
        request.name = Some(name.to_owned());
        request.creation_content = Some(Raw::new(&creation).map_err(map_encode_error)?);

        let room = self
            .client
            .create_room(request)
            .await
            .map_err(map_matrix_error)?;
        Ok(room.room_id().to_string())
    }

    async fn send_message(
        &self,
        room_id: &str,
        txn_id: &str,
        body: &str,
    ) -> Result<String, EngineError> {
        let room = self.lookup_room(room_id)?;
        let response = room
            .send(RoomMessageEventContent::text_plain(body))
            .with_transaction_id(txn_id.into())
            .await
            .map_err(map_matrix_error)?;
        Ok(response.event_id.to_string())
    }

    async fn redact_event(
        &self,
        room_id: &str,
        event_id: &str,
        reason: Option<&str>,
    ) -> Result<(), EngineError> {
        let room = self.lookup_room(room_id)?;
        let event_id = parse_event_id(event_id)?;
        room.redact(&event_id, reason, None)
            .await
            .map_err(map_matrix_http_error)?;
        Ok(())
    }

    async fn cancel_local_send(&self, _room_id: &str, _txn_id: &str) -> Result<bool, EngineError> {
        // Sends are handed to the SDK immediately; by the time a delete can
        // be requested the echo is past its cancellable stage.
        Ok(false)
    }

    async fn find_event_by_txn(
        &self,
        room_id: &str,
        txn_id: &str,
    ) -> Result<Option<String>, EngineError> {
        let room = self.lookup_room(room_id)?;
        let messages = room
            .messages(backward_options(None, TXN_SEARCH_WINDOW)?)
            .await
            .map_err(map_matrix_error)?;

        for event in &messages.chunk {
            let raw = event.raw();
            let marker = raw
                .get_field::<Value>("unsigned")
                .ok()
                .flatten()
                .and_then(|unsigned| {
                    unsigned
                        .get("transaction_id")
                        .and_then(Value::as_str)
                        .map(ToOwned::to_owned)
                });
            if marker.as_deref() == Some(txn_id) {
                return Ok(event.event_id().map(|event_id| event_id.to_string()));
            }
        }
        Ok(None)
    }

    async fn paginate_history(
        &self,
        room_id: &str,
        _before: Option<&str>,
        limit: u16,
    ) -> Result<Vec<Message>, EngineError> {
        let room = self.lookup_room(room_id)?;
        let from_token = {
            let tokens = self
                .pagination_tokens
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            tokens.get(room_id).cloned().flatten()
        };

        let messages = room
            .messages(backward_options(from_token.as_deref(), limit)?)
            .await
            .map_err(map_matrix_error)?;

        {
            let mut tokens = self
                .pagination_tokens
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            tokens.insert(room_id.to_owned(), messages.end.clone());
        }

        let mut out = Vec::new();
        for event in &messages.chunk {
            if let Some(message) = message_from_timeline_event(room_id, event) {
                out.push(message);
            }
        }
        Ok(out)
    }

    async fn toggle_reaction(
        &self,
        room_id: &str,
        event_id: &str,
        emoji: &str,
    ) -> Result<(), EngineError> {
        let room = self.lookup_room(room_id)?;

        if let Some(own_reaction) = self.find_own_reaction(&room, event_id, emoji).await? {
            room.redact(&own_reaction, None, None)
                .await
                .map_err(map_matrix_http_error)?;
            return Ok(());
        }

        let target = parse_event_id(event_id)?;
        let content = ReactionEventContent::new(Annotation::new(target, emoji.to_owned()));
        room.send(content).await.map_err(map_matrix_error)?;
        Ok(())
    }

    async fn set_pinned(
        &self,
        room_id: &str,
        event_id: &str,
        pinned: bool,
    ) -> Result<(), EngineError> {
        let room = self.lookup_room(room_id)?;

        let mut current: Vec<String> = match room
            .get_state_event("m.room.pinned_events".into(), "")
            .await
            .map_err(map_matrix_error)?
        {
            Some(raw) => raw_state_field::<Value>(&raw, "content")
                .and_then(|content| {
                    content
                        .get("pinned")
                        .and_then(Value::as_array)
                        .map(|pinned| {
                            pinned
                                .iter()
                                .filter_map(Value::as_str)
                                .map(ToOwned::to_owned)
                                .collect()
                        })
                })
                .unwrap_or_default(),
            None => Vec::new(),
        };

        if pinned {
            if !current.iter().any(|id| id == event_id) {
                current.push(event_id.to_owned());
            }
        } else {
            current.retain(|id| id != event_id);
        }

        room.send_state_event_raw(
            "m.room.pinned_events",
            "",
            serde_json::json!({ "pinned": current }),
        )
        .await
        .map_err(map_matrix_error)?;
        Ok(())
    }

    async fn mark_read(&self, room_id: &str) -> Result<(), EngineError> {
        let room = self.lookup_room(room_id)?;
        let messages = room
            .messages(backward_options(None, 1)?)
            .await
            .map_err(map_matrix_error)?;

        let Some(latest) = messages
            .chunk
            .first()
            .and_then(|event| event.event_id().map(|event_id| event_id.to_owned()))
        else {
            return Ok(());
        };

        room.send_single_receipt(ReceiptType::Read, ReceiptThread::Unthreaded, latest)
            .await
            .map_err(map_matrix_error)?;
        Ok(())
    }

    async fn state_doc_get(
        &self,
        room_id: &str,
        kind: StateDocKind,
    ) -> Result<Option<Value>, EngineError> {
        let room = self.lookup_room(room_id)?;
        let raw = room
            .get_state_event(kind.event_type().into(), "")
            .await
            .map_err(map_matrix_error)?;

        Ok(raw.and_then(|raw| raw_state_field::<Value>(&raw, "content")))
    }

    async fn state_doc_put(
        &self,
        room_id: &str,
        kind: StateDocKind,
        content: Value,
    ) -> Result<(), EngineError> {
        let room = self.lookup_room(room_id)?;
        room.send_state_event_raw(kind.event_type(), "", content)
            .await
            .map_err(map_matrix_error)?;
        Ok(())
    }

    async fn membership_power_level(
        &self,
        room_id: &str,
        user_id: &str,
    ) -> Result<(Membership, Option<i64>), EngineError> {
        let room = self.lookup_room(room_id)?;
        let user_id = user_id
            .parse::<matrix_sdk::ruma::OwnedUserId>()
            .map_err(|err| {
                EngineError::new(
                    EngineErrorCategory::Config,
                    "invalid_user_id",
                    format!("invalid user id '{user_id}': {err}"),
                )
            })?;

        let Some(member) = room.get_member(&user_id).await.map_err(map_matrix_error)? else {
            return Ok((Membership::Leave, None));
        };

        Ok((
            map_membership(member.membership()),
            Some(member.power_level()),
        ))
    }

    async fn purge_room(&self, room_id: &str) -> Result<(), EngineError> {
        let access_token = self.client.access_token().ok_or_else(|| {
            EngineError::new(
                EngineErrorCategory::Auth,
                "missing_access_token",
                "cannot run admin purge without an access token",
            )
        })?;

        let admin = AdminPurgeClient::new(self.client.homeserver(), access_token);
        admin.run_purge(room_id).await
    }
}

fn install_forwarders(client: &Client, signals: broadcast::Sender<BackendSignal>) {
    let message_tx = signals.clone();
    client.add_event_handler(
        move |ev: OriginalSyncRoomMessageEvent, room: MatrixRoom| {
            let message_tx = message_tx.clone();
            async move {
                let room_id = room.room_id().to_string();
                let txn_id = ev
                    .unsigned
                    .transaction_id
                    .as_ref()
                    .map(|txn| txn.to_string());
                let message = Message {
                    id: ev.event_id.to_string(),
                    room_id: room_id.clone(),
                    author_id: ev.sender.to_string(),
                    body: ev.content.body().to_owned(),
                    timestamp_ms: u64::from(ev.origin_server_ts.get()),
                    reactions: Vec::new(),
                    attachments: Vec::new(),
                    reply_to_id: None,
                    thread_root_id: None,
                    pinned: false,
                    status: MessageStatus::Sent,
                };

                if let Some(txn) = &txn_id {
                    let _ = message_tx.send(BackendSignal::EchoResolved {
                        room_id: room_id.clone(),
                        txn_id: txn.clone(),
                        event_id: message.id.clone(),
                    });
                }
                let _ = message_tx.send(BackendSignal::Timeline {
                    room_id,
                    message,
                    txn_id,
                });
            }
        },
    );

    let name_tx = signals.clone();
    client.add_event_handler(
        move |_ev: OriginalSyncRoomNameEvent, room: MatrixRoom| {
            let name_tx = name_tx.clone();
            async move {
                let _ = name_tx.send(BackendSignal::RoomMetaChanged {
                    room_id: room.room_id().to_string(),
                });
            }
        },
    );

    let state_tx = signals;
    client.add_event_handler(move |ev: AnySyncStateEvent, room: MatrixRoom| {
        let state_tx = state_tx.clone();
        async move {
            let event_type = ev.event_type().to_string();
            if let Some(kind) = StateDocKind::from_event_type(&event_type) {
                let _ = state_tx.send(BackendSignal::StateDocChanged {
                    room_id: room.room_id().to_string(),
                    kind,
                });
            }
        }
    });
}

fn raw_state_field<T: serde::de::DeserializeOwned>(
    raw: &RawAnySyncOrStrippedState,
    field: &str,
) -> Option<T> {
    match raw {
        RawAnySyncOrStrippedState::Sync(event) => event.get_field::<T>(field).ok().flatten(),
        RawAnySyncOrStrippedState::Stripped(event) => event.get_field::<T>(field).ok().flatten(),
    }
}

fn backward_options(from_token: Option<&str>, limit: u16) -> Result<MessagesOptions, EngineError> {
    let mut options = MessagesOptions::backward();
    options.from = from_token.map(ToOwned::to_owned);
    options.limit = UInt::new(u64::from(limit)).ok_or_else(|| {
        EngineError::new(
            EngineErrorCategory::Config,
            "invalid_pagination_limit",
            format!("invalid pagination limit: {limit}"),
        )
    })?;
    Ok(options)
}

fn message_from_timeline_event(
    room_id: &str,
    event: &matrix_sdk::deserialized_responses::TimelineEvent,
) -> Option<Message> {
    let raw = event.raw();
    let event_type = raw.get_field::<String>("type").ok().flatten()?;
    if event_type != "m.room.message" {
        return None;
    }

    let sender = raw.get_field::<String>("sender").ok().flatten()?;
    let content = raw.get_field::<Value>("content").ok().flatten();
    let body = content
        .as_ref()
        .and_then(|content| content.get("body"))
        .and_then(Value::as_str)
        .unwrap_or("[non-text event]")
        .to_owned();
    let reply_to_id = content
        .as_ref()
        .and_then(|content| content.get("m.relates_to"))
        .and_then(|relation| relation.get("m.in_reply_to"))
        .and_then(|reply| reply.get("event_id"))
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);
    let timestamp_ms = raw
        .get_field::<MilliSecondsSinceUnixEpoch>("origin_server_ts")
        .ok()
        .flatten()
        .map(|ts| u64::from(ts.get()))
        .unwrap_or(0);

    Some(Message {
        id: event.event_id()?.to_string(),
        room_id: room_id.to_owned(),
        author_id: sender,
        body,
        timestamp_ms,
        reactions: Vec::new(),
        attachments: Vec::new(),
        reply_to_id,
        thread_root_id: None,
        pinned: false,
        status: MessageStatus::Sent,
    })
}

fn map_membership(state: &MembershipState) -> Membership {
    match state {
        MembershipState::Join => Membership::Join,
        MembershipState::Invite => Membership::Invite,
        MembershipState::Ban => Membership::Ban,
        _ => Membership::Leave,
    }
}

fn parse_room_id(value: &str) -> Result<OwnedRoomId, EngineError> {
    value.parse::<OwnedRoomId>().map_err(|err| {
        EngineError::new(
            EngineErrorCategory::Config,
            "invalid_room_id",
            format!("invalid room id '{value}': {err}"),
        )
    })
}

fn parse_event_id(value: &str) -> Result<OwnedEventId, EngineError> {
    value.parse::<OwnedEventId>().map_err(|err| {
        EngineError::new(
            EngineErrorCategory::Config,
            "invalid_event_id",
            format!("invalid event id '{value}': {err}"),
        )
    })
}

fn map_matrix_http_error(err: HttpError) -> EngineError {
    if let Some(client_err) = err.as_client_api_error() {
        let status = client_err.status_code.as_u16();
        let mut mapped = EngineError::new(
            classify_http_status(status),
            "matrix_http_error",
            client_err.to_string(),
        );

        if let Some(ErrorKind::LimitExceeded { retry_after }) = client_err.error_kind()
            && let Some(RetryAfter::Delay(delay)) = retry_after
        {
            mapped = mapped.with_retry_after(*delay);
        }

        mapped
    } else {
        EngineError::new(
            EngineErrorCategory::Network,
            "matrix_http_error",
            err.to_string(),
        )
    }
}

fn map_matrix_error(err: matrix_sdk::Error) -> EngineError {
    use matrix_sdk::Error;

    match err {
        Error::Http(http_err) => map_matrix_http_error(*http_err),
        Error::AuthenticationRequired => EngineError::new(
            EngineErrorCategory::Auth,
            "auth_required",
            err.to_string(),
        ),
        Error::StateStore(_) | Error::EventCacheStore(_) | Error::Io(_) => {
            EngineError::new(
                EngineErrorCategory::Storage,
                "storage_error",
                err.to_string(),
            )
        }
        Error::SerdeJson(_) => EngineError::new(
            EngineErrorCategory::Serialization,
            "serde_json_error",
            err.to_string(),
        ),
        _ => EngineError::new(
            EngineErrorCategory::Internal,
            "matrix_error",
            err.to_string(),
        ),
    }
}

fn map_client_build_error(err: ClientBuildError) -> EngineError {
    EngineError::new(
        EngineErrorCategory::Config,
        "client_build_error",
        err.to_string(),
    )
}

fn map_encode_error(err: serde_json::Error) -> EngineError {
    EngineError::new(
        EngineErrorCategory::Serialization,
        "encode_error",
        err.to_string(),
    )
}
