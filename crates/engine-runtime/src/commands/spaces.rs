use engine_core::error::EngineError;
use engine_core::settings;
use engine_core::types::{
    AuditAction, OverrideRule, PermissionAction, ScopedOverrides, ServerSettings,
};
use serde_json::Value;
use tracing::info;

use crate::events::{EngineEvent, Severity};
use crate::port::StateDocKind;
use crate::session::Session;

/// Scope of one permission override rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OverrideScope {
    Category(String),
    Room(String),
}

impl Session {
    /// Create a new space.
    pub async fn create_space(&self, name: &str) -> Result<String, EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("empty_name", "space name is empty"));
        }

        let space_id = match self.backend().create_space(name).await {
            Ok(space_id) => space_id,
            Err(err) => {
                self.events
                    .notify(Severity::Error, format!("space create failed: {}", err.message));
                return Err(err);
            }
        };
        info!(space_id = %space_id, "space created");
        self.refresh_discovery().await?;
        Ok(space_id)
    }

    /// Rename a space via its display-name-override document.
    pub async fn rename_space(&self, space_id: &str, name: &str) -> Result<(), EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("empty_name", "space name is empty"));
        }
        {
            let state = self.state.lock().await;
            if !state.spaces.iter().any(|space| space.id == space_id) {
                return Err(EngineError::validation("space_not_found", "unknown space"));
            }
        }
        self.require_capability(space_id, PermissionAction::ManageChannels)
            .await?;

        if let Ok(host) = self.state_host(space_id).await {
            if let Err(err) = self
                .backend()
                .state_doc_put(
                    &host,
                    StateDocKind::NameOverride,
                    serde_json::json!({ "name": name }),
                )
                .await
            {
                self.events
                    .notify(Severity::Error, format!("rename failed: {}", err.message));
                return Err(err);
            }
        }

        {
            let mut state = self.state.lock().await;
            if let Some(space) = state.spaces.iter_mut().find(|space| space.id == space_id) {
                space.name = name.to_owned();
            }
        }
        self.events.emit(EngineEvent::SnapshotUpdated);
        Ok(())
    }

    /// Save server settings from untrusted input.
    ///
    /// The input is normalized before anything is written, so the persisted
    /// document is always complete and clamped.
    pub async fn save_settings(
        &self,
        space_id: &str,
        raw: &Value,
    ) -> Result<ServerSettings, EngineError> {
        {
            let state = self.state.lock().await;
            if !state.spaces.iter().any(|space| space.id == space_id) {
                return Err(EngineError::validation("space_not_found", "unknown space"));
            }
        }
        self.require_capability(space_id, PermissionAction::ManageRoles)
            .await?;

        let normalized = settings::normalize(Some(raw));

        if let Ok(host) = self.state_host(space_id).await {
            let doc = serde_json::to_value(&normalized).map_err(|err| {
                EngineError::new(
                    engine_core::error::EngineErrorCategory::Serialization,
                    "settings_encode_error",
                    err.to_string(),
                )
            })?;
            if let Err(err) = self
                .backend()
                .state_doc_put(&host, StateDocKind::Settings, doc)
                .await
            {
                self.events
                    .notify(Severity::Error, format!("settings save failed: {}", err.message));
                return Err(err);
            }
        }

        {
            let mut state = self.state.lock().await;
            state.settings.insert(space_id.to_owned(), normalized.clone());
        }
        self.events.emit(EngineEvent::SnapshotUpdated);
        self.record_space_audit(space_id, AuditAction::SettingsChanged, space_id, None)
            .await;
        Ok(normalized)
    }

    /// Set or clear one permission override rule.
    ///
    /// `None` means "inherit" and removes the rule; empty scopes are
    /// compacted away so the persisted document stays minimal.
    pub async fn set_permission_rule(
        &self,
        space_id: &str,
        scope: OverrideScope,
        action: PermissionAction,
        rule: Option<OverrideRule>,
    ) -> Result<(), EngineError> {
        self.require_capability(space_id, PermissionAction::ManageRoles)
            .await?;

        let next: ScopedOverrides = {
            let state = self.state.lock().await;
            let mut overrides = state
                .overrides
                .get(space_id)
                .cloned()
                .unwrap_or_default();
            let (target, scope_id) = match &scope {
                OverrideScope::Category(id) => (&mut overrides.categories, id.clone()),
                OverrideScope::Room(id) => (&mut overrides.rooms, id.clone()),
            };
            let map = target.entry(scope_id.clone()).or_default();
            match rule {
                Some(rule) => {
                    map.insert(action, rule);
                }
                None => {
                    map.remove(&action);
                }
            }
            if map.is_empty() {
                target.remove(&scope_id);
            }
            overrides
        };

        if let Ok(host) = self.state_host(space_id).await {
            let doc = serde_json::to_value(&next).map_err(|err| {
                EngineError::new(
                    engine_core::error::EngineErrorCategory::Serialization,
                    "overrides_encode_error",
                    err.to_string(),
                )
            })?;
            if let Err(err) = self
                .backend()
                .state_doc_put(&host, StateDocKind::Overrides, doc)
                .await
            {
                self.events.notify(
                    Severity::Error,
                    format!("permission update failed: {}", err.message),
                );
                return Err(err);
            }
        }

        {
            let mut state = self.state.lock().await;
            state.overrides.insert(space_id.to_owned(), next);
        }
        self.events.emit(EngineEvent::SnapshotUpdated);
        let target = match scope {
            OverrideScope::Category(id) => format!("category:{id}"),
            OverrideScope::Room(id) => format!("room:{id}"),
        };
        self.record_space_audit(space_id, AuditAction::PermissionRuleChanged, target, None)
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use engine_core::types::{LOCAL_SPACE_ID, OverrideRule, PermissionAction};
    use engine_platform::{DocumentSink, InMemorySink};
    use serde_json::json;

    use crate::commands::OverrideScope;
    use crate::port::{BackendPort, GraphRoom, NullBackend};
    use crate::session::{Session, SessionConfig};

    async fn local_session() -> Arc<Session> {
        let sink: Arc<dyn DocumentSink> = Arc::new(InMemorySink::default());
        let session = Session::new(SessionConfig::default(), sink);
        let backend = Arc::new(NullBackend::new("@local:engine"));
        backend.seed_room(GraphRoom {
            id: "!seed:local".to_owned(),
            name: Some("general".to_owned()),
            ..GraphRoom::default()
        });
        let port: Arc<dyn BackendPort> = backend;
        session.bootstrap(port).await.expect("bootstrap should work");
        session
    }

    #[tokio::test]
    async fn save_settings_normalizes_malformed_input() {
        let session = local_session().await;
        let saved = session
            .save_settings(LOCAL_SPACE_ID, &json!({ "roles": { "adminLevel": "nope" } }))
            .await
            .expect("save should work");
        assert_eq!(saved.roles.admin_level, 100);

        let snapshot = session.snapshot().await;
        assert_eq!(
            snapshot
                .settings
                .get(LOCAL_SPACE_ID)
                .expect("settings present")
                .roles
                .admin_level,
            100
        );
    }

    #[tokio::test]
    async fn permission_rule_set_and_inherit_compaction() {
        let session = local_session().await;

        session
            .set_permission_rule(
                LOCAL_SPACE_ID,
                OverrideScope::Category("ops".to_owned()),
                PermissionAction::SendMessages,
                Some(OverrideRule::Deny),
            )
            .await
            .expect("set should work");

        let snapshot = session.snapshot().await;
        let overrides = snapshot
            .overrides
            .get(LOCAL_SPACE_ID)
            .expect("overrides present");
        assert_eq!(
            overrides.categories["ops"][&PermissionAction::SendMessages],
            OverrideRule::Deny
        );

        // Clearing back to inherit removes the whole scope.
        session
            .set_permission_rule(
                LOCAL_SPACE_ID,
                OverrideScope::Category("ops".to_owned()),
                PermissionAction::SendMessages,
                None,
            )
            .await
            .expect("clear should work");
        let snapshot = session.snapshot().await;
        assert!(
            !snapshot
                .overrides
                .get(LOCAL_SPACE_ID)
                .expect("overrides present")
                .categories
                .contains_key("ops")
        );
    }

    #[tokio::test]
    async fn create_space_appears_in_snapshot() {
        let session = local_session().await;
        let space_id = session.create_space("Gaming").await.expect("create");

        let snapshot = session.snapshot().await;
        assert!(snapshot.spaces.iter().any(|space| space.id == space_id));
    }

    #[tokio::test]
    async fn rename_space_updates_display_name() {
        let session = local_session().await;
        session
            .rename_space(LOCAL_SPACE_ID, "Headquarters")
            .await
            .expect("rename should work");

        let snapshot = session.snapshot().await;
        let space = snapshot
            .spaces
            .iter()
            .find(|space| space.id == LOCAL_SPACE_ID)
            .expect("space present");
        assert_eq!(space.name, "Headquarters");
    }

    #[tokio::test]
    async fn empty_space_name_is_rejected() {
        let session = local_session().await;
        let err = session
            .create_space("   ")
            .await
            .expect_err("empty name must fail");
        assert_eq!(err.code, "empty_name");
    }
}
