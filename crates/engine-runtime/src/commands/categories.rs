use engine_core::error::EngineError;
use engine_core::layout::{self, LayoutError};
use engine_core::types::{AuditAction, PermissionAction, SpaceLayout};
use tracing::debug;

use crate::events::{EngineEvent, Severity};
use crate::port::StateDocKind;
use crate::session::Session;

impl Session {
    /// Create a category in a space.
    pub async fn create_category(&self, space_id: &str, name: &str) -> Result<(), EngineError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(EngineError::validation("empty_name", "category name is empty"));
        }
        self.require_capability(space_id, PermissionAction::ManageChannels)
            .await?;

        let current = self.space_layout(space_id).await?;
        let next = layout::create_category(&current, name).map_err(|err| self.layout_error(err))?;
        self.commit_layout(space_id, next).await
    }

    /// Rename a category.
    pub async fn rename_category(
        &self,
        space_id: &str,
        category_id: &str,
        new_name: &str,
    ) -> Result<(), EngineError> {
        self.require_capability(space_id, PermissionAction::ManageChannels)
            .await?;

        let current = self.space_layout(space_id).await?;
        let next = layout::rename_category(&current, category_id, new_name)
            .map_err(|err| self.layout_error(err))?;
        self.commit_layout(space_id, next).await
    }

    /// Delete a non-default category, reassigning its rooms to the default.
    pub async fn delete_category(
        &self,
        space_id: &str,
        category_id: &str,
    ) -> Result<(), EngineError> {
        self.require_capability(space_id, PermissionAction::ManageChannels)
            .await?;

        let current = self.space_layout(space_id).await?;
        let next = layout::delete_category(&current, category_id)
            .map_err(|err| self.layout_error(err))?;
        self.commit_layout(space_id, next).await?;
        self.record_space_audit(space_id, AuditAction::CategoryDeleted, category_id, None)
            .await;
        Ok(())
    }

    /// Move a category within the category list.
    pub async fn move_category(
        &self,
        space_id: &str,
        category_id: &str,
        new_index: usize,
    ) -> Result<(), EngineError> {
        self.require_capability(space_id, PermissionAction::ManageChannels)
            .await?;

        let current = self.space_layout(space_id).await?;
        let next = layout::move_category(&current, category_id, new_index)
            .map_err(|err| self.layout_error(err))?;
        self.commit_layout(space_id, next).await
    }

    /// Move a room into another category, optionally at a position.
    pub async fn move_room_to_category(
        &self,
        space_id: &str,
        room_id: &str,
        category_id: &str,
        position: Option<usize>,
    ) -> Result<(), EngineError> {
        self.require_capability(space_id, PermissionAction::ManageChannels)
            .await?;

        let current = self.space_layout(space_id).await?;
        let next = layout::move_room_to_category(&current, room_id, category_id, position)
            .map_err(|err| self.layout_error(err))?;
        self.commit_layout(space_id, next).await
    }

    /// Reorder a room within its current category.
    pub async fn reorder_room(
        &self,
        space_id: &str,
        room_id: &str,
        new_index: usize,
    ) -> Result<(), EngineError> {
        self.require_capability(space_id, PermissionAction::ManageChannels)
            .await?;

        let current = self.space_layout(space_id).await?;
        let next = layout::reorder_room(&current, room_id, new_index)
            .map_err(|err| self.layout_error(err))?;
        self.commit_layout(space_id, next).await
    }

    pub(crate) async fn space_layout(&self, space_id: &str) -> Result<SpaceLayout, EngineError> {
        let state = self.state.lock().await;
        state
            .layouts
            .get(space_id)
            .cloned()
            .ok_or_else(|| EngineError::validation("space_not_found", "unknown space"))
    }

    /// Commit a new layout: remote write first when connected, then the
    /// local replace plus projection re-derivation.
    ///
    /// A failed remote write aborts without touching local state.
    pub(crate) async fn commit_layout(
        &self,
        space_id: &str,
        next: SpaceLayout,
    ) -> Result<(), EngineError> {
        // Write through the backend port first; the in-memory backend keeps
        // the document in memory, the federated one writes real room state.
        // A space with no state host yet has nowhere to persist.
        if let Ok(host) = self.state_host(space_id).await {
            let doc = serde_json::to_value(&next).map_err(|err| {
                EngineError::new(
                    engine_core::error::EngineErrorCategory::Serialization,
                    "layout_encode_error",
                    err.to_string(),
                )
            })?;
            if let Err(err) = self
                .backend()
                .state_doc_put(&host, StateDocKind::Layout, doc)
                .await
            {
                self.events
                    .notify(Severity::Error, format!("layout update failed: {}", err.message));
                return Err(err);
            }
        }

        {
            let mut state = self.state.lock().await;
            // Re-read after the await: the space may have vanished.
            if !state.spaces.iter().any(|space| space.id == space_id) {
                return Err(EngineError::validation("space_not_found", "unknown space"));
            }
            state.layouts.insert(space_id.to_owned(), next);
            state.reproject_space(space_id);
        }
        debug!(space_id = %space_id, "layout committed");
        self.events.emit(EngineEvent::SnapshotUpdated);
        Ok(())
    }

    fn layout_error(&self, err: LayoutError) -> EngineError {
        let code = match &err {
            LayoutError::DefaultCategoryProtected(_) => {
                self.events
                    .notify(Severity::Info, "the default category cannot be changed");
                "default_category_protected"
            }
            LayoutError::CategoryNotFound(_) => "category_not_found",
            LayoutError::CategoryExists(_) => "category_exists",
            LayoutError::RoomNotPlaced(_) => "room_not_placed",
            LayoutError::NoOp => "no_op",
        };
        EngineError::validation(code, err.to_string())
    }
}
