//! Administrative room purge over the homeserver admin HTTP surface.
//!
//! Room deletion is an irreversible purge, not a leave: issue the
//! delete-with-purge request, poll the delete-status endpoint (newer then
//! older API shapes) until a terminal status, then independently verify the
//! room is gone from the admin listing. The whole protocol is bounded by a
//! fixed polling interval and an overall timeout.

use std::time::Duration;

use engine_core::error::{EngineError, EngineErrorCategory, classify_http_status};
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

/// Fixed polling interval between delete-status requests.
pub const PURGE_POLL_INTERVAL: Duration = Duration::from_millis(1_500);

/// Bound on the whole purge protocol, polling included.
pub const PURGE_OVERALL_TIMEOUT: Duration = Duration::from_secs(90);

/// Terminal/ongoing status of a delete task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeStatus {
    InProgress,
    Complete,
    Failed,
}

/// Parse a delete-status payload from either API shape.
///
/// The newer shape reports `{"status": "shutting_down" | "purging" |
/// "complete" | "failed"}`; the older purge-history shape reports
/// `{"status": "active" | "complete" | "failed"}`.
pub fn parse_purge_status(payload: &Value) -> PurgeStatus {
    match payload.get("status").and_then(Value::as_str) {
        Some("complete") => PurgeStatus::Complete,
        Some("failed") => PurgeStatus::Failed,
        Some(_) | None => PurgeStatus::InProgress,
    }
}

/// Bearer-token client for the admin purge surface.
pub struct AdminPurgeClient {
    http: reqwest::Client,
    base_url: Url,
    access_token: String,
    poll_interval: Duration,
    overall_timeout: Duration,
}

impl AdminPurgeClient {
    pub fn new(base_url: Url, access_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url,
            access_token: access_token.into(),
            poll_interval: PURGE_POLL_INTERVAL,
            overall_timeout: PURGE_OVERALL_TIMEOUT,
        }
    }

    /// Override the polling bounds. Tests use short intervals.
    pub fn with_bounds(mut self, poll_interval: Duration, overall_timeout: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.overall_timeout = overall_timeout;
        self
    }

    /// Drive the full purge protocol for one room.
    pub async fn run_purge(&self, room_id: &str) -> Result<(), EngineError> {
        let deadline = tokio::time::Instant::now() + self.overall_timeout;
        let delete_id = self.request_delete(room_id).await?;

        if let Some(delete_id) = delete_id {
            loop {
                if tokio::time::Instant::now() >= deadline {
                    return Err(purge_error("purge_timeout", "purge did not complete in time"));
                }
                match self.poll_status(room_id, &delete_id).await? {
                    PurgeStatus::Complete => break,
                    PurgeStatus::Failed => {
                        return Err(purge_error("purge_failed", "homeserver reported purge failure"));
                    }
                    PurgeStatus::InProgress => {
                        tokio::time::sleep(self.poll_interval).await;
                    }
                }
            }
        }

        // Independent verification: the admin listing must no longer know
        // the room object, regardless of what the status endpoint said.
        if self.room_exists(room_id).await? {
            return Err(purge_error(
                "purge_incomplete",
                "room still present after purge completed",
            ));
        }
        debug!(room_id = %room_id, "admin purge verified complete");
        Ok(())
    }

    /// Issue the delete-with-purge request.
    ///
    /// The v2 shape returns a `delete_id` to poll; the v1 fallback completes
    /// synchronously and returns `None`.
    async fn request_delete(&self, room_id: &str) -> Result<Option<String>, EngineError> {
        let body = serde_json::json!({ "block": false, "purge": true });

        let v2 = self.endpoint(&format!("_synapse/admin/v2/rooms/{room_id}"))?;
        match self.send_json(self.http.delete(v2).json(&body)).await {
            Ok(payload) => {
                return Ok(payload
                    .get("delete_id")
                    .and_then(Value::as_str)
                    .map(ToOwned::to_owned));
            }
            Err(err) if is_unrecognized_endpoint(&err) => {
                warn!("v2 delete endpoint unavailable; falling back to v1");
            }
            Err(err) => return Err(err),
        }

        let v1 = self.endpoint(&format!("_synapse/admin/v1/rooms/{room_id}/delete"))?;
        self.send_json(self.http.post(v1).json(&body)).await?;
        Ok(None)
    }

    /// Poll the delete status, trying the newer shape before the older one.
    async fn poll_status(&self, room_id: &str, delete_id: &str) -> Result<PurgeStatus, EngineError> {
        let v2 = self.endpoint(&format!("_synapse/admin/v2/rooms/delete_status/{delete_id}"))?;
        match self.send_json(self.http.get(v2)).await {
            Ok(payload) => return Ok(parse_purge_status(&payload)),
            Err(err) if is_unrecognized_endpoint(&err) => {
                debug!(room_id = %room_id, "v2 status endpoint unavailable; trying v1");
            }
            Err(err) => return Err(err),
        }

        let v1 = self.endpoint(&format!("_synapse/admin/v1/purge_history_status/{delete_id}"))?;
        let payload = self.send_json(self.http.get(v1)).await?;
        Ok(parse_purge_status(&payload))
    }

    /// Whether the admin listing still knows the room object.
    async fn room_exists(&self, room_id: &str) -> Result<bool, EngineError> {
        let url = self.endpoint(&format!("_synapse/admin/v1/rooms/{room_id}"))?;
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(map_transport_error)?;

        match response.status().as_u16() {
            404 => Ok(false),
            200 => Ok(true),
            status => Err(EngineError::new(
                classify_http_status(status),
                "admin_room_lookup_failed",
                format!("room existence check returned {status}"),
            )),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, EngineError> {
        self.base_url.join(path).map_err(|err| {
            EngineError::new(
                EngineErrorCategory::Config,
                "invalid_admin_url",
                err.to_string(),
            )
        })
    }

    async fn send_json(&self, request: reqwest::RequestBuilder) -> Result<Value, EngineError> {
        let response = request
            .bearer_auth(&self.access_token)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            let body = response.text().await.unwrap_or_default();
            return Err(EngineError::new(
                classify_http_status(status),
                "admin_request_failed",
                format!("admin request returned {status}: {body}"),
            ));
        }
        response
            .json::<Value>()
            .await
            .map_err(|err| {
                EngineError::new(
                    EngineErrorCategory::Serialization,
                    "admin_response_decode_error",
                    err.to_string(),
                )
            })
    }
}

/// Older homeservers answer unknown admin endpoints with 404/400.
fn is_unrecognized_endpoint(err: &EngineError) -> bool {
    err.code == "admin_request_failed" && err.category == EngineErrorCategory::Config
}

fn map_transport_error(err: reqwest::Error) -> EngineError {
    EngineError::new(
        EngineErrorCategory::Network,
        "admin_transport_error",
        err.to_string(),
    )
}

fn purge_error(code: &str, message: &str) -> EngineError {
    EngineError::new(EngineErrorCategory::Purge, code, message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_terminal_and_ongoing_statuses() {
        assert_eq!(
            parse_purge_status(&json!({"status": "complete"})),
            PurgeStatus::Complete
        );
        assert_eq!(
            parse_purge_status(&json!({"status": "failed"})),
            PurgeStatus::Failed
        );
        assert_eq!(
            parse_purge_status(&json!({"status": "purging"})),
            PurgeStatus::InProgress
        );
        assert_eq!(
            parse_purge_status(&json!({"status": "shutting_down"})),
            PurgeStatus::InProgress
        );
        assert_eq!(
            parse_purge_status(&json!({"status": "active"})),
            PurgeStatus::InProgress
        );
        assert_eq!(parse_purge_status(&json!({})), PurgeStatus::InProgress);
    }

    #[test]
    fn unrecognized_endpoint_detection_is_limited_to_client_errors() {
        let not_found = EngineError::new(
            EngineErrorCategory::Config,
            "admin_request_failed",
            "admin request returned 404: unknown endpoint",
        );
        assert!(is_unrecognized_endpoint(&not_found));

        let server_error = EngineError::new(
            EngineErrorCategory::Network,
            "admin_request_failed",
            "admin request returned 502",
        );
        assert!(!is_unrecognized_endpoint(&server_error));

        let transport = EngineError::new(
            EngineErrorCategory::Network,
            "admin_transport_error",
            "connection refused",
        );
        assert!(!is_unrecognized_endpoint(&transport));
    }

    #[test]
    fn purge_bounds_default_to_spec_values() {
        assert_eq!(PURGE_POLL_INTERVAL, Duration::from_millis(1_500));
        assert_eq!(PURGE_OVERALL_TIMEOUT, Duration::from_secs(90));
    }

    #[test]
    fn endpoint_joins_relative_admin_paths() {
        let client = AdminPurgeClient::new(
            Url::parse("https://synapse.example.org/").expect("base url"),
            "token",
        );
        let url = client
            .endpoint("_synapse/admin/v2/rooms/!r:example.org")
            .expect("join should work");
        assert_eq!(
            url.as_str(),
            "https://synapse.example.org/_synapse/admin/v2/rooms/!r:example.org"
        );
    }
}
