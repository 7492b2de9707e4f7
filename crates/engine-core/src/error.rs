use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Broad error category used for user-facing handling and retry behavior.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineErrorCategory {
    /// Rejected before any I/O: no-op moves, protected targets, bad input.
    Validation,
    /// The acting user lacks the required capability.
    Permission,
    /// Invalid configuration or unsupported engine state.
    Config,
    /// Authentication/authorization failure at the backend.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Rate-limited by the backend.
    RateLimited,
    /// Local persistence failure.
    Storage,
    /// Serialization/deserialization failure.
    Serialization,
    /// Administrative purge protocol failure.
    Purge,
    /// Internal engine bug or invariant break.
    Internal,
}

/// Stable error payload surfaced across the command/event boundary.
///
/// Façade operations never panic: every failure becomes one of these, and
/// the runtime turns it into a user notice or a logged continue.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct EngineError {
    /// High-level error category.
    pub category: EngineErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Optional retry hint in milliseconds.
    pub retry_after_ms: Option<u64>,
}

impl EngineError {
    /// Construct a new engine error.
    pub fn new(
        category: EngineErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Attach a retry hint to the error.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Pre-I/O rejection of an operation.
    pub fn validation(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(EngineErrorCategory::Validation, code, message)
    }

    /// The acting user lacks the capability for `action`.
    pub fn forbidden(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            EngineErrorCategory::Permission,
            "forbidden",
            format!("current user may not {action}"),
        )
    }

    /// Operation requires a connected backend that is not available.
    pub fn disconnected(action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            EngineErrorCategory::Config,
            "backend_disconnected",
            format!("cannot {action} without a connected backend"),
        )
    }

    /// Whether retrying this operation later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category,
            EngineErrorCategory::Network | EngineErrorCategory::RateLimited
        )
    }
}

/// Map HTTP status codes to engine error categories.
pub fn classify_http_status(status: u16) -> EngineErrorCategory {
    match status {
        401 | 403 => EngineErrorCategory::Auth,
        408 | 429 => EngineErrorCategory::RateLimited,
        400..=499 => EngineErrorCategory::Config,
        500..=599 => EngineErrorCategory::Network,
        _ => EngineErrorCategory::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(403), EngineErrorCategory::Auth);
        assert_eq!(classify_http_status(429), EngineErrorCategory::RateLimited);
        assert_eq!(classify_http_status(404), EngineErrorCategory::Config);
        assert_eq!(classify_http_status(502), EngineErrorCategory::Network);
        assert_eq!(classify_http_status(999), EngineErrorCategory::Internal);
    }

    #[test]
    fn keeps_forbidden_error_code_stable() {
        let err = EngineError::forbidden("delete channels");
        assert_eq!(err.code, "forbidden");
        assert_eq!(err.category, EngineErrorCategory::Permission);
        assert!(err.message.contains("delete channels"));
    }

    #[test]
    fn persists_retry_after_in_millis() {
        let err = EngineError::new(EngineErrorCategory::RateLimited, "rate_limited", "wait")
            .with_retry_after(Duration::from_secs(2));
        assert_eq!(err.retry_after_ms, Some(2000));
    }

    #[test]
    fn only_network_class_errors_are_transient() {
        assert!(EngineError::new(EngineErrorCategory::Network, "n", "n").is_transient());
        assert!(EngineError::new(EngineErrorCategory::RateLimited, "r", "r").is_transient());
        assert!(!EngineError::validation("no_op", "nothing to do").is_transient());
        assert!(!EngineError::forbidden("purge").is_transient());
    }
}
