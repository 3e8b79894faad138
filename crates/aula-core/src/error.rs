use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ConnectionState;

/// Broad error category used for user-facing handling.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorCategory {
    /// A required input was missing before any remote call (token, course, selection).
    Precondition,
    /// The backend rejected the payload; messages are in `details`.
    Validation,
    /// Authentication/authorization failure.
    Auth,
    /// Transient network or transport failure.
    Network,
    /// Unparseable file or response body.
    Serialization,
    /// Credential store or local file failure.
    Storage,
    /// Invalid configuration or request shape.
    Config,
    /// Internal bug or invariant break.
    Internal,
}

/// Stable error payload shared across crate boundaries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct AulaError {
    /// High-level error category.
    pub category: ErrorCategory,
    /// Stable machine-readable error code.
    pub code: String,
    /// Human-readable message.
    pub message: String,
    /// Per-problem messages, surfaced verbatim (validation errors).
    pub details: Vec<String>,
}

impl AulaError {
    /// Construct a new error without details.
    pub fn new(category: ErrorCategory, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            details: Vec::new(),
        }
    }

    /// Attach per-problem messages.
    pub fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }

    /// Missing input caught before any network call.
    pub fn precondition(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorCategory::Precondition, code, message)
    }

    /// Remote validation rejected the payload.
    pub fn validation(errors: Vec<String>) -> Self {
        let message = format!("quiz failed validation with {} problem(s)", errors.len());
        Self::new(ErrorCategory::Validation, "validation_failed", message).with_details(errors)
    }

    /// Build a standard invalid-state-transition error.
    pub fn invalid_state(current: ConnectionState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while connection is in state {current:?}"),
        )
    }
}

/// Failures of the notification channel.
///
/// None of these reach `connect` callers; they are logged and broadcast to
/// observers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("no access token available for the notification channel")]
    MissingToken,
    #[error("invalid notification endpoint: {0}")]
    InvalidEndpoint(String),
    #[error("notification transport failure: {0}")]
    Transport(String),
    #[error("undecodable notification frame: {0}")]
    Decode(String),
    #[error("gave up reconnecting after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },
}

/// Map HTTP status codes to error categories.
pub fn classify_http_status(status: u16) -> ErrorCategory {
    match status {
        401 | 403 => ErrorCategory::Auth,
        400 | 422 => ErrorCategory::Validation,
        402..=499 => ErrorCategory::Config,
        500..=599 => ErrorCategory::Network,
        _ => ErrorCategory::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_http_status_categories() {
        assert_eq!(classify_http_status(401), ErrorCategory::Auth);
        assert_eq!(classify_http_status(400), ErrorCategory::Validation);
        assert_eq!(classify_http_status(404), ErrorCategory::Config);
        assert_eq!(classify_http_status(503), ErrorCategory::Network);
        assert_eq!(classify_http_status(700), ErrorCategory::Internal);
    }

    #[test]
    fn keeps_invalid_state_error_code_stable() {
        let err = AulaError::invalid_state(ConnectionState::Closed, "on_open");
        assert_eq!(err.code, "invalid_state_transition");
        assert_eq!(err.category, ErrorCategory::Internal);
    }

    #[test]
    fn validation_error_carries_messages_verbatim() {
        let err = AulaError::validation(vec![
            "Question 1: needs at least 2 options".into(),
            "Question 2: needs a correct option".into(),
        ]);
        assert_eq!(err.category, ErrorCategory::Validation);
        assert_eq!(err.details.len(), 2);
        assert_eq!(err.details[0], "Question 1: needs at least 2 options");
        assert!(err.message.contains("2 problem"));
    }
}
