//! Core contract shared by the Aula Virtual client runtime and its front ends.
//!
//! This crate defines the notification connection lifecycle, retry policy,
//! observer channel, error taxonomy, and the quiz model with its import
//! parsers, validator and export naming. It performs no I/O.

/// Observer fan-out for notification channel events.
pub mod channel;
/// Stable error types and HTTP classification helpers.
pub mod error;
/// Response-shape and frame normalization helpers.
pub mod normalization;
/// Export selection and file naming.
pub mod quiz_export;
/// Structured and tabular quiz parsers.
pub mod quiz_import;
/// Backoff policy used by the reconnect loop.
pub mod retry;
/// Notification connection state machine.
pub mod state_machine;
/// Channel and quiz domain types.
pub mod types;
/// Offline quiz record checks.
pub mod validation;

pub use channel::{ChannelObservers, EventStream};
pub use error::{AulaError, ChannelError, ErrorCategory, classify_http_status};
pub use normalization::{
    api_error_message, collect_validation_errors, decode_notification_frame,
    normalize_list_response,
};
pub use quiz_export::{ExportRequest, build_artifact, export_file_name};
pub use quiz_import::{ImportRequest, detect_format, parse_quiz};
pub use retry::{ReconnectBackoff, RetryPolicy};
pub use state_machine::{CloseOutcome, ConnectionStateMachine};
pub use types::{
    ChannelEvent, ConnectionState, CourseSummary, CreatedQuiz, ExportArtifact, ExportFormat,
    ImportFormat, ImportSummary, NotificationEvent, OptionRecord, QuestionRecord, QuestionType,
    QuizRecord, QuizSummary, QuizType, ValidationReport,
};
pub use validation::validate_quiz_record;
