use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ChannelError;

/// Lifecycle of the push-notification connection.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and no reconnect pending.
    Closed,
    /// A transport open is in flight.
    Connecting,
    /// The transport is live and delivering frames.
    Open,
    /// Waiting out a backoff delay before the next open.
    Reconnecting,
}

/// One decoded push notification.
///
/// The `message` payload is opaque to the channel and handed to the
/// registered handler unchanged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationEvent {
    pub message: Value,
}

/// Observer-facing stream item emitted by the notification client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum ChannelEvent {
    /// Connection lifecycle transition.
    StateChanged {
        /// New connection state.
        state: ConnectionState,
    },
    /// A reconnect was scheduled after an unexpected close.
    ReconnectScheduled {
        /// Attempt number (1-based) the delay belongs to.
        attempt: u32,
        /// Delay before the next open, in milliseconds.
        delay_ms: u64,
    },
    /// A notification was delivered to the handler.
    Notification(NotificationEvent),
    /// A swallowed failure, reported for observers only.
    Error(ChannelError),
}

/// Backend question kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[default]
    MultipleChoice,
    TrueFalse,
    ShortAnswer,
    Essay,
}

impl QuestionType {
    /// Parse a free-form type label; unknown or blank labels fall back to
    /// `MultipleChoice`.
    pub fn parse_lenient(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "true_false" => Self::TrueFalse,
            "short_answer" => Self::ShortAnswer,
            "essay" => Self::Essay,
            _ => Self::MultipleChoice,
        }
    }

    /// Whether answers are picked from the option list.
    pub fn uses_options(self) -> bool {
        matches!(self, Self::MultipleChoice | Self::TrueFalse)
    }
}

/// Backend quiz kinds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum QuizType {
    Practice,
    Exam,
    Survey,
}

/// One answer option of a question.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OptionRecord {
    pub option_text: String,
    pub is_correct: bool,
    /// Display position, unique within the question.
    pub order: u32,
}

/// One question of a quiz.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionRecord {
    pub question_text: String,
    pub question_type: QuestionType,
    /// Always at least 1.
    pub points: u32,
    /// Display position, unique within the quiz.
    pub order: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default)]
    pub options: Vec<OptionRecord>,
}

/// Normalized quiz ready for remote validation and creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizRecord {
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// Backend course id.
    pub course: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quiz_type: Option<QuizType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_limit_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passing_score: Option<u32>,
    #[serde(default)]
    pub questions: Vec<QuestionRecord>,
}

/// Interchange format of an import payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ImportFormat {
    /// A JSON document shaped like one quiz.
    Structured,
    /// CSV with one `(question, option)` pair per row.
    Tabular,
}

/// Target format of a server-rendered export.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Json,
    Csv,
}

impl ExportFormat {
    /// Value sent as the `format` query parameter.
    pub fn as_query_value(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Csv => "csv",
        }
    }

    pub fn extension(self) -> &'static str {
        self.as_query_value()
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::Csv => "text/csv",
        }
    }
}

/// Result of the remote validation step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ValidationReport {
    pub valid: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Outcome shown to the user after an import.
///
/// Imports are all-or-nothing per file, so `skipped` stays at 0 and
/// `imported` is 1 on success.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImportSummary {
    pub quiz_id: u64,
    pub title: String,
    pub question_count: usize,
    pub imported: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

/// Downloadable file produced by an export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Quiz row returned by the backend listing endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizSummary {
    pub id: u64,
    pub title: String,
    #[serde(default)]
    pub course: Option<u64>,
    #[serde(default)]
    pub total_questions: Option<u32>,
    #[serde(default)]
    pub is_published: bool,
}

/// Course row used to pick the fallback course of an import.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CourseSummary {
    pub id: u64,
    pub title: String,
}

/// Quiz returned by the creation endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreatedQuiz {
    pub id: u64,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_question_types_fall_back_to_multiple_choice() {
        assert_eq!(QuestionType::parse_lenient("essay"), QuestionType::Essay);
        assert_eq!(
            QuestionType::parse_lenient(" TRUE_FALSE "),
            QuestionType::TrueFalse
        );
        assert_eq!(
            QuestionType::parse_lenient("matching"),
            QuestionType::MultipleChoice
        );
        assert_eq!(QuestionType::parse_lenient(""), QuestionType::MultipleChoice);
    }

    #[test]
    fn quiz_record_serializes_with_backend_field_names() {
        let quiz = QuizRecord {
            title: "Archivística I".into(),
            description: String::new(),
            course: 4,
            quiz_type: Some(QuizType::Exam),
            time_limit_minutes: None,
            max_attempts: None,
            passing_score: None,
            questions: vec![QuestionRecord {
                question_text: "¿Qué es un fondo?".into(),
                question_type: QuestionType::TrueFalse,
                points: 2,
                order: 1,
                explanation: None,
                options: vec![OptionRecord {
                    option_text: "Verdadero".into(),
                    is_correct: true,
                    order: 1,
                }],
            }],
        };

        let value = serde_json::to_value(&quiz).expect("quiz should serialize");
        assert_eq!(value["course"], 4);
        assert_eq!(value["quiz_type"], "exam");
        assert!(value.get("time_limit_minutes").is_none());
        assert_eq!(value["questions"][0]["question_type"], "true_false");
        assert_eq!(value["questions"][0]["options"][0]["is_correct"], true);
    }

    #[test]
    fn export_format_maps_to_extension_and_mime() {
        assert_eq!(ExportFormat::Json.extension(), "json");
        assert_eq!(ExportFormat::Csv.mime_type(), "text/csv");
        assert_eq!(ExportFormat::Csv.as_query_value(), "csv");
    }
}
