use chrono::NaiveDate;

use crate::{
    error::AulaError,
    types::{ExportArtifact, ExportFormat},
};

const EXPORT_FILE_PREFIX: &str = "quizzes_export";

/// Selected quizzes and target format of one export.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportRequest {
    quiz_ids: Vec<u64>,
    format: ExportFormat,
}

impl ExportRequest {
    /// Build a request; repeated ids collapse into their first occurrence.
    pub fn new(quiz_ids: impl IntoIterator<Item = u64>, format: ExportFormat) -> Self {
        let mut unique = Vec::new();
        for id in quiz_ids {
            if !unique.contains(&id) {
                unique.push(id);
            }
        }
        Self {
            quiz_ids: unique,
            format,
        }
    }

    pub fn quiz_ids(&self) -> &[u64] {
        &self.quiz_ids
    }

    pub fn format(&self) -> ExportFormat {
        self.format
    }

    /// Reject an empty selection before anything is sent to the server.
    pub fn ensure_selection(&self) -> Result<(), AulaError> {
        if self.quiz_ids.is_empty() {
            return Err(AulaError::precondition(
                "empty_selection",
                "select at least one quiz to export",
            ));
        }
        Ok(())
    }

    /// Comma-separated ids for the `ids` query parameter.
    pub fn ids_query_value(&self) -> String {
        self.quiz_ids
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// `quizzes_export_<YYYY-MM-DD>.<ext>`
pub fn export_file_name(format: ExportFormat, date: NaiveDate) -> String {
    format!(
        "{EXPORT_FILE_PREFIX}_{}.{}",
        date.format("%Y-%m-%d"),
        format.extension()
    )
}

/// Wrap server-rendered bytes as a downloadable file.
pub fn build_artifact(format: ExportFormat, date: NaiveDate, bytes: Vec<u8>) -> ExportArtifact {
    ExportArtifact {
        file_name: export_file_name(format, date),
        mime_type: format.mime_type(),
        bytes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCategory;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 9).expect("valid date")
    }

    #[test]
    fn empty_selection_is_rejected() {
        let request = ExportRequest::new(Vec::new(), ExportFormat::Json);
        let err = request
            .ensure_selection()
            .expect_err("empty selection must be rejected");
        assert_eq!(err.code, "empty_selection");
        assert_eq!(err.category, ErrorCategory::Precondition);
    }

    #[test]
    fn duplicate_ids_collapse_in_selection_order() {
        let request = ExportRequest::new([3, 1, 3, 2, 1], ExportFormat::Csv);
        assert_eq!(request.quiz_ids(), &[3, 1, 2]);
        assert_eq!(request.ids_query_value(), "3,1,2");
        assert!(request.ensure_selection().is_ok());
    }

    #[test]
    fn file_name_carries_date_and_extension() {
        assert_eq!(
            export_file_name(ExportFormat::Json, date()),
            "quizzes_export_2026-03-09.json"
        );
        assert_eq!(
            export_file_name(ExportFormat::Csv, date()),
            "quizzes_export_2026-03-09.csv"
        );
    }

    #[test]
    fn artifact_uses_format_mime_type() {
        let artifact = build_artifact(ExportFormat::Csv, date(), b"id,title\n".to_vec());
        assert_eq!(artifact.mime_type, "text/csv");
        assert_eq!(artifact.file_name, "quizzes_export_2026-03-09.csv");
        assert_eq!(artifact.bytes, b"id,title\n");
    }
}
