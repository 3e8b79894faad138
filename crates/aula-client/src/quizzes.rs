use async_trait::async_trait;
use aula_core::{
    AulaError, CourseSummary, CreatedQuiz, ErrorCategory, ExportArtifact, ExportRequest,
    ImportRequest, ImportSummary, QuizRecord, QuizSummary, ValidationReport, build_artifact,
    parse_quiz,
};
use chrono::NaiveDate;
use tracing::{debug, info, warn};

use crate::rest::RestClient;

const QUIZZES_PATH: &str = "quizzes/";
const COURSES_PATH: &str = "courses/";
const VALIDATE_IMPORT_PATH: &str = "quizzes/validate_import/";
const IMPORT_PATH: &str = "quizzes/import/";
const EXPORT_PATH: &str = "quizzes/export/";

/// Remote quiz operations used by the import/export pipeline.
#[async_trait]
pub trait QuizApi: Send + Sync {
    async fn validate_quiz(&self, quiz: &QuizRecord) -> Result<ValidationReport, AulaError>;

    async fn create_quiz(&self, quiz: &QuizRecord) -> Result<CreatedQuiz, AulaError>;

    /// Server-rendered export of the selected quizzes.
    async fn export_quizzes(&self, request: &ExportRequest) -> Result<Vec<u8>, AulaError>;

    async fn list_quizzes(&self, course: Option<u64>) -> Result<Vec<QuizSummary>, AulaError>;

    async fn list_courses(&self) -> Result<Vec<CourseSummary>, AulaError>;
}

#[derive(Clone)]
pub struct RestQuizApi {
    rest: RestClient,
}

impl RestQuizApi {
    pub fn new(rest: RestClient) -> Self {
        Self { rest }
    }
}

#[async_trait]
impl QuizApi for RestQuizApi {
    async fn validate_quiz(&self, quiz: &QuizRecord) -> Result<ValidationReport, AulaError> {
        match self.rest.post_json(VALIDATE_IMPORT_PATH, quiz).await {
            Ok(report) => Ok(report),
            // Some deployments answer an invalid payload with 400 instead of
            // `{"valid": false}`.
            Err(err) if err.category == ErrorCategory::Validation => {
                let errors = if err.details.is_empty() {
                    vec![err.message]
                } else {
                    err.details
                };
                Ok(ValidationReport {
                    valid: false,
                    errors,
                })
            }
            Err(err) => Err(err),
        }
    }

    async fn create_quiz(&self, quiz: &QuizRecord) -> Result<CreatedQuiz, AulaError> {
        self.rest.post_json(IMPORT_PATH, quiz).await
    }

    async fn export_quizzes(&self, request: &ExportRequest) -> Result<Vec<u8>, AulaError> {
        let query = [
            ("ids", request.ids_query_value()),
            ("format", request.format().as_query_value().to_owned()),
        ];
        self.rest.get_bytes(EXPORT_PATH, &query).await
    }

    async fn list_quizzes(&self, course: Option<u64>) -> Result<Vec<QuizSummary>, AulaError> {
        let query: Vec<(&str, String)> = course
            .map(|course| vec![("course", course.to_string())])
            .unwrap_or_default();
        self.rest.get_list(QUIZZES_PATH, &query).await
    }

    async fn list_courses(&self) -> Result<Vec<CourseSummary>, AulaError> {
        self.rest.get_list(COURSES_PATH, &[]).await
    }
}

/// Import and export workflows on top of a [`QuizApi`].
pub struct QuizTransfer<A> {
    api: A,
}

impl<A: QuizApi> QuizTransfer<A> {
    pub fn new(api: A) -> Self {
        Self { api }
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    /// Parse, validate remotely, then create exactly one quiz.
    ///
    /// A rejected payload aborts with the server's messages in
    /// [`AulaError::details`] and nothing is created.
    pub async fn import(&self, request: &ImportRequest) -> Result<ImportSummary, AulaError> {
        let quiz = parse_quiz(request)?;
        debug!(
            file = %request.file_name,
            questions = quiz.questions.len(),
            course = quiz.course,
            "parsed quiz import"
        );

        let report = self.api.validate_quiz(&quiz).await?;
        if !report.valid {
            let errors = if report.errors.is_empty() {
                vec!["the server rejected the quiz without details".to_owned()]
            } else {
                report.errors
            };
            warn!(file = %request.file_name, problems = errors.len(), "quiz import rejected");
            return Err(AulaError::validation(errors));
        }

        let created = self.api.create_quiz(&quiz).await?;
        info!(quiz_id = created.id, title = %created.title, "quiz imported");
        Ok(ImportSummary {
            quiz_id: created.id,
            title: created.title,
            question_count: quiz.questions.len(),
            imported: 1,
            skipped: 0,
            errors: Vec::new(),
        })
    }

    /// Fetch the server-rendered export and name it for `date`.
    pub async fn export(
        &self,
        request: &ExportRequest,
        date: NaiveDate,
    ) -> Result<ExportArtifact, AulaError> {
        request.ensure_selection()?;
        let bytes = self.api.export_quizzes(request).await?;
        let artifact = build_artifact(request.format(), date, bytes);
        info!(
            file = %artifact.file_name,
            quizzes = request.quiz_ids().len(),
            bytes = artifact.bytes.len(),
            "quizzes exported"
        );
        Ok(artifact)
    }
}
