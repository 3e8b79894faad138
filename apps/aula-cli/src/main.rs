mod config;
mod logging;

use std::{
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
};

use aula_client::{
    ConnectOutcome, NotificationClient, QuizApi, QuizTransfer, RestClient, RestQuizApi,
    save_artifact,
};
use aula_core::{
    AulaError, ChannelError, ChannelEvent, ErrorCategory, ExportFormat, ExportRequest,
    ImportFormat, ImportRequest, detect_format, parse_quiz, validate_quiz_record,
};
#[cfg(feature = "os-keyring")]
use aula_platform::OsKeyringCredentialStore;
#[cfg(not(feature = "os-keyring"))]
use aula_platform::FileCredentialStore;
use aula_platform::{CredentialStoreError, SessionTokens, StaticToken, TokenProvider};
use clap::{Parser, Subcommand, ValueEnum};
use config::CliConfig;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

const CREDENTIAL_SERVICE: &str = "dev.aula.virtual";
/// Course ids are resolved by the server; offline checks only need a
/// placeholder when the file names none.
const OFFLINE_CHECK_COURSE: u64 = 0;

#[cfg(feature = "os-keyring")]
type CredentialBackend = OsKeyringCredentialStore;
#[cfg(not(feature = "os-keyring"))]
type CredentialBackend = FileCredentialStore;

#[derive(Parser, Debug)]
#[command(author, version, about = "Aula Virtual notifications and quiz transfer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Stream push notifications as JSON lines until interrupted
    Listen,
    /// Validate a quiz file on the server and create it
    Import {
        file: PathBuf,
        /// Course used when the file names none
        #[arg(long)]
        course: Option<u64>,
        /// Parser to use; guessed from the extension when omitted
        #[arg(long, value_enum)]
        format: Option<ImportFormatArg>,
    },
    /// Check a quiz file offline without contacting the server
    Check {
        file: PathBuf,
        #[arg(long, value_enum)]
        format: Option<ImportFormatArg>,
    },
    /// Download selected quizzes
    Export {
        /// Comma-separated quiz ids
        #[arg(long, value_delimiter = ',', num_args = 1..)]
        ids: Vec<u64>,
        #[arg(long, value_enum, default_value_t = ExportFormatArg::Json)]
        format: ExportFormatArg,
        /// Directory the export is written to
        #[arg(long, default_value = ".")]
        out: PathBuf,
    },
    /// List quizzes, optionally for one course
    Quizzes {
        #[arg(long)]
        course: Option<u64>,
    },
    /// List courses
    Courses,
    /// Manage the stored session tokens
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand, Debug)]
enum TokenAction {
    /// Store an access token and optional refresh token
    Set {
        access: String,
        #[arg(long)]
        refresh: Option<String>,
    },
    /// Forget the stored tokens
    Clear,
    /// Show whether tokens are available
    Show,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ImportFormatArg {
    Json,
    Csv,
}

impl From<ImportFormatArg> for ImportFormat {
    fn from(value: ImportFormatArg) -> Self {
        match value {
            ImportFormatArg::Json => ImportFormat::Structured,
            ImportFormatArg::Csv => ImportFormat::Tabular,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ExportFormatArg {
    Json,
    Csv,
}

impl From<ExportFormatArg> for ExportFormat {
    fn from(value: ExportFormatArg) -> Self {
        match value {
            ExportFormatArg::Json => ExportFormat::Json,
            ExportFormatArg::Csv => ExportFormat::Csv,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();
    let cli = Cli::parse();

    let config = match CliConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("configuration error: {err}");
            return ExitCode::from(2);
        }
    };
    debug!(api = %config.api_url, ws = %config.ws_url, "configuration loaded");

    match run(cli.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            print_error(&err);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command, config: &CliConfig) -> Result<(), AulaError> {
    match command {
        Command::Listen => listen(config).await,
        Command::Import {
            file,
            course,
            format,
        } => {
            let request = read_import_request(&file, format, course).await?;
            let summary = quiz_transfer(config)?.import(&request).await?;
            println!("imported quiz #{}: {}", summary.quiz_id, summary.title);
            println!("  questions: {}", summary.question_count);
            println!(
                "  imported: {}  skipped: {}",
                summary.imported, summary.skipped
            );
            Ok(())
        }
        Command::Check { file, format } => {
            let mut request = read_import_request(&file, format, None).await?;
            request.fallback_course = Some(OFFLINE_CHECK_COURSE);
            let quiz = parse_quiz(&request)?;
            let problems = validate_quiz_record(&quiz);
            if !problems.is_empty() {
                return Err(AulaError::validation(problems));
            }
            println!(
                "{}: '{}' looks valid ({} questions)",
                file.display(),
                quiz.title,
                quiz.questions.len()
            );
            Ok(())
        }
        Command::Export { ids, format, out } => {
            let request = ExportRequest::new(ids, format.into());
            let today = chrono::Local::now().date_naive();
            let artifact = quiz_transfer(config)?.export(&request, today).await?;
            let path = save_artifact(&out, &artifact)?;
            println!(
                "saved {} ({} bytes, {})",
                path.display(),
                artifact.bytes.len(),
                artifact.mime_type
            );
            Ok(())
        }
        Command::Quizzes { course } => {
            let quizzes = quiz_transfer(config)?.api().list_quizzes(course).await?;
            if quizzes.is_empty() {
                println!("no quizzes");
            }
            for quiz in quizzes {
                println!(
                    "{:>6}  {:<40}  course {:<6}  {:>3} questions  {}",
                    quiz.id,
                    quiz.title,
                    quiz.course.map(|id| id.to_string()).unwrap_or_else(|| "-".to_owned()),
                    quiz.total_questions.unwrap_or(0),
                    if quiz.is_published { "published" } else { "draft" }
                );
            }
            Ok(())
        }
        Command::Courses => {
            let courses = quiz_transfer(config)?.api().list_courses().await?;
            if courses.is_empty() {
                println!("no courses");
            }
            for course in courses {
                println!("{:>6}  {}", course.id, course.title);
            }
            Ok(())
        }
        Command::Token { action } => token(action, config),
    }
}

async fn listen(config: &CliConfig) -> Result<(), AulaError> {
    let client = NotificationClient::websocket(config.notification_config(), token_provider(config));
    let mut events = client.subscribe();

    let outcome = client
        .connect(|event| match serde_json::to_string(&event.message) {
            Ok(line) => println!("{line}"),
            Err(err) => warn!(error = %err, "could not print notification"),
        })
        .await;
    match outcome {
        ConnectOutcome::Started | ConnectOutcome::AlreadyActive => {}
        ConnectOutcome::MissingToken => {
            return Err(AulaError::precondition(
                "missing_token",
                "no access token; run `aula token set` or set AULA_ACCESS_TOKEN",
            ));
        }
        ConnectOutcome::InvalidEndpoint => {
            return Err(AulaError::new(
                ErrorCategory::Config,
                "invalid_notification_endpoint",
                format!("cannot build a notification endpoint from {}", config.ws_url),
            ));
        }
    }

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received; closing notification channel");
                client.disconnect().await;
                return Ok(());
            }
            event = events.recv() => match event {
                Ok(ChannelEvent::StateChanged { state }) => info!(?state, "notification channel state"),
                Ok(ChannelEvent::ReconnectScheduled { attempt, delay_ms }) => {
                    eprintln!("connection lost; retrying in {delay_ms} ms (attempt {attempt})");
                }
                Ok(ChannelEvent::Error(ChannelError::RetriesExhausted { attempts })) => {
                    return Err(AulaError::new(
                        ErrorCategory::Network,
                        "notifications_unavailable",
                        format!("notification channel gave up after {attempts} reconnect attempts"),
                    ));
                }
                Ok(ChannelEvent::Error(ChannelError::MissingToken)) => {
                    return Err(AulaError::new(
                        ErrorCategory::Auth,
                        "session_ended",
                        "the session ended while reconnecting",
                    ));
                }
                Ok(ChannelEvent::Error(err)) => debug!(error = %err, "notification channel error"),
                Ok(ChannelEvent::Notification(_)) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "observer lagged behind"),
                Err(RecvError::Closed) => return Ok(()),
            }
        }
    }
}

async fn read_import_request(
    file: &Path,
    format: Option<ImportFormatArg>,
    course: Option<u64>,
) -> Result<ImportRequest, AulaError> {
    let file_name = file
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let format = match format {
        Some(format) => format.into(),
        None => detect_format(&file_name).ok_or_else(|| {
            AulaError::precondition(
                "unknown_import_format",
                format!("cannot tell the format of '{file_name}'; pass --format json or csv"),
            )
        })?,
    };
    let text = tokio::fs::read_to_string(file).await.map_err(|err| {
        AulaError::new(
            ErrorCategory::Storage,
            "import_read_failed",
            format!("failed reading {}: {err}", file.display()),
        )
    })?;
    Ok(ImportRequest::new(text, format, file_name, course))
}

fn quiz_transfer(config: &CliConfig) -> Result<QuizTransfer<RestQuizApi>, AulaError> {
    let rest = RestClient::new(config.rest_config(), token_provider(config))?;
    Ok(QuizTransfer::new(RestQuizApi::new(rest)))
}

fn token_provider(config: &CliConfig) -> Arc<dyn TokenProvider> {
    match &config.access_token {
        Some(token) => Arc::new(StaticToken::new(Some(token.clone()))),
        None => Arc::new(session_tokens(config)),
    }
}

#[cfg(feature = "os-keyring")]
fn session_tokens(_config: &CliConfig) -> SessionTokens<CredentialBackend> {
    SessionTokens::new(OsKeyringCredentialStore, CREDENTIAL_SERVICE)
}

#[cfg(not(feature = "os-keyring"))]
fn session_tokens(config: &CliConfig) -> SessionTokens<CredentialBackend> {
    SessionTokens::new(
        FileCredentialStore::new(config.credentials_path()),
        CREDENTIAL_SERVICE,
    )
}

fn token(action: TokenAction, config: &CliConfig) -> Result<(), AulaError> {
    let tokens = session_tokens(config);
    match action {
        TokenAction::Set { access, refresh } => {
            tokens
                .store(access.trim(), refresh.as_deref().map(str::trim))
                .map_err(map_credential_error)?;
            println!("session tokens stored");
        }
        TokenAction::Clear => {
            tokens.clear_session().map_err(map_credential_error)?;
            println!("session tokens cleared");
        }
        TokenAction::Show => {
            if config.access_token.is_some() {
                println!("access token: from AULA_ACCESS_TOKEN");
            } else {
                println!("access token: {}", presence(tokens.access_token()));
            }
            println!("refresh token: {}", presence(tokens.refresh_token()));
        }
    }
    Ok(())
}

fn presence(token: Option<String>) -> &'static str {
    if token.is_some() { "stored" } else { "missing" }
}

fn map_credential_error(err: CredentialStoreError) -> AulaError {
    AulaError::new(
        ErrorCategory::Storage,
        "credential_store_error",
        err.to_string(),
    )
}

fn print_error(err: &AulaError) {
    eprintln!("error [{:?}:{}] {}", err.category, err.code, err.message);
    for detail in &err.details {
        eprintln!("  - {detail}");
    }
}
