//! Async runtime of the Aula Virtual client: the push-notification channel,
//! the authenticated REST client, and the quiz import/export workflows.

pub mod download;
pub mod notifications;
pub mod quizzes;
pub mod rest;

pub use download::save_artifact;
pub use notifications::{
    ConnectOutcome, NotificationClient, NotificationConfig, NotificationHandler,
    NotificationSession, NotificationTransport, WebSocketTransport, notification_endpoint,
    websocket_base_from_api,
};
pub use quizzes::{QuizApi, QuizTransfer, RestQuizApi};
pub use rest::{DEFAULT_REQUEST_TIMEOUT, RestClient, RestConfig, error_from_response};
