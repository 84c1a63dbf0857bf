use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use std::io;

/// Errors raised while building the start-up configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {key}: '{value}' (expected true or false)")]
    InvalidBool { key: String, value: String },

    #[error("Failed to read projects file '{path}': {source}")]
    ProjectsFileUnreadable {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse projects file '{path}': {source}")]
    ProjectsFileInvalid {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: '{value}' (expected a number of bytes)")]
    InvalidNumber { key: String, value: String },

    #[error("Invalid project name '{0}'")]
    InvalidProjectName(String),

    #[error("Project '{0}' is defined more than once")]
    DuplicateProject(String),
}

/// Request-time failures of the webhook endpoint. Each one maps to the
/// status code and plain-text body returned to the caller.
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("Webhook secret not configured")]
    SecretNotConfigured,

    #[error("Signature missing")]
    SignatureMissing,

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Could not read request body")]
    BodyUnreadable,

    #[error("Payload too large")]
    PayloadTooLarge,

    #[error("Bad request")]
    BadRequest,

    #[error("PROJECTS_FOLDER is not set")]
    ProjectsFolderNotSet,
}

impl WebhookError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            WebhookError::SignatureMissing | WebhookError::InvalidSignature => {
                StatusCode::UNAUTHORIZED
            }
            WebhookError::BadRequest => StatusCode::BAD_REQUEST,
            WebhookError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            WebhookError::SecretNotConfigured
            | WebhookError::BodyUnreadable
            | WebhookError::ProjectsFolderNotSet => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

/// Failures of a detached deployment. These are only ever logged.
#[derive(Debug, thiserror::Error)]
pub enum DeployError {
    #[error("GITHUB_TOKEN or GITHUB_USER is not set")]
    MissingCredentials,

    #[error("Command for step '{0}' is empty")]
    InvalidCommand(&'static str),

    #[error("Step '{step}' failed to start: {source}")]
    Spawn {
        step: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("Step '{step}' failed ({status}) running `{command}`\n{output}")]
    StepFailed {
        step: &'static str,
        command: String,
        status: String,
        output: String,
    },
}
