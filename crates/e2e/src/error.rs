//! Error types for workflow E2E testing

use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("{method} {path} returned {status} (expected one of {expected:?}): {body}")]
    UnexpectedStatus {
        method: String,
        path: String,
        status: u16,
        expected: Vec<u16>,
        body: String,
    },

    #[error("Unexpected response from {path}: {reason}")]
    UnexpectedResponse { path: String, reason: String },

    #[error("Workflow plan error: {0}")]
    Plan(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error(transparent)]
    Workflow(#[from] ecare_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl E2eError {
    /// Retryable only when the tracker could not resolve an identifier.
    pub fn is_retryable(&self) -> bool {
        matches!(self, E2eError::Workflow(e) if e.is_retryable())
    }
}

/// API failures reach the tracker as `ActionFailed`, unchanged.
impl From<E2eError> for ecare_common::Error {
    fn from(e: E2eError) -> Self {
        match e {
            E2eError::Workflow(inner) => inner,
            other => ecare_common::Error::ActionFailed(other.to_string()),
        }
    }
}

pub type E2eResult<T> = Result<T, E2eError>;
