//! Error types for workflow state tracking

use thiserror::Error;

use crate::types::EntityKind;

/// Result type alias using the workflow Error
pub type Result<T> = std::result::Result<T, Error>;

/// Workflow error types
#[derive(Error, Debug)]
pub enum Error {
    /// A step ran before one of its prerequisite entities was created.
    #[error("Dependency not satisfied: step '{step}' requires {kind} to be created first")]
    DependencyNotSatisfied { kind: EntityKind, step: String },

    /// An identifier was read before it was resolved.
    #[error("{kind} has not been created yet in this run")]
    NotYetCreated { kind: EntityKind },

    #[error("Could not resolve {kind} identifier: {reason}")]
    ResolutionFailed { kind: EntityKind, reason: String },

    #[error("Action failed: {0}")]
    ActionFailed(String),

    #[error("{kind} already resolved to {existing}, refusing to overwrite with {attempted}")]
    RemoteIdConflict {
        kind: EntityKind,
        existing: String,
        attempted: String,
    },

    #[error("No auth token recorded for this run")]
    NotAuthenticated,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Only identifier resolution is an environment/timing problem that a
    /// caller may retry (once, with a longer settle interval).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::ResolutionFailed { .. })
    }

    /// Ordering violations that indicate a broken step sequence.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            Error::DependencyNotSatisfied { .. }
                | Error::NotYetCreated { .. }
                | Error::RemoteIdConflict { .. }
        )
    }
}
