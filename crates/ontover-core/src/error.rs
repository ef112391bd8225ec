//! Error types for `ontover-core`.

use thiserror::Error;
use uuid::Uuid;

use crate::{executor::StoreKind, model::ValidationReport};

#[derive(Debug, Error)]
pub enum Error {
  /// The uploaded ontology failed structural validation.
  #[error("ontology validation failed: {0}")]
  Validation(ValidationReport),

  #[error("invalid identifier: {0:?}")]
  InvalidIdentifier(String),

  #[error("invalid change: {0}")]
  InvalidChange(String),

  #[error("invalid semantic version: {0:?}")]
  InvalidVersion(String),

  #[error("{0} not found")]
  NotFound(String),

  #[error("conflict: {0}")]
  Conflict(String),

  /// A script failed against a live store. `step` is the zero-based index of
  /// the step that was running when the failure happened.
  #[error("execution failed at step {step} ({target} script): {message}")]
  Execution {
    step:    usize,
    target:  StoreKind,
    message: String,
  },

  #[error(
    "verification failed: expected active version {expected}, found {}",
    actual.as_deref().unwrap_or("none")
  )]
  Verification {
    expected: String,
    actual:   Option<String>,
  },

  #[error("dispatch of notification {notification_id} failed: {source}")]
  Dispatch {
    notification_id: Uuid,
    #[source]
    source:          Box<dyn std::error::Error + Send + Sync>,
  },

  #[error("date arithmetic out of range")]
  DateOutOfRange,

  #[error("store error: {0}")]
  Store(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

/// Coarse classification of an [`Error`], used by callers that need to decide
/// whether to surface, retry or alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
  Validation,
  NotFound,
  Conflict,
  Execution,
  Verification,
  Dispatch,
  Internal,
}

impl Error {
  pub fn kind(&self) -> ErrorKind {
    match self {
      Self::Validation(_)
      | Self::InvalidIdentifier(_)
      | Self::InvalidChange(_)
      | Self::InvalidVersion(_) => ErrorKind::Validation,
      Self::NotFound(_) => ErrorKind::NotFound,
      Self::Conflict(_) => ErrorKind::Conflict,
      Self::Execution { .. } => ErrorKind::Execution,
      Self::Verification { .. } => ErrorKind::Verification,
      Self::Dispatch { .. } => ErrorKind::Dispatch,
      Self::DateOutOfRange | Self::Store(_) | Self::Serialization(_) => {
        ErrorKind::Internal
      }
    }
  }

  /// Deterministic errors are never worth retrying.
  pub fn is_deterministic(&self) -> bool {
    matches!(
      self.kind(),
      ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Conflict
    )
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
