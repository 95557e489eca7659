//! Boundary error kinds.
//!
//! Each component keeps its own error enum (`DbError`, `LlmError`,
//! `ParseError`). They all fold into `PrismError` where a caller needs to
//! decide between degrading, skipping, or surfacing:
//! - Retryable: transient LLM transport failures
//! - Degradable: LLM unavailable or malformed (deterministic fallback exists)
//! - Terminal for one unit of work: parse and store failures

use serde::Serialize;
use thiserror::Error;

use crate::db::DbError;
use crate::llm::LlmError;
use crate::parser::ParseError;

#[derive(Debug, Error)]
pub enum PrismError {
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Store error: {0}")]
    Store(#[from] DbError),

    #[error("LLM unavailable: {0}")]
    LlmUnavailable(String),

    #[error("LLM returned malformed output: {message}")]
    LlmMalformed { message: String, raw: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed for {}", fields.join(", "))]
    Validation { fields: Vec<String>, message: String },

    #[error("Cancelled")]
    Cancelled,
}

/// Stable wire codes for each error kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ParseError,
    StoreError,
    LlmUnavailable,
    LlmMalformed,
    NotFound,
    ValidationError,
    Cancelled,
}

impl ErrorKind {
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::ParseError => "PARSE_ERROR",
            ErrorKind::StoreError => "STORE_ERROR",
            ErrorKind::LlmUnavailable => "LLM_UNAVAILABLE",
            ErrorKind::LlmMalformed => "LLM_MALFORMED",
            ErrorKind::NotFound => "NOT_FOUND",
            ErrorKind::ValidationError => "VALIDATION_ERROR",
            ErrorKind::Cancelled => "CANCELLED",
        }
    }
}

impl PrismError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PrismError::Parse(_) => ErrorKind::ParseError,
            PrismError::Store(_) => ErrorKind::StoreError,
            PrismError::LlmUnavailable(_) => ErrorKind::LlmUnavailable,
            PrismError::LlmMalformed { .. } => ErrorKind::LlmMalformed,
            PrismError::NotFound(_) => ErrorKind::NotFound,
            PrismError::Validation { .. } => ErrorKind::ValidationError,
            PrismError::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Shorthand for a single-field validation failure.
    pub fn invalid(field: &str, message: impl Into<String>) -> Self {
        PrismError::Validation {
            fields: vec![field.to_string()],
            message: message.into(),
        }
    }

    /// True when a deterministic fallback should be used instead of failing.
    pub fn is_degradable(&self) -> bool {
        matches!(
            self,
            PrismError::LlmUnavailable(_) | PrismError::LlmMalformed { .. }
        )
    }

    /// True for normal termination that must not be logged as a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, PrismError::Cancelled)
    }
}

impl From<LlmError> for PrismError {
    fn from(err: LlmError) -> Self {
        match err {
            LlmError::Cancelled => PrismError::Cancelled,
            LlmError::Malformed { message, raw } => PrismError::LlmMalformed { message, raw },
            other => PrismError::LlmUnavailable(other.to_string()),
        }
    }
}
