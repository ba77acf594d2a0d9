use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A single field-level validation failure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldError {
    pub message: String,
}

impl FieldError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into() }
    }
}

/// Error taxonomy shared by the REST and GraphQL surfaces.
///
/// Every variant carries a fixed HTTP status; transports derive their
/// response code from it instead of inventing their own. Validation
/// failures aggregate all offending fields rather than failing fast.
#[derive(Debug, Clone, Error)]
pub enum ApiError {
    #[error("Not authenticated")]
    Unauthenticated,

    #[error("Not authorized")]
    NotAuthorized,

    #[error("Invalid input")]
    InvalidInput(Vec<FieldError>),

    #[error("{0}")]
    NotFound(String),

    #[error("Internal server error")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn internal(source: impl std::fmt::Display) -> Self {
        Self::Internal(source.to_string())
    }

    pub fn http_status(&self) -> u16 {
        match self {
            Self::Unauthenticated => 401,
            Self::NotAuthorized => 403,
            Self::InvalidInput(_) => 422,
            Self::NotFound(_) => 404,
            Self::Internal(_) => 500,
        }
    }

    /// Field-level details, present only for validation failures.
    pub fn field_errors(&self) -> Option<&[FieldError]> {
        match self {
            Self::InvalidInput(fields) => Some(fields),
            _ => None,
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::Internal(err.to_string())
    }
}
