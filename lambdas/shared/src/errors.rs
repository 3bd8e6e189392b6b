//! Error types for Koekalenteri

use thiserror::Error;

/// Result type alias using Koekalenteri Error
pub type Result<T> = std::result::Result<T, Error>;

/// Status used when an error carries no status code of its own
pub const DEFAULT_ERROR_STATUS: u16 = 501;

/// Koekalenteri error types
#[derive(Error, Debug)]
pub enum Error {
    /// Referenced record does not exist
    #[error("{0}")]
    NotFound(String),

    /// Request carries no usable credentials
    #[error("Unauthorized")]
    Unauthorized,

    /// Caller is known but lacks the required rights
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Conflicting write, e.g. a dog registered twice to the same event
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Well-formed request with nothing to act on
    #[error("{0}")]
    Unprocessable(String),

    /// DynamoDB error, with the HTTP status of the failed call when known
    #[error("Database error: {message}")]
    Database { status: Option<u16>, message: String },

    /// JSON Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// DynamoDB serialization error
    #[error("DynamoDB serialization error: {0}")]
    DynamoSerialization(String),

    /// SES error
    #[error("Email error: {0}")]
    Email(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn database(message: impl Into<String>) -> Self {
        Error::Database {
            status: None,
            message: message.into(),
        }
    }

    /// Returns the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "not_found",
            Error::Unauthorized => "unauthorized",
            Error::Forbidden(_) => "forbidden",
            Error::Conflict(_) => "conflict",
            Error::Validation(_) => "validation_error",
            Error::Unprocessable(_) => "unprocessable",
            Error::Database { .. } => "database_error",
            Error::Serialization(_) => "serialization_error",
            Error::DynamoSerialization(_) => "serialization_error",
            Error::Email(_) => "email_error",
            Error::Internal(_) => "internal_error",
        }
    }

    /// Returns the HTTP status code for this error.
    ///
    /// Downstream failures keep the status of the failed call when it is
    /// known and fall back to [`DEFAULT_ERROR_STATUS`] otherwise.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::NotFound(_) => 404,
            Error::Unauthorized => 401,
            Error::Forbidden(_) => 403,
            Error::Conflict(_) => 409,
            Error::Validation(_) => 400,
            Error::Unprocessable(_) => 422,
            Error::Serialization(_) => 400,
            Error::Database { status, .. } => status.unwrap_or(DEFAULT_ERROR_STATUS),
            Error::DynamoSerialization(_) => DEFAULT_ERROR_STATUS,
            Error::Email(_) => DEFAULT_ERROR_STATUS,
            Error::Internal(_) => DEFAULT_ERROR_STATUS,
        }
    }
}
