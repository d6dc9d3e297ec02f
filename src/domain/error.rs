use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Serialize, Deserialize)]
pub enum AppError {
    Internal(String),
    NotFound(String),
    ValidationError(String),
    UnsupportedFormat(String),
    MalformedInput(String),
    PayloadTooLarge(String),
    Unauthorized(String),
    ConfigError(String),
    DatabaseError(String),
    IoError(String),
}

impl AppError {
    /// Client errors are surfaced as-is; everything else is a server fault.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AppError::NotFound(_)
                | AppError::ValidationError(_)
                | AppError::UnsupportedFormat(_)
                | AppError::MalformedInput(_)
                | AppError::PayloadTooLarge(_)
                | AppError::Unauthorized(_)
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::UnsupportedFormat(msg) => write!(f, "Unsupported format: {}", msg),
            AppError::MalformedInput(msg) => write!(f, "Malformed input: {}", msg),
            AppError::PayloadTooLarge(msg) => write!(f, "Payload too large: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Config error: {}", msg),
            AppError::DatabaseError(msg) => write!(f, "Database error: {}", msg),
            AppError::IoError(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(err: figment::Error) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
