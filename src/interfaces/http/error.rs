use actix_web::{http::StatusCode, HttpResponse, ResponseError};
use serde::Serialize;
use tracing::error;

use crate::domain::error::AppError;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::UnsupportedFormat(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            AppError::MalformedInput(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Internal(_)
            | AppError::ConfigError(_)
            | AppError::DatabaseError(_)
            | AppError::IoError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        if !self.is_client_error() {
            error!(error = %self, "Request failed");
        }
        HttpResponse::build(self.status_code()).json(ErrorBody {
            error: self.to_string(),
        })
    }
}
