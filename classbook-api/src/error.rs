use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use classbook_core::BookingError;
use serde_json::json;

/// Shown for every token or identifier mismatch so callers cannot tell
/// which part was wrong.
const INVALID_LINK: &str = "This link is invalid or has expired";

#[derive(Debug)]
pub enum AppError {
    Validation(String),
    NotFound(String),
    Conflict(String),
    Gone(String),
    TooManyRequests(String),
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            AppError::Gone(msg) => (StatusCode::GONE, msg),
            AppError::TooManyRequests(msg) => (StatusCode::TOO_MANY_REQUESTS, msg),
            AppError::Internal(msg) => {
                tracing::error!("Internal Server Error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<BookingError> for AppError {
    fn from(err: BookingError) -> Self {
        if err.is_link_error() {
            tracing::warn!("Rejected link: {}", err);
            return AppError::NotFound(INVALID_LINK.to_string());
        }

        let msg = err.to_string();
        if err.is_internal() {
            return AppError::Internal(msg);
        }
        match err {
            BookingError::Validation(_) => AppError::Validation(msg),
            BookingError::ClassNotFound(_) | BookingError::PassNotFound(_) => AppError::NotFound(msg),
            BookingError::ClassExpired => AppError::Gone(msg),
            BookingError::TooManyPendingOperations => AppError::TooManyRequests(msg),
            BookingError::ClassFullyBooked
            | BookingError::SomeoneBookedClassFaster
            | BookingError::BookingAlreadyExists
            | BookingError::AlreadyBooked
            | BookingError::ClassHasBookings(_)
            | BookingError::PassAlreadyActive(_) => AppError::Conflict(msg),
            _ => AppError::Internal(msg),
        }
    }
}
