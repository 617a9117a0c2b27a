use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use boxoffice_booking::BookingError;
use serde_json::json;
use tracing::error;

/// Errors returned by HTTP handlers.
#[derive(Debug)]
pub enum ApiError {
    Booking(BookingError),
    BadRequest(String),
    Unauthorized(&'static str),
    Forbidden,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::Booking(err) => match err {
                BookingError::Validation(_)
                | BookingError::InsufficientSeats { .. }
                | BookingError::AlreadyCancelled => StatusCode::BAD_REQUEST,
                BookingError::NotFound(_) => StatusCode::NOT_FOUND,
                BookingError::SeatsLocked | BookingError::EventHasBookings => StatusCode::CONFLICT,
                BookingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Unauthorized(msg) => (*msg).to_string(),
            ApiError::Forbidden => "Access denied for this role".to_string(),
            ApiError::Booking(BookingError::Validation(_)) => "Validation failed".to_string(),
            ApiError::Booking(BookingError::NotFound(what)) => capitalize(&format!("{what} not found")),
            ApiError::Booking(BookingError::Storage(_)) => "Internal server error".to_string(),
            ApiError::Booking(err) => capitalize(&err.to_string()),
        }
    }
}

fn capitalize(msg: &str) -> String {
    let mut chars = msg.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if let ApiError::Booking(BookingError::Storage(err)) = &self {
            error!("Request failed: {err:#}");
        }

        let mut body = json!({
            "success": false,
            "message": self.message(),
        });
        if let ApiError::Booking(BookingError::Validation(errors)) = &self {
            body["errors"] = json!(errors);
        }
        (status, Json(body)).into_response()
    }
}

impl From<BookingError> for ApiError {
    fn from(err: BookingError) -> Self {
        ApiError::Booking(err)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Booking(BookingError::Storage(err))
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

impl From<PathRejection> for ApiError {
    fn from(rejection: PathRejection) -> Self {
        ApiError::BadRequest(rejection.body_text())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
