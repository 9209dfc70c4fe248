use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// Domain failures of the booking lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BookingError {
    #[error("{0}")]
    Validation(String),
    #[error("tour not found")]
    TourNotFound,
    #[error("tour is closed")]
    TourClosed,
    #[error("not enough slots left (available: {available})")]
    CapacityExceeded { available: i32 },
    #[error("booking not found")]
    BookingNotFound,
    #[error("only pending bookings can be canceled")]
    NotCancellable,
    #[error("nothing is due on this booking")]
    NothingDue,
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<sqlx::Error> for BookingError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub detail: String,
    pub available: Option<i32>,
}

impl ApiError {
    pub fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: detail.into(),
            available: None,
        }
    }

    pub fn bad_request(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, detail)
    }

    pub fn unauthorized(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::UNAUTHORIZED, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, detail)
    }

    pub fn conflict(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, detail)
    }

    pub fn internal(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, detail)
    }
}

impl From<BookingError> for ApiError {
    fn from(e: BookingError) -> Self {
        match e {
            BookingError::Validation(msg) => Self::bad_request(msg),
            BookingError::TourNotFound => Self::not_found("tour not found"),
            BookingError::TourClosed => Self::bad_request("tour is closed for booking"),
            BookingError::CapacityExceeded { available } => ApiError {
                available: Some(available),
                ..Self::conflict(format!("not enough slots left; available={available}"))
            },
            BookingError::BookingNotFound => Self::not_found("booking not found"),
            BookingError::NotCancellable => {
                Self::bad_request("only pending bookings can be canceled")
            }
            BookingError::NothingDue => Self::bad_request("nothing is due on this booking"),
            BookingError::Storage(msg) => {
                tracing::error!(error = %msg, "storage failure");
                Self::internal("database error")
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    detail: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    available: Option<i32>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = axum::Json(ErrorBody {
            detail: self.detail.as_str(),
            available: self.available,
        });
        (self.status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
