use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::types::ApiErrorResponse;

/// Application error codes.
///
/// Ranges:
/// - E0xxx: shared/infrastructure errors
/// - E1xxx: fan-out engine errors (tokens, rooms, webhooks, inbox, push)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    // Shared (E0xxx)
    InternalError,
    ValidationError,
    NotFound,
    Unauthorized,
    Forbidden,
    RateLimited,
    ServiceUnavailable,
    BadRequest,
    PayloadTooLarge,

    // Fan-out engine (E1xxx)
    InvalidToken,
    TokenExpired,
    AuthGraceExceeded,
    InvalidRoomName,
    ForbiddenRoomJoin,
    WebhookUnauthorized,
    NotificationNotFound,
    SubscriptionNotFound,
}

impl ErrorCode {
    pub fn code(&self) -> &'static str {
        match self {
            Self::InternalError => "E0001",
            Self::ValidationError => "E0002",
            Self::NotFound => "E0003",
            Self::Unauthorized => "E0004",
            Self::Forbidden => "E0005",
            Self::RateLimited => "E0006",
            Self::ServiceUnavailable => "E0007",
            Self::BadRequest => "E0008",
            Self::PayloadTooLarge => "E0009",

            Self::InvalidToken => "E1001",
            Self::TokenExpired => "E1002",
            Self::AuthGraceExceeded => "E1003",
            Self::InvalidRoomName => "E1004",
            Self::ForbiddenRoomJoin => "E1005",
            Self::WebhookUnauthorized => "E1006",
            Self::NotificationNotFound => "E1007",
            Self::SubscriptionNotFound => "E1008",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InternalError | Self::ServiceUnavailable => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ValidationError | Self::BadRequest | Self::InvalidRoomName => {
                StatusCode::BAD_REQUEST
            }
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::NotFound | Self::NotificationNotFound | Self::SubscriptionNotFound => {
                StatusCode::NOT_FOUND
            }
            Self::Unauthorized
            | Self::InvalidToken
            | Self::TokenExpired
            | Self::AuthGraceExceeded
            | Self::WebhookUnauthorized => StatusCode::UNAUTHORIZED,
            Self::Forbidden | Self::ForbiddenRoomJoin => StatusCode::FORBIDDEN,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{message}")]
    Known {
        code: ErrorCode,
        message: String,
        details: Option<serde_json::Value>,
    },

    #[error("internal server error")]
    Internal(#[from] anyhow::Error),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

impl AppError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(code: ErrorCode, message: impl Into<String>, details: serde_json::Value) -> Self {
        Self::Known {
            code,
            message: message.into(),
            details: Some(details),
        }
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_response) = match &self {
            AppError::Known { code, message, details } => {
                let status = code.status_code();
                let mut resp = ApiErrorResponse::new(code.code(), message);
                if let Some(d) = details {
                    resp = resp.with_details(d.clone());
                }
                (status, resp)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "internal server error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ApiErrorResponse::new("E0001", "internal server error"),
                )
            }
            AppError::Redis(err) => {
                tracing::error!(error = %err, "redis error");
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    ApiErrorResponse::new("E0007", "storage temporarily unavailable"),
                )
            }
        };

        (status, Json(error_response)).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
