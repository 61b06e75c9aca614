//! API Error Handling
//!
//! Structured error responses with proper HTTP status codes and request tracking.

use crate::errors::BetError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Top-level API error response with request tracking
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorResponse {
    pub success: bool,
    pub request_id: String,
    pub error: ErrorBody,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Error code (NOT_FOUND, INSUFFICIENT_FUNDS, ALREADY_SETTLED, etc.)
    pub code: String,
    pub message: String,
}

/// API error types with request tracking
#[derive(Debug)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub request_id: String,
}

#[derive(Debug)]
pub enum ApiErrorKind {
    NotFound(String),
    BadRequest(String),
    Unauthorized(String),
    InternalError(String),
    /// A rejected ledger, queue, session or payment operation
    Bet(BetError),
}

impl ApiError {
    pub fn not_found(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::NotFound(message),
            request_id,
        }
    }

    pub fn bad_request(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::BadRequest(message),
            request_id,
        }
    }

    pub fn unauthorized(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::Unauthorized(message),
            request_id,
        }
    }

    pub fn internal_error(request_id: String, message: String) -> Self {
        Self {
            kind: ApiErrorKind::InternalError(message),
            request_id,
        }
    }

    pub fn from_bet(request_id: String, err: BetError) -> Self {
        Self {
            kind: ApiErrorKind::Bet(err),
            request_id,
        }
    }

    pub fn status(&self) -> StatusCode {
        match &self.kind {
            ApiErrorKind::NotFound(_) => StatusCode::NOT_FOUND,
            ApiErrorKind::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiErrorKind::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            ApiErrorKind::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiErrorKind::Bet(err) => bet_status(err),
        }
    }

    fn code(&self) -> &'static str {
        match &self.kind {
            ApiErrorKind::NotFound(_) => "NOT_FOUND",
            ApiErrorKind::BadRequest(_) => "BAD_REQUEST",
            ApiErrorKind::Unauthorized(_) => "UNAUTHORIZED",
            ApiErrorKind::InternalError(_) => "INTERNAL_ERROR",
            ApiErrorKind::Bet(err) => err.code(),
        }
    }

    fn message(&self) -> String {
        match &self.kind {
            ApiErrorKind::NotFound(msg)
            | ApiErrorKind::BadRequest(msg)
            | ApiErrorKind::Unauthorized(msg)
            | ApiErrorKind::InternalError(msg) => msg.clone(),
            ApiErrorKind::Bet(err) => err.to_string(),
        }
    }
}

fn bet_status(err: &BetError) -> StatusCode {
    match err {
        BetError::InvalidAmount(_)
        | BetError::BalanceOverflow { .. }
        | BetError::StakeMismatch { .. }
        | BetError::InvalidWinner { .. } => StatusCode::BAD_REQUEST,
        BetError::InsufficientFunds { .. } => StatusCode::PAYMENT_REQUIRED,
        BetError::UnknownEscrow(_) | BetError::NotQueued { .. } | BetError::UnknownSession(_) => {
            StatusCode::NOT_FOUND
        }
        BetError::AlreadySettled
        | BetError::AlreadyQueued { .. }
        | BetError::SessionNotActive(_)
        | BetError::DuplicateCharge(_) => StatusCode::CONFLICT,
        BetError::ChannelUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        BetError::Payment(_) => StatusCode::BAD_GATEWAY,
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.request_id, self.code(), self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorResponse {
            success: false,
            request_id: self.request_id.clone(),
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.message(),
            },
        });

        (self.status(), body).into_response()
    }
}
