//! Request Handlers
//!
//! Thin adapters from HTTP requests to [`BettingService`] operations.

use super::{
    errors::ApiError,
    middleware::{require_api_key, RequestId},
    models::*,
};
use crate::{
    common::types::{AccountId, SessionId},
    ledger::Account,
    payments::Invoice,
    services::{BetPlacement, BettingService},
    sessions::Session,
};
use axum::{
    extract::{Path, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Extension, Json,
};
use std::sync::Arc;
use tracing::warn;

/// Shared application state
pub struct AppState {
    pub service: Arc<BettingService>,
    pub version: String,
}

impl AppState {
    pub fn new(service: Arc<BettingService>) -> Self {
        Self {
            service,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    fn api_key(&self) -> Option<&str> {
        self.service.config().server.callback_api_key.as_deref()
    }
}

type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

fn parse_session_id(raw: &str, request_id: &RequestId) -> Result<SessionId, ApiError> {
    raw.parse().map_err(|_| {
        ApiError::bad_request(request_id.0.clone(), format!("Invalid game id: {}", raw))
    })
}

/// GET /health
pub async fn health_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let service = &state.service;
    Json(HealthResponse {
        status: "Running".to_string(),
        version: state.version.clone(),
        accounts: service.ledger().account_count(),
        queued_bets: service.queue().len(),
        active_sessions: service.sessions().active_count(),
        connections: service.hub().connection_count(),
    })
}

/// GET /metrics
pub async fn metrics_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
) -> Result<Response, ApiError> {
    let body = state
        .service
        .metrics()
        .render()
        .map_err(|e| ApiError::internal_error(request_id.0, format!("Metrics unavailable: {}", e)))?;

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
        .into_response())
}

/// POST /create-bet
pub async fn create_bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<BetRequest>,
) -> ApiResult<Invoice> {
    let invoice = state
        .service
        .create_bet(&req.user_id, req.amount)
        .await
        .map_err(|e| ApiError::from_bet(request_id.0, e))?;
    Ok(Json(ApiResponse::ok(invoice)))
}

/// GET /check-payment-status/:user_id/:amount
pub async fn payment_status_handler(
    State(state): State<Arc<AppState>>,
    Path((user_id, amount)): Path<(String, u64)>,
) -> Json<PaymentStatusResponse> {
    let status = state
        .service
        .payment_status(&AccountId::new(user_id), amount);
    Json(PaymentStatusResponse {
        success: true,
        status,
    })
}

/// POST /payment-callback
///
/// Confirmation from the payment provider. A charge reference is applied at
/// most once.
pub async fn payment_callback_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(req): Json<PaymentCallbackRequest>,
) -> ApiResult<BetPlacement> {
    require_api_key(&headers, state.api_key(), &request_id.0)?;
    if req.charge_ref.trim().is_empty() {
        return Err(ApiError::bad_request(
            request_id.0,
            "chargeRef cannot be empty".to_string(),
        ));
    }

    let placement = state
        .service
        .confirm_payment(&req.user_id, req.amount, &req.charge_ref)
        .map_err(|e| {
            warn!("Payment callback {} rejected: {}", req.charge_ref, e);
            ApiError::from_bet(request_id.0, e)
        })?;
    Ok(Json(ApiResponse::ok(placement)))
}

/// POST /cancel-bet
pub async fn cancel_bet_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Json(req): Json<BetRequest>,
) -> ApiResult<Account> {
    let account = state
        .service
        .cancel_bet(&req.user_id, req.amount)
        .map_err(|e| ApiError::from_bet(request_id.0, e))?;
    Ok(Json(ApiResponse::ok(account)))
}

/// GET /balance/:user_id
pub async fn balance_handler(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<String>,
) -> Json<ApiResponse<Account>> {
    Json(ApiResponse::ok(state.service.balance(&AccountId::new(user_id))))
}

/// GET /games/:game_id
pub async fn game_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
) -> ApiResult<Session> {
    let id = parse_session_id(&game_id, &request_id)?;
    let session = state
        .service
        .session(id)
        .map_err(|e| ApiError::from_bet(request_id.0, e))?;
    Ok(Json(ApiResponse::ok(session)))
}

/// POST /games/:game_id/winner
pub async fn game_winner_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<WinnerRequest>,
) -> ApiResult<Session> {
    require_api_key(&headers, state.api_key(), &request_id.0)?;
    let id = parse_session_id(&game_id, &request_id)?;
    let session = state
        .service
        .report_winner(id, &req.winner_id)
        .map_err(|e| ApiError::from_bet(request_id.0, e))?;
    Ok(Json(ApiResponse::ok(session)))
}

/// POST /games/:game_id/abandon
pub async fn game_abandon_handler(
    Extension(request_id): Extension<RequestId>,
    State(state): State<Arc<AppState>>,
    Path(game_id): Path<String>,
    headers: HeaderMap,
    body: Option<Json<AbandonRequest>>,
) -> ApiResult<Session> {
    require_api_key(&headers, state.api_key(), &request_id.0)?;
    let id = parse_session_id(&game_id, &request_id)?;
    let reason = body
        .and_then(|Json(req)| req.reason)
        .unwrap_or_else(|| "abandoned".to_string());

    let session = state
        .service
        .abandon(id, &reason)
        .map_err(|e| ApiError::from_bet(request_id.0, e))?;
    Ok(Json(ApiResponse::ok(session)))
}

/// Fallback for unknown routes
pub async fn not_found_handler(Extension(request_id): Extension<RequestId>) -> ApiError {
    ApiError::not_found(request_id.0, "No such route".to_string())
}
