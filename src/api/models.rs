//! API Request and Response Models

use crate::common::types::AccountId;
use crate::services::PaymentStatusView;
use serde::{Deserialize, Serialize};

/// Successful response envelope
#[derive(Debug, Clone, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub result: T,
}

impl<T> ApiResponse<T> {
    pub fn ok(result: T) -> Self {
        Self {
            success: true,
            result,
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub accounts: usize,
    pub queued_bets: usize,
    pub active_sessions: usize,
    pub connections: usize,
}

/// POST /create-bet and POST /cancel-bet
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BetRequest {
    pub user_id: AccountId,
    pub amount: u64,
}

/// POST /payment-callback
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentCallbackRequest {
    pub user_id: AccountId,
    pub amount: u64,
    pub charge_ref: String,
}

/// POST /games/:game_id/winner
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WinnerRequest {
    pub winner_id: AccountId,
}

/// POST /games/:game_id/abandon
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AbandonRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

/// GET /check-payment-status/:user_id/:amount
#[derive(Debug, Clone, Serialize)]
pub struct PaymentStatusResponse {
    pub success: bool,
    #[serde(flatten)]
    pub status: PaymentStatusView,
}
