//! Route Definitions
//!
//! Maps URLs to handlers with type-safe routing.

use super::{handlers::*, websocket::websocket_handler};
use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

/// Build the API router with all endpoints
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        // Betting
        .route("/create-bet", post(create_bet_handler))
        .route(
            "/check-payment-status/:user_id/:amount",
            get(payment_status_handler),
        )
        .route("/payment-callback", post(payment_callback_handler))
        .route("/cancel-bet", post(cancel_bet_handler))
        .route("/balance/:user_id", get(balance_handler))
        // Game adjudication
        .route("/games/:game_id", get(game_handler))
        .route("/games/:game_id/winner", post(game_winner_handler))
        .route("/games/:game_id/abandon", post(game_abandon_handler))
        // Notification channel
        .route("/ws", get(websocket_handler))
        .fallback(not_found_handler)
        .with_state(state)
}
