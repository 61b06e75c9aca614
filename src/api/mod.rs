//! Betgammon API Service
//!
//! HTTP surface for bets, payments and game adjudication, plus the WebSocket
//! notification channel.

pub mod errors;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod websocket;

pub use handlers::AppState;
pub use server::{build_app, ApiServer};
