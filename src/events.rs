//! Notification channel protocol
//!
//! JSON objects tagged by `type`, exchanged over the WebSocket channel.

use crate::common::types::{AccountId, SessionId};
use serde::{Deserialize, Serialize};

/// Messages a client sends over its notification channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this channel to an account
    #[serde(rename_all = "camelCase")]
    Register { user_id: AccountId },

    /// Stake from available balance and join the matching pool
    #[serde(rename_all = "camelCase")]
    PlaceBet { user_id: AccountId, amount: u64 },

    /// Leave the matching pool and get the stake back
    #[serde(rename_all = "camelCase")]
    CancelBet { user_id: AccountId, amount: u64 },

    /// External game acknowledged that play has started
    #[serde(rename_all = "camelCase")]
    GameAck { game_id: SessionId },

    /// External game reports its winner
    #[serde(rename_all = "camelCase")]
    GameWinner { game_id: SessionId, winner_id: AccountId },
}

/// Events pushed to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    #[serde(rename_all = "camelCase")]
    BalanceUpdate { balance: u64, escrowed: u64 },

    #[serde(rename_all = "camelCase")]
    PaymentSuccess { amount: u64 },

    #[serde(rename_all = "camelCase")]
    BetQueued { amount: u64 },

    #[serde(rename_all = "camelCase")]
    BetCancelled { amount: u64 },

    /// No opponent arrived in time; the stake went back to the balance
    #[serde(rename_all = "camelCase")]
    MatchTimeout { amount: u64 },

    #[serde(rename_all = "camelCase")]
    GameStart {
        game_id: SessionId,
        player1_id: AccountId,
        player2_id: AccountId,
        stake: u64,
        pot: u64,
    },

    #[serde(rename_all = "camelCase")]
    GameOver {
        game_id: SessionId,
        winner_id: AccountId,
        pot: u64,
    },

    #[serde(rename_all = "camelCase")]
    GameAbandoned { game_id: SessionId, reason: String },

    #[serde(rename_all = "camelCase")]
    Error {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
}

impl ServerEvent {
    pub fn error(err: &crate::errors::BetError) -> Self {
        ServerEvent::Error {
            message: err.to_string(),
            code: Some(err.code().to_string()),
        }
    }

    /// Event name as it appears in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            ServerEvent::BalanceUpdate { .. } => "balance_update",
            ServerEvent::PaymentSuccess { .. } => "payment_success",
            ServerEvent::BetQueued { .. } => "bet_queued",
            ServerEvent::BetCancelled { .. } => "bet_cancelled",
            ServerEvent::MatchTimeout { .. } => "match_timeout",
            ServerEvent::GameStart { .. } => "game_start",
            ServerEvent::GameOver { .. } => "game_over",
            ServerEvent::GameAbandoned { .. } => "game_abandoned",
            ServerEvent::Error { .. } => "error",
        }
    }
}
