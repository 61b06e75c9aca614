//! Error types for the betting service
//!
//! Every ledger, queue and session operation fails with a [`BetError`] and
//! leaves shared state exactly as it found it.

use crate::common::types::{AccountId, EscrowRef, SessionId};
use thiserror::Error;

/// Domain errors raised by the ledger, match queue, session manager and
/// payment processor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BetError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(u64),

    #[error("Insufficient funds: need {need}, have {available}")]
    InsufficientFunds { need: u64, available: u64 },

    #[error("Balance overflow: {current} + {amount} exceeds maximum of {max}")]
    BalanceOverflow { current: u64, amount: u64, max: u64 },

    #[error("Unknown escrow: {0}")]
    UnknownEscrow(EscrowRef),

    #[error("Stake already settled")]
    AlreadySettled,

    #[error("Account {account} is not queued at stake {stake}")]
    NotQueued { account: AccountId, stake: u64 },

    #[error("Account {account} is already queued at stake {stake}")]
    AlreadyQueued { account: AccountId, stake: u64 },

    #[error("Stake mismatch: {left} vs {right}")]
    StakeMismatch { left: u64, right: u64 },

    #[error("Account {winner} is not a member of session {session}")]
    InvalidWinner { session: SessionId, winner: AccountId },

    #[error("Session {0} is not active")]
    SessionNotActive(SessionId),

    #[error("Session {0} not found")]
    UnknownSession(SessionId),

    #[error("Charge {0} was already processed")]
    DuplicateCharge(String),

    #[error("No live channel for account {0}")]
    ChannelUnavailable(AccountId),

    #[error("Payment provider error: {0}")]
    Payment(String),
}

impl BetError {
    /// Stable machine-readable code shared by the HTTP and WebSocket surfaces
    pub fn code(&self) -> &'static str {
        match self {
            BetError::InvalidAmount(_) => "INVALID_AMOUNT",
            BetError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            BetError::BalanceOverflow { .. } => "BALANCE_OVERFLOW",
            BetError::UnknownEscrow(_) => "UNKNOWN_ESCROW",
            BetError::AlreadySettled => "ALREADY_SETTLED",
            BetError::NotQueued { .. } => "NOT_QUEUED",
            BetError::AlreadyQueued { .. } => "ALREADY_QUEUED",
            BetError::StakeMismatch { .. } => "STAKE_MISMATCH",
            BetError::InvalidWinner { .. } => "INVALID_WINNER",
            BetError::SessionNotActive(_) => "SESSION_NOT_ACTIVE",
            BetError::UnknownSession(_) => "UNKNOWN_SESSION",
            BetError::DuplicateCharge(_) => "DUPLICATE_CHARGE",
            BetError::ChannelUnavailable(_) => "CHANNEL_UNAVAILABLE",
            BetError::Payment(_) => "PAYMENT_ERROR",
        }
    }
}

pub type BetResult<T> = Result<T, BetError>;

/// Configuration loading and validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}
