//! Betgammon - stake matching and escrow ledger
//!
//! Pairs users who staked the same amount into a two-player game and pays
//! the combined pot to the reported winner.
//!
//! Components, leaves first:
//! - [`ledger::Ledger`] owns balances and escrow holds
//! - [`matching::MatchQueue`] pairs waiting bettors per stake amount
//! - [`sessions::SessionManager`] runs a matched pair to settlement
//! - [`notifications::NotificationHub`] delivers events to live channels
//!
//! [`services::BettingService`] composes them for the HTTP and WebSocket
//! surfaces in [`api`].

pub mod api;
pub mod common;
pub mod config;
pub mod errors;
pub mod events;
pub mod ledger;
pub mod matching;
pub mod metrics;
pub mod notifications;
pub mod payments;
pub mod services;
pub mod sessions;
pub mod sweeper;

pub use common::types::{AccountId, EscrowRef, SessionId};
pub use config::{BetgammonConfig, ConfigLoader};
pub use errors::{BetError, BetResult, ConfigError};
pub use services::BettingService;
