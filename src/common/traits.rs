//! Shared traits and interfaces
//!
//! Seams between the core components and their transports.

use crate::common::types::AccountId;
use crate::events::ServerEvent;

/// Destination for per-account state-change events
///
/// Delivery is best-effort: implementations drop events for accounts that
/// have no live channel and never block the caller.
pub trait EventSink: Send + Sync {
    fn publish(&self, account: &AccountId, event: ServerEvent);
}

/// Sink that discards every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn publish(&self, _account: &AccountId, _event: ServerEvent) {}
}
