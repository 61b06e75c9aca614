//! Per-account notification channels
//!
//! At most one live channel per account. Registering again supersedes the
//! old channel: its sender is dropped, which ends the old receiver's stream.

use crate::common::traits::EventSink;
use crate::common::types::AccountId;
use crate::errors::{BetError, BetResult};
use crate::events::ServerEvent;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info};

pub type EventSender = UnboundedSender<ServerEvent>;
pub type EventReceiver = UnboundedReceiver<ServerEvent>;

/// Identifies one registration so a stale connection cannot remove its
/// successor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelHandle {
    pub account: AccountId,
    id: u64,
}

struct RegisteredChannel {
    id: u64,
    sender: EventSender,
}

#[derive(Default)]
pub struct NotificationHub {
    channels: DashMap<AccountId, RegisteredChannel>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `sender` to `account`, replacing any earlier channel
    pub fn register(&self, account: AccountId, sender: EventSender) -> ChannelHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let previous = self
            .channels
            .insert(account.clone(), RegisteredChannel { id, sender });

        if previous.is_some() {
            info!("🔁 Channel for {} superseded", account);
        } else {
            info!("🔌 Channel registered for {}", account);
        }
        ChannelHandle { account, id }
    }

    /// Create a fresh channel for `account` and register its sending half
    pub fn open(&self, account: AccountId) -> (ChannelHandle, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        (self.register(account, tx), rx)
    }

    /// Deliver `event` or report that the account has no live channel
    pub fn try_send(&self, account: &AccountId, event: ServerEvent) -> BetResult<()> {
        let dead_id = match self.channels.get(account) {
            Some(channel) => match channel.sender.send(event) {
                Ok(()) => return Ok(()),
                Err(_) => channel.id,
            },
            None => return Err(BetError::ChannelUnavailable(account.clone())),
        };

        self.channels
            .remove_if(account, |_, channel| channel.id == dead_id);
        Err(BetError::ChannelUnavailable(account.clone()))
    }

    /// Best-effort delivery
    pub fn send(&self, account: &AccountId, event: ServerEvent) {
        let kind = event.kind();
        if let Err(e) = self.try_send(account, event) {
            debug!("Dropped {} for {}: {}", kind, account, e);
        }
    }

    /// Remove the registration, unless a newer one has replaced it
    pub fn unregister(&self, handle: &ChannelHandle) -> bool {
        let removed = self
            .channels
            .remove_if(&handle.account, |_, channel| channel.id == handle.id)
            .is_some();
        if removed {
            info!("Channel for {} closed", handle.account);
        }
        removed
    }

    pub fn is_connected(&self, account: &AccountId) -> bool {
        self.channels
            .get(account)
            .map(|channel| !channel.sender.is_closed())
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.channels.len()
    }
}

impl EventSink for NotificationHub {
    fn publish(&self, account: &AccountId, event: ServerEvent) {
        self.send(account, event);
    }
}
