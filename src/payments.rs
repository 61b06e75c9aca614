//! External payment boundary
//!
//! The gateway turns a bet request into an invoice the user pays outside the
//! service. The processor remembers which bets are awaiting payment and which
//! provider charges have already been applied.

use crate::common::types::{now, AccountId};
use crate::config::PaymentConfig;
use crate::errors::{BetError, BetResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    pub payload: String,
    pub link: String,
    pub amount: u64,
    pub currency: String,
}

/// Issues invoices for bet amounts
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_invoice(&self, account: &AccountId, amount: u64) -> BetResult<Invoice>;
}

/// Gateway that derives invoice links from a base URL and a fresh payload id
#[derive(Debug, Clone)]
pub struct InvoiceLinkGateway {
    base_url: String,
    currency: String,
}

impl InvoiceLinkGateway {
    pub fn new(config: &PaymentConfig) -> Self {
        Self {
            base_url: config.invoice_base_url.clone(),
            currency: config.currency.clone(),
        }
    }
}

#[async_trait]
impl PaymentGateway for InvoiceLinkGateway {
    async fn create_invoice(&self, account: &AccountId, amount: u64) -> BetResult<Invoice> {
        if amount == 0 {
            return Err(BetError::InvalidAmount(amount));
        }
        let payload = format!("bet_{}_{}_{}", account, amount, Uuid::new_v4().simple());
        Ok(Invoice {
            link: format!("{}{}", self.base_url, payload),
            payload,
            amount,
            currency: self.currency.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    AwaitingPayment,
    Confirmed,
}

type BetKey = (AccountId, u64);

#[derive(Debug, Clone, Copy)]
struct PendingBet {
    status: PaymentStatus,
    updated_at: DateTime<Utc>,
}

/// Bookkeeping for invoiced bets and applied charges
///
/// A pending bet is forgotten once its stake is matched, cancelled or
/// expired, or once it has sat unchanged for longer than the invoice TTL.
pub struct PaymentProcessor {
    gateway: Arc<dyn PaymentGateway>,
    pending: DashMap<BetKey, PendingBet>,
    processed: DashMap<String, BetKey>,
}

impl PaymentProcessor {
    pub fn new(gateway: Arc<dyn PaymentGateway>) -> Self {
        Self {
            gateway,
            pending: DashMap::new(),
            processed: DashMap::new(),
        }
    }

    /// Ask the gateway for an invoice and track the bet as awaiting payment
    pub async fn create_bet(&self, account: &AccountId, amount: u64) -> BetResult<Invoice> {
        if amount == 0 {
            return Err(BetError::InvalidAmount(amount));
        }
        let invoice = self.gateway.create_invoice(account, amount).await?;
        self.track(account, amount, PaymentStatus::AwaitingPayment);
        info!("🧾 Invoice {} issued to {} for {}", invoice.payload, account, amount);
        Ok(invoice)
    }

    /// Reserve a provider charge reference. Fails if it was seen before.
    pub fn claim_charge(&self, charge_ref: &str, account: &AccountId, amount: u64) -> BetResult<()> {
        match self.processed.entry(charge_ref.to_string()) {
            Entry::Occupied(_) => {
                warn!("Duplicate charge {} for {} ignored", charge_ref, account);
                Err(BetError::DuplicateCharge(charge_ref.to_string()))
            }
            Entry::Vacant(slot) => {
                slot.insert((account.clone(), amount));
                Ok(())
            }
        }
    }

    /// Forget a claimed charge whose credit did not go through
    pub fn release_claim(&self, charge_ref: &str) {
        self.processed.remove(charge_ref);
    }

    pub fn mark_confirmed(&self, account: &AccountId, amount: u64) {
        self.track(account, amount, PaymentStatus::Confirmed);
    }

    pub fn status(&self, account: &AccountId, amount: u64) -> Option<PaymentStatus> {
        self.pending
            .get(&(account.clone(), amount))
            .map(|pending| pending.status)
    }

    /// Stop tracking a bet whose stake has been matched, cancelled or expired
    pub fn forget(&self, account: &AccountId, amount: u64) {
        self.pending.remove(&(account.clone(), amount));
    }

    /// Drop pending bets untouched for at least `ttl`
    pub fn purge_stale(&self, ttl: Duration, now: DateTime<Utc>) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, pending| {
            (now - pending.updated_at)
                .to_std()
                .map_or(true, |age| age < ttl)
        });
        let purged = before.saturating_sub(self.pending.len());
        if purged > 0 {
            debug!("Purged {} stale pending bets", purged);
        }
        purged
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    fn track(&self, account: &AccountId, amount: u64, status: PaymentStatus) {
        self.pending.insert(
            (account.clone(), amount),
            PendingBet {
                status,
                updated_at: now(),
            },
        );
    }

    pub fn is_processed(&self, charge_ref: &str) -> bool {
        self.processed.contains_key(charge_ref)
    }
}
