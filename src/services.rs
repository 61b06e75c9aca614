//! Betting service
//!
//! Wires the ledger, match queue, session manager, notification hub and
//! payment processor together and exposes the operations the HTTP and
//! WebSocket surfaces call. Every flow here is a sequence of component
//! operations; no component lock is held across two of them.

use crate::{
    common::{
        traits::EventSink,
        types::{now, AccountId, EscrowRef, SessionId},
    },
    config::BetgammonConfig,
    errors::{BetError, BetResult},
    events::ServerEvent,
    ledger::{Account, Ledger},
    matching::{EnqueueOutcome, MatchQueue, MatchedPair, StakeEntry},
    metrics::Metrics,
    notifications::{ChannelHandle, EventReceiver, NotificationHub},
    payments::{InvoiceLinkGateway, Invoice, PaymentGateway, PaymentProcessor, PaymentStatus},
    sessions::{Session, SessionManager},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Result of placing a bet
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BetPlacement {
    /// Escrowed and waiting for an opponent
    Waiting {
        stake: u64,
        #[serde(skip)]
        escrow: EscrowRef,
    },
    /// Paired immediately; the session has been announced
    Matched(Session),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentStatusView {
    pub payment_confirmed: bool,
    pub is_matching: bool,
}

/// What one sweep pass did
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired_bets: usize,
    pub abandoned_sessions: usize,
    pub purged_sessions: usize,
    pub purged_payments: usize,
}

pub struct BettingService {
    config: BetgammonConfig,
    ledger: Arc<Ledger>,
    queue: MatchQueue,
    sessions: SessionManager,
    hub: Arc<NotificationHub>,
    payments: PaymentProcessor,
    metrics: Arc<Metrics>,
}

impl BettingService {
    /// Build the service with the invoice-link gateway and a fresh registry
    pub fn from_config(config: BetgammonConfig) -> prometheus::Result<Self> {
        let gateway = Arc::new(InvoiceLinkGateway::new(&config.payments));
        let metrics = Arc::new(Metrics::new()?);
        Ok(Self::new(config, gateway, metrics))
    }

    pub fn new(
        config: BetgammonConfig,
        gateway: Arc<dyn PaymentGateway>,
        metrics: Arc<Metrics>,
    ) -> Self {
        let hub = Arc::new(NotificationHub::new());
        let sink: Arc<dyn EventSink> = hub.clone();
        let ledger = Arc::new(Ledger::with_events(config.ledger.clone(), Arc::clone(&sink)));
        let queue = MatchQueue::new(Arc::clone(&ledger));
        let sessions = SessionManager::new(Arc::clone(&ledger), sink);

        Self {
            config,
            ledger,
            queue,
            sessions,
            hub,
            payments: PaymentProcessor::new(gateway),
            metrics,
        }
    }

    pub fn config(&self) -> &BetgammonConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn queue(&self) -> &MatchQueue {
        &self.queue
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Bind a fresh channel to the account. The returned receiver already
    /// holds the account's current balance.
    pub fn connect(&self, account: &AccountId) -> (ChannelHandle, EventReceiver) {
        let state = self.ledger.ensure_account(account);
        let (handle, rx) = self.hub.open(account.clone());
        self.hub.send(
            account,
            ServerEvent::BalanceUpdate {
                balance: state.available_balance,
                escrowed: state.escrowed_balance,
            },
        );
        (handle, rx)
    }

    pub fn disconnect(&self, handle: &ChannelHandle) {
        self.hub.unregister(handle);
    }

    pub fn balance(&self, account: &AccountId) -> Account {
        self.ledger.ensure_account(account)
    }

    /// Escrow `amount` from the account's balance and join the matching pool
    pub fn place_bet(&self, account: &AccountId, amount: u64) -> BetResult<BetPlacement> {
        let escrow = self.ledger.place_stake(account, amount)?;
        let entry = StakeEntry::new(escrow.clone(), now());

        match self.queue.enqueue(entry) {
            Ok(EnqueueOutcome::Waiting) => {
                self.metrics.bets_placed.inc();
                self.hub.send(account, ServerEvent::BetQueued { amount });
                Ok(BetPlacement::Waiting {
                    stake: amount,
                    escrow,
                })
            }
            Ok(EnqueueOutcome::Matched(pair)) => {
                self.metrics.bets_placed.inc();
                self.metrics.matches.inc();
                self.start_session(pair).map(BetPlacement::Matched)
            }
            Err(e) => {
                if let Err(release) = self.ledger.release_stake(&escrow) {
                    warn!("Could not return stake {} after {}: {}", escrow, e, release);
                }
                warn!("Bet from {} for {} rejected: {}", account, amount, e);
                Err(e)
            }
        }
    }

    /// Leave the matching pool and get the stake back
    pub fn cancel_bet(&self, account: &AccountId, amount: u64) -> BetResult<Account> {
        let entry = self.queue.cancel(account, amount)?;
        let refunded = match self.ledger.release_stake(&entry.escrow) {
            Ok(refunded) => refunded,
            Err(e) => {
                self.restore(entry);
                return Err(e);
            }
        };
        self.payments.forget(account, amount);
        info!("Bet from {} for {} cancelled", account, amount);
        self.hub.send(account, ServerEvent::BetCancelled { amount });
        Ok(refunded)
    }

    /// Request an invoice for a bet that will be placed once it is paid
    pub async fn create_bet(&self, account: &AccountId, amount: u64) -> BetResult<Invoice> {
        self.ledger.ensure_account(account);
        self.payments.create_bet(account, amount).await
    }

    /// Apply a provider payment confirmation: credit the funds, then bet them
    pub fn confirm_payment(
        &self,
        account: &AccountId,
        amount: u64,
        charge_ref: &str,
    ) -> BetResult<BetPlacement> {
        if amount == 0 {
            return Err(BetError::InvalidAmount(amount));
        }
        self.payments.claim_charge(charge_ref, account, amount)?;
        if let Err(e) = self.ledger.credit(account, amount) {
            self.payments.release_claim(charge_ref);
            return Err(e);
        }

        info!("💰 Payment {} credited {} to {}", charge_ref, amount, account);
        self.metrics.payments_confirmed.inc();
        self.payments.mark_confirmed(account, amount);
        self.hub.send(account, ServerEvent::PaymentSuccess { amount });

        self.place_bet(account, amount)
    }

    pub fn payment_status(&self, account: &AccountId, amount: u64) -> PaymentStatusView {
        PaymentStatusView {
            payment_confirmed: self.payments.status(account, amount) == Some(PaymentStatus::Confirmed),
            is_matching: self.queue.is_queued(account, amount),
        }
    }

    pub fn session(&self, id: SessionId) -> BetResult<Session> {
        self.sessions.get(id)
    }

    pub fn acknowledge_start(&self, id: SessionId) -> BetResult<Session> {
        self.sessions.mark_in_progress(id)
    }

    pub fn report_winner(&self, id: SessionId, winner: &AccountId) -> BetResult<Session> {
        let session = self.sessions.report_winner(id, winner)?;
        self.metrics.sessions_completed.inc();
        Ok(session)
    }

    pub fn abandon(&self, id: SessionId, reason: &str) -> BetResult<Session> {
        let session = self.sessions.abandon(id, reason)?;
        self.metrics.sessions_abandoned.inc();
        Ok(session)
    }

    /// Expire overdue bets, time out stalled sessions and trim the archive
    pub fn run_sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();

        for entry in self.queue.expire_all(self.config.matching.max_wait(), now) {
            match self.ledger.release_stake(&entry.escrow) {
                Ok(_) => {
                    info!("⏱️ Bet from {} for {} expired unmatched", entry.account, entry.stake);
                    self.payments.forget(&entry.account, entry.stake);
                    self.hub
                        .send(&entry.account, ServerEvent::MatchTimeout { amount: entry.stake });
                    report.expired_bets += 1;
                }
                Err(e) => {
                    warn!("Expired bet {} could not be refunded: {}", entry.escrow, e);
                    self.restore(entry);
                }
            }
        }
        self.metrics.bets_expired.inc_by(report.expired_bets as u64);

        if let Some(timeout) = self.config.sessions.session_timeout() {
            report.abandoned_sessions = self.sessions.abandon_stale(timeout, now).len();
            self.metrics
                .sessions_abandoned
                .inc_by(report.abandoned_sessions as u64);
        }

        report.purged_sessions = self
            .sessions
            .purge_archived(self.config.sessions.archive_retention(), now);
        report.purged_payments = self
            .payments
            .purge_stale(self.config.payments.invoice_ttl(), now);

        report
    }

    /// Put back an entry whose refund failed so its hold is not orphaned.
    /// An entry whose hold is already gone is rejected by the queue.
    fn restore(&self, entry: StakeEntry) {
        let (account, stake) = (entry.account.clone(), entry.stake);
        match self.queue.enqueue(entry) {
            Ok(EnqueueOutcome::Waiting) => {
                warn!("Bet from {} for {} returned to the queue", account, stake);
            }
            Ok(EnqueueOutcome::Matched(pair)) => {
                self.metrics.matches.inc();
                if let Ok(session) = self.start_session(pair) {
                    info!("Restored bet from {} matched into {}", account, session.id);
                }
            }
            Err(e) => warn!("Bet from {} for {} not restored: {}", account, stake, e),
        }
    }

    fn start_session(&self, pair: MatchedPair) -> BetResult<Session> {
        for entry in [&pair.first, &pair.second] {
            self.payments.forget(&entry.account, entry.stake);
        }
        match self.sessions.create_from_pair(&pair) {
            Ok(session) => Ok(session),
            Err(e) => {
                warn!(
                    "Session for {} vs {} not created: {}",
                    pair.first.account, pair.second.account, e
                );
                for entry in [&pair.first, &pair.second] {
                    if let Err(release) = self.ledger.release_stake(&entry.escrow) {
                        warn!("Could not refund {}: {}", entry.escrow, release);
                    }
                    self.hub.send(&entry.account, ServerEvent::error(&e));
                }
                Err(e)
            }
        }
    }
}
