//! Account balances and escrow holds
//!
//! The ledger is the only mutator of balances. Each account sits behind its
//! own lock so unrelated accounts never serialize behind each other; the two
//! operations that touch two accounts (`settle`, `release_pair`) take both
//! locks in account-id order.
//!
//! `max_balance` bounds an account's total (available plus escrowed). Only
//! credits and payouts can raise a total, so only those are checked; moving
//! funds into or out of escrow never fails on the cap.

use crate::common::traits::{EventSink, NullSink};
use crate::common::types::{AccountId, EscrowRef};
use crate::config::LedgerConfig;
use crate::errors::{BetError, BetResult};
use crate::events::ServerEvent;
use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Point-in-time view of one account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    pub id: AccountId,
    pub available_balance: u64,
    pub escrowed_balance: u64,
}

/// Sum of all balances held by the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LedgerTotals {
    pub available: u64,
    pub escrowed: u64,
}

impl LedgerTotals {
    /// Saturates at `u64::MAX` once enough accounts sit near the cap
    pub fn total(&self) -> u64 {
        self.available.saturating_add(self.escrowed)
    }
}

#[derive(Debug)]
struct AccountState {
    available: u64,
    escrowed: u64,
    holds: HashMap<Uuid, u64>,
}

impl AccountState {
    /// Never above `max_balance`, so escrow moves cannot overflow
    fn total(&self) -> u64 {
        self.available + self.escrowed
    }

    fn holds(&self, escrow: &EscrowRef) -> bool {
        self.holds.get(&escrow.id()) == Some(&escrow.amount())
    }

    /// Drop a hold that `holds` already confirmed
    fn consume(&mut self, escrow: &EscrowRef) {
        if let Some(amount) = self.holds.remove(&escrow.id()) {
            self.escrowed -= amount;
        }
    }

    fn snapshot(&self, id: &AccountId) -> Account {
        Account {
            id: id.clone(),
            available_balance: self.available,
            escrowed_balance: self.escrowed,
        }
    }
}

type AccountHandle = Arc<Mutex<AccountState>>;

/// Per-account balance ledger with escrow holds
pub struct Ledger {
    accounts: DashMap<AccountId, AccountHandle>,
    config: LedgerConfig,
    events: Arc<dyn EventSink>,
}

impl Ledger {
    pub fn new(config: LedgerConfig) -> Self {
        Self::with_events(config, Arc::new(NullSink))
    }

    /// Create a ledger that publishes `balance_update` after every change
    pub fn with_events(config: LedgerConfig, events: Arc<dyn EventSink>) -> Self {
        Self {
            accounts: DashMap::new(),
            config,
            events,
        }
    }

    /// Return the account, creating it with the starting balance if absent
    pub fn ensure_account(&self, id: &AccountId) -> Account {
        self.handle_or_create(id).lock().snapshot(id)
    }

    /// Look up an account without creating it
    pub fn account(&self, id: &AccountId) -> Option<Account> {
        self.handle(id).map(|handle| handle.lock().snapshot(id))
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    /// Increase the available balance (external payment confirmation)
    pub fn credit(&self, id: &AccountId, amount: u64) -> BetResult<Account> {
        if amount == 0 {
            return Err(BetError::InvalidAmount(amount));
        }

        let handle = self.handle_or_create(id);
        let account = {
            let mut state = handle.lock();
            self.checked_add(state.total(), amount)?;
            state.available += amount;
            state.snapshot(id)
        };

        info!("💰 Credited {} to {} (available {})", amount, id, account.available_balance);
        self.publish_balance(&account);
        Ok(account)
    }

    /// Move `amount` from available to escrow and return the hold reference
    ///
    /// The balance check and the move happen under the same account lock.
    pub fn place_stake(&self, id: &AccountId, amount: u64) -> BetResult<EscrowRef> {
        if amount == 0 {
            return Err(BetError::InvalidAmount(amount));
        }

        let handle = self.handle_or_create(id);
        let (escrow, account) = {
            let mut state = handle.lock();
            if state.available < amount {
                return Err(BetError::InsufficientFunds {
                    need: amount,
                    available: state.available,
                });
            }
            let escrow = EscrowRef::issue(id.clone(), amount);
            state.available -= amount;
            state.escrowed += amount;
            state.holds.insert(escrow.id(), amount);
            (escrow, state.snapshot(id))
        };

        debug!("Escrowed {} for {} ({})", amount, id, escrow);
        self.publish_balance(&account);
        Ok(escrow)
    }

    /// Amount still held under `escrow`; fails once it has been released or settled
    pub fn escrowed_amount(&self, escrow: &EscrowRef) -> BetResult<u64> {
        let handle = self
            .handle(escrow.account())
            .ok_or_else(|| BetError::UnknownEscrow(escrow.clone()))?;
        let state = handle.lock();
        if state.holds(escrow) {
            Ok(escrow.amount())
        } else {
            Err(BetError::UnknownEscrow(escrow.clone()))
        }
    }

    /// Return an escrow hold to the available balance
    pub fn release_stake(&self, escrow: &EscrowRef) -> BetResult<Account> {
        let handle = self
            .handle(escrow.account())
            .ok_or_else(|| BetError::UnknownEscrow(escrow.clone()))?;

        let account = {
            let mut state = handle.lock();
            if !state.holds(escrow) {
                return Err(BetError::UnknownEscrow(escrow.clone()));
            }
            state.consume(escrow);
            state.available += escrow.amount();
            state.snapshot(escrow.account())
        };

        debug!("Released {} back to {}", escrow, escrow.account());
        self.publish_balance(&account);
        Ok(account)
    }

    /// Release two holds together; either both are refunded or neither is
    pub fn release_pair(&self, first: &EscrowRef, second: &EscrowRef) -> BetResult<()> {
        if first.id() == second.id() {
            return Err(BetError::UnknownEscrow(second.clone()));
        }

        let accounts = self.with_pair(first, second, |a, b| {
            match b {
                None => {
                    if !a.holds(first) {
                        return Err(BetError::UnknownEscrow(first.clone()));
                    }
                    if !a.holds(second) {
                        return Err(BetError::UnknownEscrow(second.clone()));
                    }
                    a.consume(first);
                    a.consume(second);
                    a.available += first.amount() + second.amount();
                    Ok(vec![a.snapshot(first.account())])
                }
                Some(b) => {
                    if !a.holds(first) {
                        return Err(BetError::UnknownEscrow(first.clone()));
                    }
                    if !b.holds(second) {
                        return Err(BetError::UnknownEscrow(second.clone()));
                    }
                    a.consume(first);
                    a.available += first.amount();
                    b.consume(second);
                    b.available += second.amount();
                    Ok(vec![a.snapshot(first.account()), b.snapshot(second.account())])
                }
            }
        })?;

        for account in &accounts {
            self.publish_balance(account);
        }
        Ok(())
    }

    /// Consume both holds and credit `total_pot` to the winner
    ///
    /// The pot must equal the two holds combined, so settlement never creates
    /// or destroys funds. A winner whose total would pass `max_balance` is
    /// rejected before either hold is spent.
    pub fn settle(&self, winner: &EscrowRef, loser: &EscrowRef, total_pot: u64) -> BetResult<Account> {
        if winner.id() == loser.id() {
            return Err(BetError::AlreadySettled);
        }
        let expected_pot = winner
            .amount()
            .checked_add(loser.amount())
            .ok_or(BetError::InvalidAmount(total_pot))?;
        if total_pot != expected_pot {
            return Err(BetError::InvalidAmount(total_pot));
        }

        let accounts = self.with_pair(winner, loser, |w, l| {
            let held = match &l {
                None => w.holds(winner) && w.holds(loser),
                Some(l) => w.holds(winner) && l.holds(loser),
            };
            if !held {
                return Err(BetError::AlreadySettled);
            }

            match l {
                None => {
                    w.consume(winner);
                    w.consume(loser);
                    w.available += total_pot;
                    Ok(vec![w.snapshot(winner.account())])
                }
                Some(l) => {
                    self.checked_add(w.total(), loser.amount())?;
                    w.consume(winner);
                    l.consume(loser);
                    w.available += total_pot;
                    Ok(vec![w.snapshot(winner.account()), l.snapshot(loser.account())])
                }
            }
        })?;

        info!("🏆 Settled pot of {} to {}", total_pot, winner.account());
        for account in &accounts {
            self.publish_balance(account);
        }
        Ok(accounts[0].clone())
    }

    /// Sum of available and escrowed balances across all accounts
    pub fn totals(&self) -> LedgerTotals {
        let handles: Vec<AccountHandle> = self.accounts.iter().map(|e| e.value().clone()).collect();
        handles.iter().fold(LedgerTotals::default(), |acc, handle| {
            let state = handle.lock();
            LedgerTotals {
                available: acc.available.saturating_add(state.available),
                escrowed: acc.escrowed.saturating_add(state.escrowed),
            }
        })
    }

    fn handle(&self, id: &AccountId) -> Option<AccountHandle> {
        self.accounts.get(id).map(|entry| entry.value().clone())
    }

    fn handle_or_create(&self, id: &AccountId) -> AccountHandle {
        if let Some(handle) = self.handle(id) {
            return handle;
        }
        self.accounts
            .entry(id.clone())
            .or_insert_with(|| {
                debug!("Opening account {} with {}", id, self.config.starting_balance);
                Arc::new(Mutex::new(AccountState {
                    available: self.config.starting_balance,
                    escrowed: 0,
                    holds: HashMap::new(),
                }))
            })
            .clone()
    }

    /// Lock the accounts behind two holds in id order and run `f` on them.
    /// `f` receives `None` as its second argument when both holds belong to
    /// the same account.
    fn with_pair<R, F>(&self, first: &EscrowRef, second: &EscrowRef, f: F) -> BetResult<R>
    where
        F: FnOnce(&mut AccountState, Option<&mut AccountState>) -> BetResult<R>,
    {
        let missing = || BetError::UnknownEscrow(first.clone());
        let first_handle = self.handle(first.account()).ok_or_else(missing)?;

        if first.account() == second.account() {
            let mut guard = first_handle.lock();
            return f(&mut *guard, None);
        }

        let second_handle = self
            .handle(second.account())
            .ok_or_else(|| BetError::UnknownEscrow(second.clone()))?;

        let (mut a, mut b): (MutexGuard<'_, AccountState>, MutexGuard<'_, AccountState>) =
            if first.account() < second.account() {
                let a = first_handle.lock();
                let b = second_handle.lock();
                (a, b)
            } else {
                let b = second_handle.lock();
                let a = first_handle.lock();
                (a, b)
            };
        f(&mut *a, Some(&mut *b))
    }

    fn checked_add(&self, current: u64, amount: u64) -> BetResult<u64> {
        current
            .checked_add(amount)
            .filter(|total| *total <= self.config.max_balance)
            .ok_or(BetError::BalanceOverflow {
                current,
                amount,
                max: self.config.max_balance,
            })
    }

    fn publish_balance(&self, account: &Account) {
        self.events.publish(
            &account.id,
            ServerEvent::BalanceUpdate {
                balance: account.available_balance,
                escrowed: account.escrowed_balance,
            },
        );
    }
}
