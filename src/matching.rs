//! Stake-bucket matching queue
//!
//! Waiting bettors are grouped by stake amount. Each bucket is a FIFO behind
//! its own lock: appending an entry and popping a pair happen in one critical
//! section, so two concurrent `enqueue` calls can neither pair the same entry
//! twice nor both miss a pair that exists. A popped pair is owned by the
//! caller alone; nothing else can reach its escrows.
//!
//! A bucket that becomes empty is dropped from the map while its lock is
//! still held. Anyone who fetched that bucket earlier finds it retired once
//! they get the lock and looks it up again.

use crate::common::types::{AccountId, EscrowRef};
use crate::errors::{BetError, BetResult};
use crate::ledger::Ledger;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// One account waiting for an opponent at a given stake
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StakeEntry {
    pub account: AccountId,
    pub stake: u64,
    pub enqueued_at: DateTime<Utc>,
    #[serde(skip)]
    pub escrow: EscrowRef,
}

impl StakeEntry {
    /// Build an entry for the account and amount held by `escrow`
    pub fn new(escrow: EscrowRef, enqueued_at: DateTime<Utc>) -> Self {
        Self {
            account: escrow.account().clone(),
            stake: escrow.amount(),
            enqueued_at,
            escrow,
        }
    }

    /// Whether this entry has waited at least `max_wait` as of `now`
    pub fn is_overdue(&self, max_wait: Duration, now: DateTime<Utc>) -> bool {
        (now - self.enqueued_at)
            .to_std()
            .map(|waited| waited >= max_wait)
            .unwrap_or(false)
    }
}

/// Two entries removed from a bucket together, earliest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchedPair {
    pub first: StakeEntry,
    pub second: StakeEntry,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// The entry stays queued
    Waiting,
    Matched(MatchedPair),
}

type Bucket = Arc<Mutex<VecDeque<StakeEntry>>>;

/// Per-stake FIFO of waiting bettors
pub struct MatchQueue {
    buckets: DashMap<u64, Bucket>,
    ledger: Arc<Ledger>,
}

impl MatchQueue {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self {
            buckets: DashMap::new(),
            ledger,
        }
    }

    /// Append `entry` to its bucket and pop the two earliest entries if the
    /// bucket now holds a pair
    pub fn enqueue(&self, entry: StakeEntry) -> BetResult<EnqueueOutcome> {
        if entry.stake == 0 {
            return Err(BetError::InvalidAmount(0));
        }
        if entry.escrow.account() != &entry.account {
            return Err(BetError::UnknownEscrow(entry.escrow.clone()));
        }
        let held = self.ledger.escrowed_amount(&entry.escrow)?;
        if held != entry.stake {
            return Err(BetError::StakeMismatch {
                left: entry.stake,
                right: held,
            });
        }

        self.with_bucket(entry.stake, |queue| Self::insert_and_pair(queue, entry))
    }

    fn insert_and_pair(
        queue: &mut VecDeque<StakeEntry>,
        entry: StakeEntry,
    ) -> BetResult<EnqueueOutcome> {
        if queue.iter().any(|queued| queued.account == entry.account) {
            return Err(BetError::AlreadyQueued {
                account: entry.account,
                stake: entry.stake,
            });
        }

        // Stable insert: after every entry with the same or an earlier timestamp
        let position = queue.partition_point(|queued| queued.enqueued_at <= entry.enqueued_at);
        debug!("Queued {} at stake {} (position {})", entry.account, entry.stake, position);
        queue.insert(position, entry);

        if queue.len() < 2 {
            return Ok(EnqueueOutcome::Waiting);
        }

        match (queue.pop_front(), queue.pop_front()) {
            (Some(first), Some(second)) => {
                info!(
                    "🎲 Matched {} vs {} at stake {}",
                    first.account, second.account, first.stake
                );
                Ok(EnqueueOutcome::Matched(MatchedPair { first, second }))
            }
            (first, _) => {
                if let Some(first) = first {
                    queue.push_front(first);
                }
                Ok(EnqueueOutcome::Waiting)
            }
        }
    }

    /// Remove the account's waiting entry at `stake`
    pub fn cancel(&self, account: &AccountId, stake: u64) -> BetResult<StakeEntry> {
        let not_queued = || BetError::NotQueued {
            account: account.clone(),
            stake,
        };
        self.with_existing_bucket(stake, |queue| {
            let index = queue
                .iter()
                .position(|queued| &queued.account == account)
                .ok_or_else(not_queued)?;
            queue.remove(index).ok_or_else(not_queued)
        })
        .unwrap_or_else(|| Err(not_queued()))
    }

    /// Remove the account's entry at `stake` if it has waited at least
    /// `max_wait`. Returns `None` while the entry is still inside its window.
    /// The caller must release the returned entry's escrow.
    pub fn expire(
        &self,
        account: &AccountId,
        stake: u64,
        max_wait: Duration,
        now: DateTime<Utc>,
    ) -> BetResult<Option<StakeEntry>> {
        let not_queued = || BetError::NotQueued {
            account: account.clone(),
            stake,
        };
        self.with_existing_bucket(stake, |queue| {
            let index = queue
                .iter()
                .position(|queued| &queued.account == account)
                .ok_or_else(not_queued)?;

            if !queue[index].is_overdue(max_wait, now) {
                return Ok(None);
            }
            Ok(queue.remove(index))
        })
        .unwrap_or_else(|| Err(not_queued()))
    }

    /// Remove every entry, in every bucket, that has waited at least `max_wait`
    pub fn expire_all(&self, max_wait: Duration, now: DateTime<Utc>) -> Vec<StakeEntry> {
        let buckets: Vec<(u64, Bucket)> = self
            .buckets
            .iter()
            .map(|b| (*b.key(), b.value().clone()))
            .collect();
        let mut expired = Vec::new();

        for (stake, bucket) in buckets {
            let mut queue = bucket.lock();
            // Sorted by enqueue time, so overdue entries form a prefix
            while queue
                .front()
                .map(|front| front.is_overdue(max_wait, now))
                .unwrap_or(false)
            {
                if let Some(entry) = queue.pop_front() {
                    expired.push(entry);
                }
            }
            self.retire_if_empty(stake, &bucket, &queue);
        }

        expired
    }

    pub fn is_queued(&self, account: &AccountId, stake: u64) -> bool {
        self.existing_bucket(stake)
            .map(|bucket| bucket.lock().iter().any(|queued| &queued.account == account))
            .unwrap_or(false)
    }

    /// Number of entries waiting at `stake`
    pub fn waiting(&self, stake: u64) -> usize {
        self.existing_bucket(stake)
            .map(|bucket| bucket.lock().len())
            .unwrap_or(0)
    }

    /// Total entries waiting across all buckets
    pub fn len(&self) -> usize {
        let buckets: Vec<Bucket> = self.buckets.iter().map(|b| b.value().clone()).collect();
        buckets.iter().map(|bucket| bucket.lock().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stake levels that currently have someone waiting
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Run `f` on the live bucket for `stake`, creating it if needed
    fn with_bucket<R>(&self, stake: u64, f: impl FnOnce(&mut VecDeque<StakeEntry>) -> R) -> R {
        loop {
            let bucket = match self.existing_bucket(stake) {
                Some(bucket) => bucket,
                None => self.buckets.entry(stake).or_default().clone(),
            };
            let mut queue = bucket.lock();
            if !self.is_live(stake, &bucket) {
                continue;
            }
            let result = f(&mut queue);
            self.retire_if_empty(stake, &bucket, &queue);
            return result;
        }
    }

    /// Run `f` on the live bucket for `stake`; `None` if there is none
    fn with_existing_bucket<R>(
        &self,
        stake: u64,
        f: impl FnOnce(&mut VecDeque<StakeEntry>) -> R,
    ) -> Option<R> {
        loop {
            let bucket = self.existing_bucket(stake)?;
            let mut queue = bucket.lock();
            if !self.is_live(stake, &bucket) {
                continue;
            }
            let result = f(&mut queue);
            self.retire_if_empty(stake, &bucket, &queue);
            return Some(result);
        }
    }

    // Called with the bucket's lock held
    fn retire_if_empty(&self, stake: u64, bucket: &Bucket, queue: &VecDeque<StakeEntry>) {
        if queue.is_empty() {
            self.buckets
                .remove_if(&stake, |_, current| Arc::ptr_eq(current, bucket));
        }
    }

    fn is_live(&self, stake: u64, bucket: &Bucket) -> bool {
        self.buckets
            .get(&stake)
            .map(|current| Arc::ptr_eq(current.value(), bucket))
            .unwrap_or(false)
    }

    fn existing_bucket(&self, stake: u64) -> Option<Bucket> {
        self.buckets.get(&stake).map(|b| b.value().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use chrono::Duration as ChronoDuration;

    fn setup() -> (Arc<Ledger>, MatchQueue) {
        let ledger = Arc::new(Ledger::new(LedgerConfig::default()));
        let queue = MatchQueue::new(Arc::clone(&ledger));
        (ledger, queue)
    }

    fn entry(ledger: &Ledger, account: &str, stake: u64, at: DateTime<Utc>) -> StakeEntry {
        let escrow = ledger.place_stake(&AccountId::from(account), stake).unwrap();
        StakeEntry::new(escrow, at)
    }

    #[test]
    fn test_single_entry_waits() {
        let (ledger, queue) = setup();
        let x = entry(&ledger, "x", 200, Utc::now());

        assert_eq!(queue.enqueue(x).unwrap(), EnqueueOutcome::Waiting);
        assert!(queue.is_queued(&AccountId::from("x"), 200));
        assert_eq!(queue.waiting(200), 1);
    }

    #[test]
    fn test_second_entry_matches() {
        let (ledger, queue) = setup();
        let now = Utc::now();
        queue.enqueue(entry(&ledger, "x", 200, now)).unwrap();

        match queue.enqueue(entry(&ledger, "y", 200, now)).unwrap() {
            EnqueueOutcome::Matched(pair) => {
                assert_eq!(pair.first.account, AccountId::from("x"));
                assert_eq!(pair.second.account, AccountId::from("y"));
            }
            other => panic!("expected a match, got {:?}", other),
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_different_stakes_do_not_match() {
        let (ledger, queue) = setup();
        let now = Utc::now();
        queue.enqueue(entry(&ledger, "x", 200, now)).unwrap();
        let outcome = queue.enqueue(entry(&ledger, "y", 300, now)).unwrap();

        assert_eq!(outcome, EnqueueOutcome::Waiting);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_fifo_by_enqueue_time() {
        let (ledger, queue) = setup();
        let t1 = Utc::now();
        let t2 = t1 + ChronoDuration::seconds(1);

        // Inserted out of order; the earlier timestamp still pairs first
        queue.enqueue(entry(&ledger, "late", 100, t2)).unwrap();
        let pair = match queue.enqueue(entry(&ledger, "early", 100, t1)).unwrap() {
            EnqueueOutcome::Matched(pair) => pair,
            other => panic!("expected a match, got {:?}", other),
        };

        assert_eq!(pair.first.account, AccountId::from("early"));
        assert_eq!(pair.second.account, AccountId::from("late"));
    }

    #[test]
    fn test_three_entries_pair_first_two() {
        let (ledger, queue) = setup();
        let t1 = Utc::now();
        let t2 = t1 + ChronoDuration::seconds(1);
        let t3 = t1 + ChronoDuration::seconds(2);

        queue.enqueue(entry(&ledger, "a", 100, t1)).unwrap();
        let pair = match queue.enqueue(entry(&ledger, "b", 100, t2)).unwrap() {
            EnqueueOutcome::Matched(pair) => pair,
            other => panic!("expected a match, got {:?}", other),
        };
        assert_eq!(
            (pair.first.account.as_str(), pair.second.account.as_str()),
            ("a", "b")
        );

        assert_eq!(
            queue.enqueue(entry(&ledger, "c", 100, t3)).unwrap(),
            EnqueueOutcome::Waiting
        );
        assert!(queue.is_queued(&AccountId::from("c"), 100));
    }

    #[test]
    fn test_same_account_cannot_queue_twice() {
        let (ledger, queue) = setup();
        let now = Utc::now();
        queue.enqueue(entry(&ledger, "x", 200, now)).unwrap();

        let result = queue.enqueue(entry(&ledger, "x", 200, now));
        assert!(matches!(result, Err(BetError::AlreadyQueued { .. })));
        assert_eq!(queue.waiting(200), 1);
    }

    #[test]
    fn test_enqueue_requires_live_escrow() {
        let (ledger, queue) = setup();
        let x = entry(&ledger, "x", 200, Utc::now());
        ledger.release_stake(&x.escrow).unwrap();

        assert!(matches!(queue.enqueue(x), Err(BetError::UnknownEscrow(_))));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_rejects_forged_stake() {
        let (ledger, queue) = setup();
        let mut x = entry(&ledger, "x", 200, Utc::now());
        x.stake = 100;

        assert_eq!(
            queue.enqueue(x),
            Err(BetError::StakeMismatch { left: 100, right: 200 })
        );
    }

    #[test]
    fn test_cancel_twice_is_not_queued() {
        let (ledger, queue) = setup();
        queue.enqueue(entry(&ledger, "x", 200, Utc::now())).unwrap();

        let removed = queue.cancel(&AccountId::from("x"), 200).unwrap();
        assert_eq!(removed.stake, 200);
        assert!(matches!(
            queue.cancel(&AccountId::from("x"), 200),
            Err(BetError::NotQueued { .. })
        ));
        assert!(matches!(
            queue.cancel(&AccountId::from("x"), 999),
            Err(BetError::NotQueued { .. })
        ));
    }

    #[test]
    fn test_expire_respects_window() {
        let (ledger, queue) = setup();
        let start = Utc::now();
        queue.enqueue(entry(&ledger, "x", 300, start)).unwrap();
        let x = AccountId::from("x");
        let max_wait = Duration::from_secs(120);

        let early = start + ChronoDuration::seconds(60);
        assert_eq!(queue.expire(&x, 300, max_wait, early).unwrap(), None);

        let late = start + ChronoDuration::seconds(121);
        let expired = queue.expire(&x, 300, max_wait, late).unwrap().unwrap();
        assert_eq!(expired.account, x);
        assert!(matches!(
            queue.expire(&x, 300, max_wait, late),
            Err(BetError::NotQueued { .. })
        ));
    }

    #[test]
    fn test_expire_all_only_takes_overdue() {
        let (ledger, queue) = setup();
        let start = Utc::now();
        queue.enqueue(entry(&ledger, "old", 100, start)).unwrap();
        queue.enqueue(entry(&ledger, "older", 500, start)).unwrap();
        queue
            .enqueue(entry(&ledger, "fresh", 700, start + ChronoDuration::seconds(100)))
            .unwrap();

        let expired = queue.expire_all(Duration::from_secs(120), start + ChronoDuration::seconds(130));
        let mut accounts: Vec<&str> = expired.iter().map(|e| e.account.as_str()).collect();
        accounts.sort();

        assert_eq!(accounts, vec!["old", "older"]);
        assert!(queue.is_queued(&AccountId::from("fresh"), 700));
    }

    #[test]
    fn test_empty_buckets_are_dropped() {
        let (ledger, queue) = setup();
        let x = AccountId::from("x");
        let now = Utc::now();

        for stake in 1..=500u64 {
            queue.enqueue(entry(&ledger, "x", stake, now)).unwrap();
            let removed = queue.cancel(&x, stake).unwrap();
            ledger.release_stake(&removed.escrow).unwrap();
        }
        assert!(queue.is_empty());
        assert_eq!(queue.bucket_count(), 0);

        queue.enqueue(entry(&ledger, "a", 10, now)).unwrap();
        queue.enqueue(entry(&ledger, "b", 10, now)).unwrap();
        assert_eq!(queue.bucket_count(), 0);

        queue.enqueue(entry(&ledger, "c", 20, now)).unwrap();
        queue.enqueue(entry(&ledger, "d", 30, now + ChronoDuration::seconds(200))).unwrap();
        assert_eq!(queue.bucket_count(), 2);
        queue.expire_all(Duration::from_secs(120), now + ChronoDuration::seconds(150));
        assert_eq!(queue.bucket_count(), 1);
        assert!(queue.is_queued(&AccountId::from("d"), 30));
    }

    #[test]
    fn test_bucket_reused_after_drop() {
        let (ledger, queue) = setup();
        let now = Utc::now();
        queue.enqueue(entry(&ledger, "x", 100, now)).unwrap();
        queue.cancel(&AccountId::from("x"), 100).unwrap();

        queue.enqueue(entry(&ledger, "y", 100, now)).unwrap();
        assert!(matches!(
            queue.enqueue(entry(&ledger, "z", 100, now)).unwrap(),
            EnqueueOutcome::Matched(_)
        ));
    }

    #[test]
    fn test_concurrent_enqueue_and_cancel_across_buckets() {
        let ledger = Arc::new(Ledger::new(LedgerConfig::default()));
        let queue = Arc::new(MatchQueue::new(Arc::clone(&ledger)));

        let threads: Vec<_> = (0..32)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let account = AccountId::new(format!("p{}", i));
                    for round in 0..20u64 {
                        let stake = 1 + (round % 4);
                        let escrow = ledger.place_stake(&account, stake).unwrap();
                        match queue.enqueue(StakeEntry::new(escrow, Utc::now())).unwrap() {
                            EnqueueOutcome::Matched(pair) => {
                                ledger.release_pair(&pair.first.escrow, &pair.second.escrow).unwrap();
                            }
                            EnqueueOutcome::Waiting => {
                                // Lost to a concurrent match if this fails
                                if let Ok(entry) = queue.cancel(&account, stake) {
                                    ledger.release_stake(&entry.escrow).unwrap();
                                }
                            }
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }

        assert!(queue.is_empty());
        assert_eq!(queue.bucket_count(), 0);
        assert_eq!(ledger.totals().escrowed, 0);
    }

    #[test]
    fn test_concurrent_enqueue_pairs_everyone_once() {
        let ledger = Arc::new(Ledger::new(LedgerConfig::default()));
        let queue = Arc::new(MatchQueue::new(Arc::clone(&ledger)));

        let threads: Vec<_> = (0..64)
            .map(|i| {
                let ledger = Arc::clone(&ledger);
                let queue = Arc::clone(&queue);
                std::thread::spawn(move || {
                    let account = AccountId::new(format!("p{}", i));
                    let escrow = ledger.place_stake(&account, 50).unwrap();
                    match queue.enqueue(StakeEntry::new(escrow, Utc::now())).unwrap() {
                        EnqueueOutcome::Matched(pair) => vec![pair.first.account, pair.second.account],
                        EnqueueOutcome::Waiting => vec![],
                    }
                })
            })
            .collect();

        let mut matched: Vec<AccountId> = threads
            .into_iter()
            .flat_map(|t| t.join().unwrap())
            .collect();
        let total = matched.len();
        matched.sort();
        matched.dedup();

        assert_eq!(total, 64);
        assert_eq!(matched.len(), 64);
        assert!(queue.is_empty());
    }
}
