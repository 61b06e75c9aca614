//! Game session lifecycle
//!
//! A session is created from a matched pair, watched while the external game
//! runs, and closed exactly once: either settled to a winner or abandoned
//! with both stakes refunded. Closed sessions stay readable until purged.

use crate::common::traits::EventSink;
use crate::common::types::{now, AccountId, EscrowRef, SessionId};
use crate::errors::{BetError, BetResult};
use crate::events::ServerEvent;
use crate::ledger::Ledger;
use crate::matching::MatchedPair;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Created and announced, not yet acknowledged by the game
    Starting,
    InProgress,
    Completed,
    Abandoned,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SessionStatus::Completed | SessionStatus::Abandoned)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: SessionId,
    pub player1: AccountId,
    pub player2: AccountId,
    pub stake: u64,
    pub pot: u64,
    pub status: SessionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<AccountId>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub abandon_reason: Option<String>,
    #[serde(skip)]
    escrows: (EscrowRef, EscrowRef),
}

impl Session {
    pub fn is_player(&self, account: &AccountId) -> bool {
        &self.player1 == account || &self.player2 == account
    }

    /// (winner hold, loser hold) for a member account
    fn holds_for(&self, winner: &AccountId) -> Option<(&EscrowRef, &EscrowRef)> {
        if &self.player1 == winner {
            Some((&self.escrows.0, &self.escrows.1))
        } else if &self.player2 == winner {
            Some((&self.escrows.1, &self.escrows.0))
        } else {
            None
        }
    }

    fn players(&self) -> [&AccountId; 2] {
        [&self.player1, &self.player2]
    }
}

type SessionHandle = Arc<Mutex<Session>>;

pub struct SessionManager {
    sessions: DashMap<SessionId, SessionHandle>,
    ledger: Arc<Ledger>,
    events: Arc<dyn EventSink>,
}

impl SessionManager {
    pub fn new(ledger: Arc<Ledger>, events: Arc<dyn EventSink>) -> Self {
        Self {
            sessions: DashMap::new(),
            ledger,
            events,
        }
    }

    /// Open a session for a matched pair and announce it to both players
    pub fn create_from_pair(&self, pair: &MatchedPair) -> BetResult<Session> {
        let (first, second) = (&pair.first, &pair.second);
        if first.stake != second.stake {
            return Err(BetError::StakeMismatch {
                left: first.stake,
                right: second.stake,
            });
        }
        if first.account == second.account {
            return Err(BetError::AlreadyQueued {
                account: first.account.clone(),
                stake: first.stake,
            });
        }
        self.ledger.escrowed_amount(&first.escrow)?;
        self.ledger.escrowed_amount(&second.escrow)?;

        let pot = first
            .stake
            .checked_mul(2)
            .ok_or(BetError::InvalidAmount(first.stake))?;

        let session = Session {
            id: SessionId::generate(),
            player1: first.account.clone(),
            player2: second.account.clone(),
            stake: first.stake,
            pot,
            status: SessionStatus::Starting,
            winner: None,
            created_at: now(),
            completed_at: None,
            abandon_reason: None,
            escrows: (first.escrow.clone(), second.escrow.clone()),
        };

        self.sessions
            .insert(session.id, Arc::new(Mutex::new(session.clone())));
        info!(
            "🎮 Session {} started: {} vs {} for {}",
            session.id, session.player1, session.player2, pot
        );

        let start = ServerEvent::GameStart {
            game_id: session.id,
            player1_id: session.player1.clone(),
            player2_id: session.player2.clone(),
            stake: session.stake,
            pot,
        };
        for player in session.players() {
            self.events.publish(player, start.clone());
        }

        Ok(session)
    }

    /// Record that the external game has picked the session up
    pub fn mark_in_progress(&self, id: SessionId) -> BetResult<Session> {
        let handle = self.handle(id)?;
        let mut session = handle.lock();
        match session.status {
            SessionStatus::Starting => {
                session.status = SessionStatus::InProgress;
                Ok(session.clone())
            }
            SessionStatus::InProgress => Ok(session.clone()),
            _ => Err(BetError::SessionNotActive(id)),
        }
    }

    /// Settle the session to `winner`, paying them the whole pot
    ///
    /// A repeated report fails with `AlreadySettled` for as long as the
    /// session is archived. Once `purge_archived` drops it the id is
    /// `UnknownSession`; either way nothing is paid twice, because the holds
    /// are gone.
    pub fn report_winner(&self, id: SessionId, winner: &AccountId) -> BetResult<Session> {
        let handle = self.handle(id)?;
        let closed = {
            let mut session = handle.lock();
            match session.status {
                SessionStatus::Completed => return Err(BetError::AlreadySettled),
                SessionStatus::Abandoned => return Err(BetError::SessionNotActive(id)),
                _ => {}
            }

            let (winner_hold, loser_hold) =
                session
                    .holds_for(winner)
                    .ok_or_else(|| BetError::InvalidWinner {
                        session: id,
                        winner: winner.clone(),
                    })?;
            self.ledger.settle(winner_hold, loser_hold, session.pot)?;

            session.status = SessionStatus::Completed;
            session.winner = Some(winner.clone());
            session.completed_at = Some(now());
            session.clone()
        };

        info!("🏆 Session {} won by {} ({})", id, winner, closed.pot);
        let over = ServerEvent::GameOver {
            game_id: id,
            winner_id: winner.clone(),
            pot: closed.pot,
        };
        for player in closed.players() {
            self.events.publish(player, over.clone());
        }

        Ok(closed)
    }

    /// Close the session without a winner and refund both stakes
    pub fn abandon(&self, id: SessionId, reason: &str) -> BetResult<Session> {
        let handle = self.handle(id)?;
        let closed = {
            let mut session = handle.lock();
            if session.status.is_terminal() {
                return Err(BetError::SessionNotActive(id));
            }

            self.ledger
                .release_pair(&session.escrows.0, &session.escrows.1)?;

            session.status = SessionStatus::Abandoned;
            session.abandon_reason = Some(reason.to_string());
            session.completed_at = Some(now());
            session.clone()
        };

        warn!("Session {} abandoned: {}", id, reason);
        let abandoned = ServerEvent::GameAbandoned {
            game_id: id,
            reason: reason.to_string(),
        };
        for player in closed.players() {
            self.events.publish(player, abandoned.clone());
        }

        Ok(closed)
    }

    pub fn get(&self, id: SessionId) -> BetResult<Session> {
        Ok(self.handle(id)?.lock().clone())
    }

    /// Open sessions the account is playing in
    pub fn active_for(&self, account: &AccountId) -> Vec<Session> {
        self.snapshot()
            .into_iter()
            .filter(|s| !s.status.is_terminal() && s.is_player(account))
            .collect()
    }

    pub fn active_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|s| !s.status.is_terminal())
            .count()
    }

    /// Abandon every open session older than `timeout`
    pub fn abandon_stale(&self, timeout: Duration, now: DateTime<Utc>) -> Vec<Session> {
        let stale: Vec<SessionId> = self
            .snapshot()
            .into_iter()
            .filter(|s| !s.status.is_terminal() && elapsed(s.created_at, now) >= Some(timeout))
            .map(|s| s.id)
            .collect();

        stale
            .into_iter()
            // A session settled between the snapshot and here is skipped
            .filter_map(|id| self.abandon(id, "timed out").ok())
            .collect()
    }

    /// Drop closed sessions that finished more than `retention` ago
    pub fn purge_archived(&self, retention: Duration, now: DateTime<Utc>) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, handle| {
            let session = handle.lock();
            match (session.status.is_terminal(), session.completed_at) {
                (true, Some(done)) => elapsed(done, now).map_or(true, |age| age < retention),
                _ => true,
            }
        });
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn handle(&self, id: SessionId) -> BetResult<SessionHandle> {
        self.sessions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(BetError::UnknownSession(id))
    }

    fn snapshot(&self) -> Vec<Session> {
        let handles: Vec<SessionHandle> =
            self.sessions.iter().map(|e| e.value().clone()).collect();
        handles.iter().map(|h| h.lock().clone()).collect()
    }
}

fn elapsed(since: DateTime<Utc>, now: DateTime<Utc>) -> Option<Duration> {
    (now - since).to_std().ok()
}
