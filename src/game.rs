use crate::pair::{
    PairKey,
    UserId,
};
use chrono::{
    DateTime,
    Duration,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

/// How long the non-initiating party has to reply before the round ends.
pub const ROUND_DURATION_SECS: i64 = 5 * 60;

/// Grace period for the peer to stake back once a single-sided depositor
/// has started chatting.
pub const REFUND_GRACE_SECS: i64 = 5 * 60;

pub fn round_duration() -> Duration {
    Duration::seconds(ROUND_DURATION_SECS)
}

pub fn refund_grace() -> Duration {
    Duration::seconds(REFUND_GRACE_SECS)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    /// The sender has not staked for this pair yet.
    DepositRequired,
    /// The user is not one of the pair's two participants.
    NotParticipant(UserId),
}

impl fmt::Display for GameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameError::DepositRequired => {
                f.write_str("deposit required before sending messages")
            }
            GameError::NotParticipant(user) => {
                write!(f, "user {user} is not a participant of this pair")
            }
        }
    }
}

impl std::error::Error for GameError {}

/// Main round state. `Running` always carries both timestamps and `Ended`
/// always carries the winner, so the timing invariants hold structurally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RoundState {
    Idle,
    Running {
        started_by: UserId,
        started_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    Ended {
        winner: UserId,
    },
}

/// Tracks "one party staked and chatted, the peer never staked back".
/// Independent of the main round timer and cleared whenever a round starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundTimer {
    pub started_by: UserId,
    pub started_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// One record per canonical user pair. Deposit flags are two fixed slots
/// keyed by the same ordering as the pair and are monotonic: once set they
/// are never reverted within the record's lifetime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub pair: PairKey,
    pub deposit_a: bool,
    pub deposit_b: bool,
    pub round: RoundState,
    pub refund_timer: Option<RefundTimer>,
    /// Set once the sweep fires the refund timer; a fired timer never
    /// restarts for this record.
    pub refund_timer_fired: bool,
    /// Persistence revision used for conflict detection on save.
    pub revision: u64,
}

/// What a recorded message event did to the round state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    RoundStarted {
        started_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    RoundStopped,
    RefundTimerStarted {
        expires_at: DateTime<Utc>,
    },
    NoChange,
}

impl GameRecord {
    pub fn new(pair: PairKey) -> Self {
        Self {
            pair,
            deposit_a: false,
            deposit_b: false,
            round: RoundState::Idle,
            refund_timer: None,
            refund_timer_fired: false,
            revision: 0,
        }
    }

    pub fn deposited(&self, user: &UserId) -> bool {
        if user == self.pair.a() {
            self.deposit_a
        } else if user == self.pair.b() {
            self.deposit_b
        } else {
            false
        }
    }

    pub fn both_deposited(&self) -> bool {
        self.deposit_a && self.deposit_b
    }

    /// Record a confirmed deposit. No round transition by itself. Returns
    /// whether the flag was newly set.
    pub fn record_deposit(&mut self, user: &UserId) -> Result<bool, GameError> {
        let slot = if user == self.pair.a() {
            &mut self.deposit_a
        } else if user == self.pair.b() {
            &mut self.deposit_b
        } else {
            return Err(GameError::NotParticipant(user.clone()));
        };
        let newly_set = !*slot;
        *slot = true;
        Ok(newly_set)
    }

    /// Record a message event from `sender` at `now` and apply the round
    /// transition it triggers, if any. The record is left untouched on error.
    pub fn record_message(
        &mut self,
        sender: &UserId,
        now: DateTime<Utc>,
    ) -> Result<MessageOutcome, GameError> {
        if !self.pair.contains(sender) {
            return Err(GameError::NotParticipant(sender.clone()));
        }
        if !self.deposited(sender) {
            return Err(GameError::DepositRequired);
        }

        if self.both_deposited() {
            match &self.round {
                RoundState::Running {
                    started_by,
                    expires_at,
                    ..
                } => {
                    if sender != started_by && now < *expires_at {
                        // The non-initiating party replied in time.
                        self.round = RoundState::Idle;
                        Ok(MessageOutcome::RoundStopped)
                    } else {
                        // Same sender never restarts or extends the round,
                        // and a round past expiry belongs to the sweep.
                        Ok(MessageOutcome::NoChange)
                    }
                }
                // Idle or ended: the message opens a fresh round.
                _ => {
                    let expires_at = now + round_duration();
                    self.round = RoundState::Running {
                        started_by: sender.clone(),
                        started_at: now,
                        expires_at,
                    };
                    self.refund_timer = None;
                    Ok(MessageOutcome::RoundStarted {
                        started_at: now,
                        expires_at,
                    })
                }
            }
        } else {
            // Sender staked, peer did not. Give the peer a grace period to
            // stake back, unless a timer is active or already fired once.
            if self.refund_timer.is_none() && !self.refund_timer_fired {
                let expires_at = now + refund_grace();
                self.refund_timer = Some(RefundTimer {
                    started_by: sender.clone(),
                    started_at: now,
                    expires_at,
                });
                Ok(MessageOutcome::RefundTimerStarted { expires_at })
            } else {
                Ok(MessageOutcome::NoChange)
            }
        }
    }

    /// End a running round past its deadline. Returns the winner when the
    /// transition applied; a no-op otherwise, so sweeps can re-run safely.
    pub fn expire_round(&mut self, now: DateTime<Utc>) -> Option<UserId> {
        if let RoundState::Running {
            started_by,
            expires_at,
            ..
        } = &self.round
        {
            if now >= *expires_at {
                let winner = started_by.clone();
                self.round = RoundState::Ended {
                    winner: winner.clone(),
                };
                return Some(winner);
            }
        }
        None
    }

    /// Fire a refund timer past its deadline. Returns the original depositor
    /// now eligible for a refund; the eligibility itself is a signal for the
    /// settlement layer, not record state.
    pub fn expire_refund_timer(&mut self, now: DateTime<Utc>) -> Option<UserId> {
        match &self.refund_timer {
            Some(timer) if now >= timer.expires_at => {
                let depositor = timer.started_by.clone();
                self.refund_timer = None;
                self.refund_timer_fired = true;
                Some(depositor)
            }
            _ => None,
        }
    }

    /// Full public projection of the record, stamped with the server clock
    /// so clients can derive countdowns against the absolute deadline.
    pub fn status(&self, now: DateTime<Utc>) -> GameStatus {
        let (state, started_by, started_at, expires_at, winner) = match &self.round {
            RoundState::Idle => (RoundPhase::Idle, None, None, None, None),
            RoundState::Running {
                started_by,
                started_at,
                expires_at,
            } => (
                RoundPhase::Running,
                Some(started_by.clone()),
                Some(*started_at),
                Some(*expires_at),
                None,
            ),
            RoundState::Ended { winner } => {
                (RoundPhase::Ended, None, None, None, Some(winner.clone()))
            }
        };
        GameStatus {
            user_a: self.pair.a().clone(),
            user_b: self.pair.b().clone(),
            deposit_a: self.deposit_a,
            deposit_b: self.deposit_b,
            state,
            started_by,
            started_at,
            expires_at,
            winner,
            refund_timer_started_by: self
                .refund_timer
                .as_ref()
                .map(|timer| timer.started_by.clone()),
            refund_timer_expires_at: self
                .refund_timer
                .as_ref()
                .map(|timer| timer.expires_at),
            now,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundPhase {
    Idle,
    Running,
    Ended,
}

/// Wire projection returned by the status query and consumed by the client
/// cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStatus {
    pub user_a: UserId,
    pub user_b: UserId,
    pub deposit_a: bool,
    pub deposit_b: bool,
    pub state: RoundPhase,
    pub started_by: Option<UserId>,
    pub started_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
    pub winner: Option<UserId>,
    pub refund_timer_started_by: Option<UserId>,
    pub refund_timer_expires_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}
