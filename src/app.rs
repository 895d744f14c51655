use crate::{
    app::{
        game_api::{
            Command,
            CommandError,
            GameApi,
        },
        game_store::{
            GameStore,
            PersistOutcome,
        },
        notifier::Notifier,
    },
    game::{
        GameError,
        GameRecord,
        GameStatus,
        MessageOutcome,
    },
    pair::{
        PairError,
        PairKey,
        UserId,
    },
    push::PushEvent,
};
use chrono::{
    DateTime,
    Utc,
};
use tokio::time::{
    Interval,
    MissedTickBehavior,
};

pub mod actix_api;
pub mod game_api;
pub mod game_store;
pub mod in_memory_store;
pub mod notifier;
pub mod sled_store;

#[cfg(test)]
mod tests;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .try_init();
}

pub enum RunState {
    Continue,
    Exit,
}

/// Single-threaded loop owning the record store: requests arrive as commands
/// from the HTTP surface, the expiry sweep runs as an interval tick on the
/// same loop, so transitions are applied one record at a time without locks.
pub struct App<Store, Api, Push> {
    store: Store,
    api: Api,
    notifier: Push,
    sweep: Interval,
}

impl<Store, Api, Push> App<Store, Api, Push> {
    pub fn new(
        store: Store,
        api: Api,
        notifier: Push,
        sweep_period: std::time::Duration,
    ) -> Self {
        let mut sweep = tokio::time::interval(sweep_period);
        // The sweep shares the loop with request handling, so ticks can
        // never overlap; skipping missed ones avoids catch-up bursts.
        sweep.set_missed_tick_behavior(MissedTickBehavior::Skip);
        Self {
            store,
            api,
            notifier,
            sweep,
        }
    }
}

impl<Store: GameStore, Api: GameApi, Push: Notifier> App<Store, Api, Push> {
    pub async fn run(&mut self, interrupt: impl Future<Output = ()>) -> crate::Result<RunState> {
        tokio::select! {
            command = self.api.next_command() => {
                self.handle_command(command?, Utc::now());
                Ok(RunState::Continue)
            }
            _ = self.sweep.tick() => {
                self.sweep_expired(Utc::now())?;
                Ok(RunState::Continue)
            }
            _ = interrupt => {
                Ok(RunState::Exit)
            }
        }
    }

    pub fn handle_command(&mut self, command: Command, now: DateTime<Utc>) {
        match command {
            Command::Status { user, peer, respond } => {
                let result = self.status(user, peer, now);
                let _ = respond.send(result);
            }
            Command::Deposit { user, peer, respond } => {
                let result = self.deposit(user, peer, now);
                let _ = respond.send(result);
            }
            Command::Message { user, peer, respond } => {
                let result = self.message(user, peer, now);
                let _ = respond.send(result);
            }
        }
    }

    /// Force the time-based transitions on every record past its deadline.
    /// Sole authority for expiry when no further message arrives; safe to
    /// re-run, already-transitioned records are no-ops.
    pub fn sweep_expired(&mut self, now: DateTime<Utc>) -> crate::Result<()> {
        for record in self.store.due_rounds(now)? {
            let pair = record.pair.clone();
            match self.apply(&pair, |record| Ok(record.expire_round(now))) {
                Ok((_, Some(winner))) => {
                    tracing::info!("round expired for {pair}, winner {winner}");
                    self.notifier
                        .notify_pair(&pair, &PushEvent::Ended { winner });
                }
                Ok((_, None)) => {}
                Err(err) => {
                    tracing::warn!("round expiry sweep failed for {pair}: {err}");
                }
            }
        }

        for record in self.store.due_refund_timers(now)? {
            let pair = record.pair.clone();
            match self.apply(&pair, |record| Ok(record.expire_refund_timer(now))) {
                Ok((_, Some(depositor))) => {
                    tracing::info!("refund grace elapsed for {pair}, {depositor} eligible");
                    self.notifier
                        .notify_pair(&pair, &PushEvent::RefundAvailable { depositor });
                }
                Ok((_, None)) => {}
                Err(err) => {
                    tracing::warn!("refund expiry sweep failed for {pair}: {err}");
                }
            }
        }

        Ok(())
    }

    fn status(
        &mut self,
        user: UserId,
        peer: UserId,
        now: DateTime<Utc>,
    ) -> Result<GameStatus, CommandError> {
        let pair = resolve(user, peer)?;
        let record = self
            .store
            .find_or_create(&pair)
            .map_err(internal)?;
        Ok(record.status(now))
    }

    fn deposit(
        &mut self,
        user: UserId,
        peer: UserId,
        now: DateTime<Utc>,
    ) -> Result<GameStatus, CommandError> {
        let pair = resolve(user.clone(), peer)?;
        let (record, newly_set) =
            self.apply(&pair, |record| record.record_deposit(&user))?;
        if newly_set {
            self.notifier.notify_pair(
                &pair,
                &PushEvent::Deposit { from: user },
            );
        }
        Ok(record.status(now))
    }

    fn message(
        &mut self,
        user: UserId,
        peer: UserId,
        now: DateTime<Utc>,
    ) -> Result<GameStatus, CommandError> {
        let pair = resolve(user.clone(), peer)?;
        let (record, outcome) =
            self.apply(&pair, |record| record.record_message(&user, now))?;
        match outcome {
            MessageOutcome::RoundStarted {
                started_at,
                expires_at,
            } => {
                self.notifier.notify_pair(
                    &pair,
                    &PushEvent::TimerStart {
                        started_by: user,
                        started_at,
                        expires_at,
                    },
                );
            }
            MessageOutcome::RoundStopped => {
                self.notifier.notify_pair(&pair, &PushEvent::TimerStop);
            }
            MessageOutcome::RefundTimerStarted { expires_at } => {
                self.notifier.notify_pair(
                    &pair,
                    &PushEvent::RefundTimerStart {
                        started_by: user,
                        expires_at,
                    },
                );
            }
            MessageOutcome::NoChange => {}
        }
        Ok(record.status(now))
    }

    /// Atomic read-modify-write of one record, retried once with a fresh
    /// read on a concurrent write conflict. The transitions re-check their
    /// guards, so near-simultaneous triggers converge instead of
    /// double-applying.
    fn apply<T>(
        &mut self,
        pair: &PairKey,
        op: impl Fn(&mut GameRecord) -> Result<T, GameError>,
    ) -> Result<(GameRecord, T), CommandError> {
        for attempt in 0..2 {
            let mut record = self
                .store
                .find_or_create(pair)
                .map_err(internal)?;
            let out = op(&mut record).map_err(CommandError::from)?;
            match self.store.persist(&record).map_err(internal)? {
                PersistOutcome::Saved => return Ok((record, out)),
                PersistOutcome::Conflict => {
                    tracing::debug!(
                        "write conflict for {pair} (attempt {attempt}), re-reading"
                    );
                }
            }
        }
        Err(CommandError::Internal(format!(
            "persistent write conflict for {pair}"
        )))
    }
}

fn resolve(user: UserId, peer: UserId) -> Result<PairKey, CommandError> {
    PairKey::new(user, peer).map_err(|err: PairError| {
        CommandError::InvalidPair(err.to_string())
    })
}

fn internal(err: anyhow::Error) -> CommandError {
    CommandError::Internal(format!("{err:#}"))
}
