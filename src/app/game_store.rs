use crate::{
    game::GameRecord,
    pair::PairKey,
};
use chrono::{
    DateTime,
    Utc,
};

/// Outcome of a revision-checked write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistOutcome {
    Saved,
    /// The stored revision moved since the record was read; the caller
    /// should re-read and re-apply its transition.
    Conflict,
}

pub trait GameStore {
    /// retrieve the record for the pair, creating an idle one on first touch;
    /// at most one record exists per canonical pair
    fn find_or_create(&mut self, pair: &PairKey) -> crate::Result<GameRecord>;

    /// write the whole record as a single unit iff the stored revision still
    /// matches `record.revision`; the stored copy carries the next revision
    fn persist(&mut self, record: &GameRecord) -> crate::Result<PersistOutcome>;

    /// all records with a running round whose deadline has passed
    fn due_rounds(&self, now: DateTime<Utc>) -> crate::Result<Vec<GameRecord>>;

    /// all records with a refund timer whose deadline has passed
    fn due_refund_timers(&self, now: DateTime<Utc>) -> crate::Result<Vec<GameRecord>>;
}
