use crate::{
    app::game_store::{
        GameStore,
        PersistOutcome,
    },
    game::{
        GameRecord,
        RoundState,
    },
    pair::PairKey,
};
use chrono::{
    DateTime,
    Utc,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};

/// In-memory store with the same persist semantics as the sled store.
#[derive(Clone, Default)]
pub struct InMemoryGameStore {
    records: Arc<Mutex<HashMap<String, GameRecord>>>,
}

impl InMemoryGameStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Arc<Mutex<HashMap<String, GameRecord>>> {
        self.records.clone()
    }
}

impl GameStore for InMemoryGameStore {
    fn find_or_create(&mut self, pair: &PairKey) -> crate::Result<GameRecord> {
        let mut records = self.records.lock().unwrap();
        let record = records
            .entry(pair.storage_key())
            .or_insert_with(|| GameRecord::new(pair.clone()));
        Ok(record.clone())
    }

    fn persist(&mut self, record: &GameRecord) -> crate::Result<PersistOutcome> {
        let mut records = self.records.lock().unwrap();
        let key = record.pair.storage_key();
        let stored_revision = records
            .get(&key)
            .map(|stored| stored.revision)
            .unwrap_or(record.revision);
        if stored_revision != record.revision {
            return Ok(PersistOutcome::Conflict);
        }
        let mut next = record.clone();
        next.revision = record.revision + 1;
        records.insert(key, next);
        Ok(PersistOutcome::Saved)
    }

    fn due_rounds(&self, now: DateTime<Utc>) -> crate::Result<Vec<GameRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .filter(|record| {
                matches!(
                    &record.round,
                    RoundState::Running { expires_at, .. } if *expires_at <= now
                )
            })
            .cloned()
            .collect())
    }

    fn due_refund_timers(&self, now: DateTime<Utc>) -> crate::Result<Vec<GameRecord>> {
        let records = self.records.lock().unwrap();
        Ok(records
            .values()
            .filter(|record| {
                record
                    .refund_timer
                    .as_ref()
                    .is_some_and(|timer| timer.expires_at <= now)
            })
            .cloned()
            .collect())
    }
}
