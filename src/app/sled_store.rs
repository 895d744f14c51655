// Sled-backed game record persistence, one JSON document per canonical pair.
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
use anyhow::{
    Context,
    anyhow,
};
use chrono::{
    DateTime,
    Utc,
};
use sled::{
    Config,
    Db,
    Tree,
    transaction::{
        ConflictableTransactionError,
        TransactionError,
    },
};
use std::path::Path;

#[derive(Debug)]
enum PersistAbort {
    Conflict,
    Codec(String),
}

#[derive(Clone)]
pub struct SledGameStore {
    tree: Tree,
}

impl SledGameStore {
    pub fn new(db: &Db) -> crate::Result<Self> {
        let tree = db.open_tree("game_records").context("open game_records tree")?;
        Ok(Self { tree })
    }

    pub fn open<P: AsRef<Path>>(path: P) -> crate::Result<Self> {
        let config = Config::default().path(path);
        let db = config.open().context("open sled database")?;
        Self::new(&db)
    }

    fn encode(record: &GameRecord) -> crate::Result<Vec<u8>> {
        serde_json::to_vec(record).context("serialize game record")
    }

    fn decode(bytes: &[u8]) -> crate::Result<GameRecord> {
        serde_json::from_slice(bytes).context("deserialize game record")
    }
}

impl GameStore for SledGameStore {
    fn find_or_create(&mut self, pair: &PairKey) -> crate::Result<GameRecord> {
        let key = pair.storage_key().into_bytes();
        if let Some(bytes) = self.tree.get(&key).context("read game record")? {
            return Self::decode(bytes.as_ref());
        }

        // Compare-and-swap against an empty slot so concurrent first access
        // from both participants creates at most one record.
        let fresh = GameRecord::new(pair.clone());
        let bytes = Self::encode(&fresh)?;
        match self
            .tree
            .compare_and_swap(&key, None as Option<&[u8]>, Some(bytes))
            .context("insert fresh game record")?
        {
            Ok(()) => {
                self.tree.flush().context("flush fresh game record")?;
                Ok(fresh)
            }
            Err(cas) => {
                // Lost the race to the other participant; use theirs.
                let current = cas
                    .current
                    .ok_or_else(|| anyhow!("game record vanished during create"))?;
                Self::decode(current.as_ref())
            }
        }
    }

    fn persist(&mut self, record: &GameRecord) -> crate::Result<PersistOutcome> {
        let key = record.pair.storage_key().into_bytes();
        let mut next = record.clone();
        next.revision = record.revision + 1;
        let bytes = Self::encode(&next)?;
        let expected = record.revision;

        let result = self.tree.transaction(|tx| {
            let stored_revision = match tx.get(key.as_slice())? {
                Some(current) => serde_json::from_slice::<GameRecord>(current.as_ref())
                    .map_err(|e| {
                        ConflictableTransactionError::Abort(PersistAbort::Codec(
                            e.to_string(),
                        ))
                    })?
                    .revision,
                None => expected,
            };
            if stored_revision != expected {
                return Err(ConflictableTransactionError::Abort(
                    PersistAbort::Conflict,
                ));
            }
            tx.insert(key.as_slice(), bytes.as_slice())?;
            Ok(())
        });

        match result {
            Ok(()) => {
                self.tree.flush().context("flush game record")?;
                Ok(PersistOutcome::Saved)
            }
            Err(TransactionError::Abort(PersistAbort::Conflict)) => {
                Ok(PersistOutcome::Conflict)
            }
            Err(TransactionError::Abort(PersistAbort::Codec(message))) => {
                Err(anyhow!("decode stored game record: {message}"))
            }
            Err(TransactionError::Storage(e)) => {
                Err(e).context("persist game record")
            }
        }
    }

    fn due_rounds(&self, now: DateTime<Utc>) -> crate::Result<Vec<GameRecord>> {
        let mut due = Vec::new();
        for entry in self.tree.iter() {
            let (_, value) = entry.context("iterate game records")?;
            let record = Self::decode(value.as_ref())?;
            if let RoundState::Running { expires_at, .. } = &record.round {
                if *expires_at <= now {
                    due.push(record);
                }
            }
        }
        Ok(due)
    }

    fn due_refund_timers(&self, now: DateTime<Utc>) -> crate::Result<Vec<GameRecord>> {
        let mut due = Vec::new();
        for entry in self.tree.iter() {
            let (_, value) = entry.context("iterate game records")?;
            let record = Self::decode(value.as_ref())?;
            if let Some(timer) = &record.refund_timer {
                if timer.expires_at <= now {
                    due.push(record);
                }
            }
        }
        Ok(due)
    }
}
