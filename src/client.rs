use crate::{
    game::GameStatus,
    pair::{
        PairKey,
        UserId,
    },
};
use anyhow::Context;
use chrono::{
    DateTime,
    Duration,
    Utc,
};
use std::collections::HashMap;

/// Synchronous status fetch against the authoritative record store.
pub trait StatusFetch {
    fn fetch(
        &self,
        user: &UserId,
        peer: &UserId,
    ) -> impl Future<Output = crate::Result<GameStatus>>;
}

/// HTTP fetcher against the game service.
#[derive(Clone)]
pub struct HttpGameClient {
    base_url: String,
    http: reqwest::Client,
}

impl HttpGameClient {
    pub fn new(base_url: impl Into<String>) -> crate::Result<Self> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .build()
            .context("failed to build HTTP client for game service")?;
        Ok(Self { base_url, http })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl StatusFetch for HttpGameClient {
    async fn fetch(&self, user: &UserId, peer: &UserId) -> crate::Result<GameStatus> {
        let url = format!("{}/game/{}/status/{}", self.base_url, user, peer);
        let response = self
            .http
            .get(url)
            .send()
            .await
            .context("game status request failed")?
            .error_for_status()
            .context("game status request rejected")?;
        response
            .json::<GameStatus>()
            .await
            .context("failed to decode game status response")
    }
}

/// Read-through cache of the server-authoritative status projection, keyed
/// by pair. An entry is replaced wholesale on fetch and dropped on any push
/// event for the pair — it is never locally mutated to predict server state.
pub struct StatusCache<F> {
    fetch: F,
    entries: HashMap<PairKey, GameStatus>,
}

impl<F: StatusFetch> StatusCache<F> {
    pub fn new(fetch: F) -> Self {
        Self {
            fetch,
            entries: HashMap::new(),
        }
    }

    /// Current projection for the pair, served from the cache when present.
    pub async fn status(
        &mut self,
        user: &UserId,
        peer: &UserId,
    ) -> crate::Result<GameStatus> {
        let pair = PairKey::new(user.clone(), peer.clone())?;
        if let Some(status) = self.entries.get(&pair) {
            return Ok(status.clone());
        }
        let status = self.fetch.fetch(user, peer).await?;
        self.entries.insert(pair, status.clone());
        Ok(status)
    }

    /// Drop the cached projection for the pair; callers invoke this on every
    /// push event so the next read goes back to the server.
    pub fn invalidate(&mut self, user: &UserId, peer: &UserId) {
        if let Ok(pair) = PairKey::new(user.clone(), peer.clone()) {
            self.entries.remove(&pair);
        }
    }

    /// Time left on the round countdown, derived by subtracting the local
    /// clock from the absolute deadline. `None` when no round is running.
    pub fn remaining(status: &GameStatus, now: DateTime<Utc>) -> Option<Duration> {
        let expires_at = status.expires_at?;
        Some((expires_at - now).max(Duration::zero()))
    }
}
