use crate::pair::UserId;
use chrono::{
    DateTime,
    Utc,
};
use serde::{
    Deserialize,
    Serialize,
};

/// Push payloads delivered to both participants' live connections.
/// Delivery is best-effort; the record store stays authoritative and
/// clients reconcile via a status fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event")]
pub enum PushEvent {
    #[serde(rename = "timer:start", rename_all = "camelCase")]
    TimerStart {
        started_by: UserId,
        started_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    #[serde(rename = "timer:stop")]
    TimerStop,
    #[serde(rename = "ended")]
    Ended { winner: UserId },
    #[serde(rename = "deposit")]
    Deposit { from: UserId },
    #[serde(rename = "refund:timer:start", rename_all = "camelCase")]
    RefundTimerStart {
        started_by: UserId,
        expires_at: DateTime<Utc>,
    },
    #[serde(rename = "refund:available")]
    RefundAvailable { depositor: UserId },
}
