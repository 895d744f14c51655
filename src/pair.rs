use serde::{
    Deserialize,
    Serialize,
};
use std::fmt;

/// Opaque user identity as issued by the account system.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairError {
    /// A pair needs two distinct participants.
    SameUser,
}

impl fmt::Display for PairError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PairError::SameUser => f.write_str("a pair requires two distinct users"),
        }
    }
}

impl std::error::Error for PairError {}

/// Canonical identity for an unordered user pair. `a` is always the
/// lexicographically smaller id, so `(X, Y)` and `(Y, X)` resolve to the
/// same key. The ordering is fixed at construction and never re-sorted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairKey {
    a: UserId,
    b: UserId,
}

impl PairKey {
    pub fn new(x: UserId, y: UserId) -> Result<Self, PairError> {
        if x == y {
            return Err(PairError::SameUser);
        }
        if x < y {
            Ok(Self { a: x, b: y })
        } else {
            Ok(Self { a: y, b: x })
        }
    }

    pub fn a(&self) -> &UserId {
        &self.a
    }

    pub fn b(&self) -> &UserId {
        &self.b
    }

    pub fn contains(&self, user: &UserId) -> bool {
        user == &self.a || user == &self.b
    }

    /// The other member of the pair, if `user` is a member at all.
    pub fn peer_of(&self, user: &UserId) -> Option<&UserId> {
        if user == &self.a {
            Some(&self.b)
        } else if user == &self.b {
            Some(&self.a)
        } else {
            None
        }
    }

    /// Stable textual form used as the storage key.
    pub fn storage_key(&self) -> String {
        format!("{}|{}", self.a, self.b)
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.a, self.b)
    }
}
