use crate::{
    game::{
        GameError,
        GameStatus,
    },
    pair::UserId,
};
use std::fmt;
use tokio::sync::oneshot;

pub trait GameApi {
    fn next_command(&mut self) -> impl Future<Output = crate::Result<Command>>;
}

pub type CommandResponder = oneshot::Sender<Result<GameStatus, CommandError>>;

/// Requests forwarded from the HTTP surface into the app loop. Each carries
/// a oneshot responder for the resulting status projection.
#[derive(Debug)]
pub enum Command {
    /// full current projection for the pair, creating the record lazily
    Status {
        user: UserId,
        peer: UserId,
        respond: CommandResponder,
    },
    /// the settlement layer confirmed an on-chain stake by `user`
    Deposit {
        user: UserId,
        peer: UserId,
        respond: CommandResponder,
    },
    /// the message relay is about to store a message from `user`
    Message {
        user: UserId,
        peer: UserId,
        respond: CommandResponder,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// the sender must stake before messaging; recoverable
    DepositRequired,
    /// malformed pair identities, e.g. user == peer
    InvalidPair(String),
    /// transient or unexpected failure
    Internal(String),
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandError::DepositRequired => {
                f.write_str("deposit required before sending messages")
            }
            CommandError::InvalidPair(message) => write!(f, "invalid pair: {message}"),
            CommandError::Internal(message) => f.write_str(message),
        }
    }
}

impl std::error::Error for CommandError {}

impl From<GameError> for CommandError {
    fn from(err: GameError) -> Self {
        match err {
            GameError::DepositRequired => CommandError::DepositRequired,
            GameError::NotParticipant(user) => {
                CommandError::InvalidPair(format!("{user} is not a participant"))
            }
        }
    }
}
