use crate::{
    pair::{
        PairKey,
        UserId,
    },
    push::PushEvent,
};
use std::{
    collections::HashMap,
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::sync::mpsc::{
    self,
    error::TrySendError,
};

const CONNECTION_BUFFER: usize = 16;

/// Best-effort delivery of push payloads to both participants' live
/// connections. Must never block or fail the triggering request; a
/// participant without a connection is silently skipped.
pub trait Notifier {
    fn notify_pair(&self, pair: &PairKey, event: &PushEvent);
}

/// Registry of live connections, one bounded channel per connected user.
#[derive(Clone, Default)]
pub struct ChannelNotifier {
    connections: Arc<Mutex<HashMap<UserId, mpsc::Sender<PushEvent>>>>,
}

impl ChannelNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a live connection for the user, replacing any previous one.
    pub fn subscribe(&self, user: UserId) -> mpsc::Receiver<PushEvent> {
        let (sender, receiver) = mpsc::channel(CONNECTION_BUFFER);
        let mut connections = self.connections.lock().unwrap();
        connections.insert(user, sender);
        receiver
    }

    pub fn disconnect(&self, user: &UserId) {
        let mut connections = self.connections.lock().unwrap();
        connections.remove(user);
    }

    fn deliver(&self, user: &UserId, event: &PushEvent) {
        let mut connections = self.connections.lock().unwrap();
        let Some(sender) = connections.get(user) else {
            return;
        };
        match sender.try_send(event.clone()) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                // Slow consumer; it reconciles via a status fetch instead.
                tracing::debug!("dropping push for {user}: connection buffer full");
            }
            Err(TrySendError::Closed(_)) => {
                connections.remove(user);
            }
        }
    }
}

impl Notifier for ChannelNotifier {
    fn notify_pair(&self, pair: &PairKey, event: &PushEvent) {
        self.deliver(pair.a(), event);
        self.deliver(pair.b(), event);
    }
}
