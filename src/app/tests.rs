#![allow(non_snake_case)]

use super::*;
use crate::{
    app::{
        game_api::{
            Command,
            CommandError,
            CommandResponder,
            GameApi,
        },
        game_store::{
            GameStore,
            PersistOutcome,
        },
        in_memory_store::InMemoryGameStore,
    },
    game::{
        GameStatus,
        RoundPhase,
        refund_grace,
        round_duration,
    },
};
use chrono::Duration;
use std::{
    future::pending,
    sync::{
        Arc,
        Mutex,
    },
};
use tokio::sync::oneshot;

struct PendingApi;

impl GameApi for PendingApi {
    async fn next_command(&mut self) -> crate::Result<Command> {
        pending().await
    }
}

#[derive(Clone, Default)]
struct FakeNotifier {
    events: Arc<Mutex<Vec<PushEvent>>>,
}

impl FakeNotifier {
    fn new() -> Self {
        Self::default()
    }

    fn events(&self) -> Vec<PushEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl Notifier for FakeNotifier {
    fn notify_pair(&self, _pair: &PairKey, event: &PushEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// Store wrapper that reports a write conflict for the first N saves, as a
/// racing writer would.
struct FlakyStore {
    inner: InMemoryGameStore,
    conflicts: usize,
}

impl GameStore for FlakyStore {
    fn find_or_create(&mut self, pair: &PairKey) -> crate::Result<GameRecord> {
        self.inner.find_or_create(pair)
    }

    fn persist(&mut self, record: &GameRecord) -> crate::Result<PersistOutcome> {
        if self.conflicts > 0 {
            self.conflicts -= 1;
            return Ok(PersistOutcome::Conflict);
        }
        self.inner.persist(record)
    }

    fn due_rounds(&self, now: DateTime<Utc>) -> crate::Result<Vec<GameRecord>> {
        self.inner.due_rounds(now)
    }

    fn due_refund_timers(&self, now: DateTime<Utc>) -> crate::Result<Vec<GameRecord>> {
        self.inner.due_refund_timers(now)
    }
}

type TestApp<Store> = App<Store, PendingApi, FakeNotifier>;

fn test_app() -> (TestApp<InMemoryGameStore>, InMemoryGameStore, FakeNotifier) {
    let store = InMemoryGameStore::new();
    let notifier = FakeNotifier::new();
    let app = App::new(
        store.clone(),
        PendingApi,
        notifier.clone(),
        std::time::Duration::from_secs(30),
    );
    (app, store, notifier)
}

fn command<Store: GameStore>(
    app: &mut TestApp<Store>,
    make: impl FnOnce(CommandResponder) -> Command,
    now: DateTime<Utc>,
) -> Result<GameStatus, CommandError> {
    let (respond, mut response) = oneshot::channel();
    app.handle_command(make(respond), now);
    response.try_recv().expect("command must respond synchronously")
}

fn status<Store: GameStore>(
    app: &mut TestApp<Store>,
    user: &str,
    peer: &str,
    now: DateTime<Utc>,
) -> Result<GameStatus, CommandError> {
    let user = UserId::from(user);
    let peer = UserId::from(peer);
    command(app, |respond| Command::Status { user, peer, respond }, now)
}

fn deposit<Store: GameStore>(
    app: &mut TestApp<Store>,
    user: &str,
    peer: &str,
    now: DateTime<Utc>,
) -> Result<GameStatus, CommandError> {
    let user = UserId::from(user);
    let peer = UserId::from(peer);
    command(app, |respond| Command::Deposit { user, peer, respond }, now)
}

fn message<Store: GameStore>(
    app: &mut TestApp<Store>,
    user: &str,
    peer: &str,
    now: DateTime<Utc>,
) -> Result<GameStatus, CommandError> {
    let user = UserId::from(user);
    let peer = UserId::from(peer);
    command(app, |respond| Command::Message { user, peer, respond }, now)
}

fn count_events(notifier: &FakeNotifier, matcher: impl Fn(&PushEvent) -> bool) -> usize {
    notifier.events().iter().filter(|event| matcher(event)).count()
}

#[tokio::test]
async fn message__without_deposit__is_rejected_and_records_nothing() {
    // given
    let (mut app, store, notifier) = test_app();
    let now = Utc::now();

    // when
    let result = message(&mut app, "alice", "bob", now);

    // then
    assert_eq!(result, Err(CommandError::DepositRequired));
    assert!(notifier.events().is_empty());
    let status = status(&mut app, "alice", "bob", now).unwrap();
    assert_eq!(status.state, RoundPhase::Idle);
    assert_eq!(store.records().lock().unwrap().len(), 1);
}

#[tokio::test]
async fn status__lazily_creates_one_record_per_pair_regardless_of_order() {
    // given
    let (mut app, store, _) = test_app();
    let now = Utc::now();

    // when
    status(&mut app, "alice", "bob", now).unwrap();
    status(&mut app, "bob", "alice", now).unwrap();

    // then
    assert_eq!(store.records().lock().unwrap().len(), 1);
}

#[tokio::test]
async fn status__rejects_a_pair_of_one_user() {
    let (mut app, _, _) = test_app();

    let result = status(&mut app, "alice", "alice", Utc::now());

    assert!(matches!(result, Err(CommandError::InvalidPair(_))));
}

#[tokio::test]
async fn deposit__repeat_confirmations_push_once() {
    // given
    let (mut app, _, notifier) = test_app();
    let now = Utc::now();

    // when: the settlement layer confirms the same stake twice
    deposit(&mut app, "alice", "bob", now).unwrap();
    deposit(&mut app, "alice", "bob", now).unwrap();

    // then: deposits are monotonic, only the first one pushes
    let pushes = count_events(&notifier, |event| {
        matches!(event, PushEvent::Deposit { .. })
    });
    assert_eq!(pushes, 1);
}

#[tokio::test]
async fn message__full_round_lifecycle__start_reply_restart() {
    // given: A deposits, B deposits
    let (mut app, _, notifier) = test_app();
    let t0 = Utc::now();
    deposit(&mut app, "alice", "bob", t0).unwrap();
    deposit(&mut app, "bob", "alice", t0).unwrap();

    // when: A messages B
    let running = message(&mut app, "alice", "bob", t0).unwrap();

    // then: round starts with the authoritative deadline
    assert_eq!(running.state, RoundPhase::Running);
    assert_eq!(running.started_by, Some(UserId::from("alice")));
    assert_eq!(running.expires_at, Some(t0 + round_duration()));
    assert_eq!(
        count_events(&notifier, |e| matches!(e, PushEvent::TimerStart { .. })),
        1
    );

    // when: B replies at t=60s
    let stopped = message(&mut app, "bob", "alice", t0 + Duration::seconds(60)).unwrap();

    // then
    assert_eq!(stopped.state, RoundPhase::Idle);
    assert_eq!(stopped.expires_at, None);
    assert_eq!(
        count_events(&notifier, |e| matches!(e, PushEvent::TimerStop)),
        1
    );

    // when: A messages again at t=65s
    let t65 = t0 + Duration::seconds(65);
    let restarted = message(&mut app, "alice", "bob", t65).unwrap();

    // then
    assert_eq!(restarted.state, RoundPhase::Running);
    assert_eq!(restarted.started_by, Some(UserId::from("alice")));
    assert_eq!(restarted.expires_at, Some(t65 + round_duration()));
}

#[tokio::test]
async fn message__repeat_from_the_starter__does_not_extend_the_round() {
    // given
    let (mut app, _, notifier) = test_app();
    let t0 = Utc::now();
    deposit(&mut app, "alice", "bob", t0).unwrap();
    deposit(&mut app, "bob", "alice", t0).unwrap();
    message(&mut app, "alice", "bob", t0).unwrap();

    // when
    let status = message(&mut app, "alice", "bob", t0 + Duration::seconds(120)).unwrap();

    // then: only the original deadline governs expiry
    assert_eq!(status.expires_at, Some(t0 + round_duration()));
    assert_eq!(
        count_events(&notifier, |e| matches!(e, PushEvent::TimerStart { .. })),
        1
    );
}

#[tokio::test]
async fn sweep__past_deadline__ends_the_round_and_is_idempotent() {
    // given
    let (mut app, _, notifier) = test_app();
    let t0 = Utc::now();
    deposit(&mut app, "alice", "bob", t0).unwrap();
    deposit(&mut app, "bob", "alice", t0).unwrap();
    message(&mut app, "alice", "bob", t0).unwrap();

    // when
    app.sweep_expired(t0 + round_duration()).unwrap();

    // then
    let ended = status(&mut app, "alice", "bob", t0 + round_duration()).unwrap();
    assert_eq!(ended.state, RoundPhase::Ended);
    assert_eq!(ended.winner, Some(UserId::from("alice")));
    assert_eq!(
        count_events(&notifier, |e| matches!(e, PushEvent::Ended { .. })),
        1
    );

    // when: the sweep runs again
    app.sweep_expired(t0 + round_duration() + Duration::seconds(30))
        .unwrap();

    // then: no double transition, no duplicate push
    assert_eq!(
        count_events(&notifier, |e| matches!(e, PushEvent::Ended { .. })),
        1
    );
}

#[tokio::test]
async fn sweep__before_deadline__leaves_the_round_running() {
    // given
    let (mut app, _, notifier) = test_app();
    let t0 = Utc::now();
    deposit(&mut app, "alice", "bob", t0).unwrap();
    deposit(&mut app, "bob", "alice", t0).unwrap();
    message(&mut app, "alice", "bob", t0).unwrap();

    // when
    app.sweep_expired(t0 + Duration::seconds(299)).unwrap();

    // then
    let current = status(&mut app, "alice", "bob", t0).unwrap();
    assert_eq!(current.state, RoundPhase::Running);
    assert_eq!(
        count_events(&notifier, |e| matches!(e, PushEvent::Ended { .. })),
        0
    );
}

#[tokio::test]
async fn message__single_sided_deposit__starts_the_refund_timer_once() {
    // given: only A has staked
    let (mut app, _, notifier) = test_app();
    let t0 = Utc::now();
    deposit(&mut app, "alice", "bob", t0).unwrap();

    // when
    let first = message(&mut app, "alice", "bob", t0).unwrap();
    let second = message(&mut app, "alice", "bob", t0 + Duration::seconds(30)).unwrap();

    // then
    assert_eq!(first.refund_timer_started_by, Some(UserId::from("alice")));
    assert_eq!(first.refund_timer_expires_at, Some(t0 + refund_grace()));
    assert_eq!(second.refund_timer_expires_at, first.refund_timer_expires_at);
    assert_eq!(
        count_events(&notifier, |e| matches!(e, PushEvent::RefundTimerStart { .. })),
        1
    );
}

#[tokio::test]
async fn sweep__refund_timer_due__signals_eligibility_and_never_restarts() {
    // given
    let (mut app, _, notifier) = test_app();
    let t0 = Utc::now();
    deposit(&mut app, "alice", "bob", t0).unwrap();
    message(&mut app, "alice", "bob", t0).unwrap();

    // when
    app.sweep_expired(t0 + Duration::seconds(300)).unwrap();

    // then
    assert_eq!(
        count_events(&notifier, |e| {
            matches!(e, PushEvent::RefundAvailable { depositor } if depositor == &UserId::from("alice"))
        }),
        1
    );
    let cleared = status(&mut app, "alice", "bob", t0 + Duration::seconds(300)).unwrap();
    assert_eq!(cleared.refund_timer_expires_at, None);

    // when: the depositor keeps chatting single-sided
    message(&mut app, "alice", "bob", t0 + Duration::seconds(305)).unwrap();

    // then: the fired timer never restarts for this record
    assert_eq!(
        count_events(&notifier, |e| matches!(e, PushEvent::RefundTimerStart { .. })),
        1
    );
    let after = status(&mut app, "alice", "bob", t0 + Duration::seconds(305)).unwrap();
    assert_eq!(after.refund_timer_expires_at, None);
}

#[tokio::test]
async fn message__peer_stakes_back_in_time__round_starts_and_refund_timer_clears() {
    // given: A chatted single-sided, the refund timer is running
    let (mut app, _, _) = test_app();
    let t0 = Utc::now();
    deposit(&mut app, "alice", "bob", t0).unwrap();
    message(&mut app, "alice", "bob", t0).unwrap();

    // when: B stakes before the grace period elapses, then A messages
    deposit(&mut app, "bob", "alice", t0 + Duration::seconds(60)).unwrap();
    let status = message(&mut app, "alice", "bob", t0 + Duration::seconds(90)).unwrap();

    // then: the round timer and the refund timer are never active together
    assert_eq!(status.state, RoundPhase::Running);
    assert_eq!(status.refund_timer_expires_at, None);
    assert_eq!(status.refund_timer_started_by, None);
}

#[tokio::test]
async fn apply__write_conflict__is_retried_once_with_a_fresh_read() {
    // given: the first save loses to a racing writer
    let store = FlakyStore {
        inner: InMemoryGameStore::new(),
        conflicts: 1,
    };
    let notifier = FakeNotifier::new();
    let mut app = App::new(
        store,
        PendingApi,
        notifier.clone(),
        std::time::Duration::from_secs(30),
    );

    // when
    let result = deposit(&mut app, "alice", "bob", Utc::now());

    // then: the transition is re-applied, not dropped
    assert!(result.is_ok());
    assert!(result.unwrap().deposit_a);
}

#[tokio::test]
async fn apply__repeated_conflicts__surface_as_a_transient_failure() {
    // given
    let store = FlakyStore {
        inner: InMemoryGameStore::new(),
        conflicts: 2,
    };
    let notifier = FakeNotifier::new();
    let mut app = App::new(
        store,
        PendingApi,
        notifier.clone(),
        std::time::Duration::from_secs(30),
    );

    // when
    let result = deposit(&mut app, "alice", "bob", Utc::now());

    // then
    assert!(matches!(result, Err(CommandError::Internal(_))));
}

#[tokio::test]
async fn run__interrupt__exits_the_loop() {
    // given
    let (mut app, _, _) = test_app();

    // when: the first sweep tick and the interrupt race, so allow a few
    // iterations before the interrupt is picked
    for _ in 0..3 {
        if let RunState::Exit = app.run(async {}).await.unwrap() {
            return;
        }
    }
    panic!("interrupt was never selected");
}
