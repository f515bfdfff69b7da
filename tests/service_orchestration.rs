use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc, Barrier,
};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use rollcall::{
    change::RosterChange,
    core::store::MemoryClassStore,
    engine::{decide::decide_enroll, invariants::InvariantViolation},
    notify::{ChannelNotifier, Dispatched, NotificationContext, Notifier, NotifyError},
    persist::{ClassStore, RosterWrite, StoreError, StoreResult, WriteOutcome},
    roster::{ClassDraft, ClassRecord, EnrollmentResult, MemberStanding, Notification},
    service::{
        config::{ConfigError, ServiceConfig},
        enrollment::{cancel_pair, CallOptions, EnrollmentError, EnrollmentService},
        events::RosterEvent,
    },
    telemetry,
    types::{ClassStatus, Revision, RosterAction, TemplateKind},
};

const CLASS: &str = "spin-0700";

fn class(capacity: u32) -> ClassRecord {
    ClassDraft {
        id: CLASS.to_string(),
        title: "Morning Spin".to_string(),
        instructor_id: "coach".to_string(),
        capacity,
    }
    .into_record()
    .expect("record")
}

fn memory_store(capacity: u32) -> Arc<MemoryClassStore> {
    Arc::new(MemoryClassStore::with_records([class(capacity)]).expect("seed"))
}

fn service_with(
    store: Arc<dyn ClassStore>,
    config: ServiceConfig,
) -> (EnrollmentService, mpsc::Receiver<Dispatched>) {
    telemetry::try_init_for_tests();
    let (notifier, rx) = ChannelNotifier::channel(64);
    let service = EnrollmentService::new(store, Arc::new(notifier), config).expect("service");
    (service, rx)
}

async fn next_dispatch(rx: &mut mpsc::Receiver<Dispatched>) -> (String, TemplateKind) {
    let d = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("dispatch timeout")
        .expect("channel open");
    (d.notification.recipient_id, d.notification.kind)
}

async fn assert_no_dispatch(rx: &mut mpsc::Receiver<Dispatched>) {
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(rx.try_recv().is_err(), "unexpected notification");
}

/// Commits a rival enrollment right before the first guarded write lands.
struct RacingStore {
    inner: MemoryClassStore,
    raced: AtomicBool,
    writes: AtomicUsize,
}

impl ClassStore for RacingStore {
    fn create(&self, record: ClassRecord) -> StoreResult<()> {
        self.inner.create(record)
    }

    fn load(&self, class_id: &str) -> StoreResult<Option<ClassRecord>> {
        self.inner.load(class_id)
    }

    fn conditional_write(
        &self,
        class_id: &str,
        expected: Revision,
        write: RosterWrite,
    ) -> StoreResult<WriteOutcome> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if !self.raced.swap(true, Ordering::SeqCst) {
            let rec = self.inner.load(class_id)?.expect("class");
            let rival = decide_enroll(&rec, "rival").expect("decide");
            let change = RosterChange::new(
                class_id.to_string(),
                rec.revision + 1,
                RosterAction::Enroll,
                "rival".to_string(),
                rival.outcome.result,
                None,
            );
            self.inner.conditional_write(
                class_id,
                rec.revision,
                RosterWrite {
                    next: rival.next,
                    change,
                },
            )?;
        }
        self.inner.conditional_write(class_id, expected, write)
    }

    fn history(&self, class_id: &str) -> StoreResult<Vec<RosterChange>> {
        self.inner.history(class_id)
    }
}

/// Every guarded write loses.
struct AlwaysConflictStore {
    inner: MemoryClassStore,
    writes: AtomicUsize,
}

impl ClassStore for AlwaysConflictStore {
    fn create(&self, record: ClassRecord) -> StoreResult<()> {
        self.inner.create(record)
    }

    fn load(&self, class_id: &str) -> StoreResult<Option<ClassRecord>> {
        self.inner.load(class_id)
    }

    fn conditional_write(
        &self,
        _class_id: &str,
        expected: Revision,
        _write: RosterWrite,
    ) -> StoreResult<WriteOutcome> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(WriteOutcome::Conflict {
            current: Some(expected + 1),
        })
    }
}

fn always_conflict() -> Arc<AlwaysConflictStore> {
    Arc::new(AlwaysConflictStore {
        inner: MemoryClassStore::with_records([class(2)]).expect("seed"),
        writes: AtomicUsize::new(0),
    })
}

/// Holds the first two loads until both callers have read the same revision.
struct GateStore {
    inner: MemoryClassStore,
    gate: Barrier,
    loads: AtomicUsize,
    writes: AtomicUsize,
}

impl ClassStore for GateStore {
    fn create(&self, record: ClassRecord) -> StoreResult<()> {
        self.inner.create(record)
    }

    fn load(&self, class_id: &str) -> StoreResult<Option<ClassRecord>> {
        let rec = self.inner.load(class_id);
        if self.loads.fetch_add(1, Ordering::SeqCst) < 2 {
            self.gate.wait();
        }
        rec
    }

    fn conditional_write(
        &self,
        class_id: &str,
        expected: Revision,
        write: RosterWrite,
    ) -> StoreResult<WriteOutcome> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.conditional_write(class_id, expected, write)
    }

    fn history(&self, class_id: &str) -> StoreResult<Vec<RosterChange>> {
        self.inner.history(class_id)
    }
}

/// Rejects every notification after reporting it was asked.
struct FailingNotifier {
    seen: mpsc::UnboundedSender<Notification>,
}

#[async_trait]
impl Notifier for FailingNotifier {
    async fn dispatch(
        &self,
        notification: &Notification,
        _context: &NotificationContext,
    ) -> Result<(), NotifyError> {
        let _ = self.seen.send(notification.clone());
        Err(NotifyError::Rejected("smtp down".to_string()))
    }
}

/// Records every dispatch, stalling on waitlist notices.
struct SlowWaitlistNotifier {
    seen: mpsc::UnboundedSender<(String, TemplateKind)>,
}

#[async_trait]
impl Notifier for SlowWaitlistNotifier {
    async fn dispatch(
        &self,
        notification: &Notification,
        _context: &NotificationContext,
    ) -> Result<(), NotifyError> {
        if notification.kind == TemplateKind::Waitlisted {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        let _ = self
            .seen
            .send((notification.recipient_id.clone(), notification.kind));
        Ok(())
    }
}

fn context() -> NotificationContext {
    NotificationContext {
        class_id: CLASS.to_string(),
        class_title: "Morning Spin".to_string(),
        revision: 1,
    }
}

fn notice(recipient: &str, kind: TemplateKind) -> Notification {
    Notification {
        recipient_id: recipient.to_string(),
        kind,
    }
}

#[tokio::test]
async fn capacity_two_scenario_through_service() {
    let store = memory_store(2);
    let (service, mut rx) = service_with(store.clone(), ServiceConfig::default());

    let a = service.enroll(CLASS, "A").await.expect("enroll A");
    assert_eq!(a.result, EnrollmentResult::Enrolled);
    assert_eq!(next_dispatch(&mut rx).await, ("A".to_string(), TemplateKind::Enrolled));
    assert_eq!(
        next_dispatch(&mut rx).await,
        ("coach".to_string(), TemplateKind::NewEnrollment)
    );

    let b = service.enroll(CLASS, "B").await.expect("enroll B");
    assert_eq!(b.result, EnrollmentResult::Enrolled);
    next_dispatch(&mut rx).await;
    next_dispatch(&mut rx).await;

    let c = service.enroll(CLASS, "C").await.expect("enroll C");
    assert_eq!(c.result, EnrollmentResult::Waitlisted);
    assert_eq!(next_dispatch(&mut rx).await, ("C".to_string(), TemplateKind::Waitlisted));

    let cancel = service.cancel(CLASS, "A").await.expect("cancel A");
    assert_eq!(cancel.result, EnrollmentResult::Cancelled);
    assert_eq!(cancel.promoted.as_deref(), Some("C"));
    assert_eq!(
        next_dispatch(&mut rx).await,
        ("A".to_string(), TemplateKind::CancellationConfirmed)
    );
    assert_eq!(next_dispatch(&mut rx).await, ("C".to_string(), TemplateKind::SeatFreed));

    let roster = service.roster(CLASS).await.expect("roster");
    assert_eq!(roster.enrolled, vec!["B", "C"]);
    assert!(roster.waitlist.is_empty());
    assert_eq!(roster.revision, 4);

    let history = service.history(CLASS).await.expect("history");
    let revisions: Vec<_> = history.iter().map(|c| c.revision).collect();
    assert_eq!(revisions, vec![1, 2, 3, 4]);
    assert_eq!(history[3].promoted.as_deref(), Some("C"));
    assert_eq!(store.commit_count().unwrap(), 4);
}

#[tokio::test]
async fn noop_requests_neither_write_nor_notify() {
    let store = memory_store(1);
    let (service, mut rx) = service_with(store.clone(), ServiceConfig::default());

    service.enroll(CLASS, "A").await.expect("enroll");
    next_dispatch(&mut rx).await;
    next_dispatch(&mut rx).await;
    assert_eq!(store.commit_count().unwrap(), 1);

    let again = service.enroll(CLASS, "A").await.expect("enroll again");
    assert_eq!(again.result, EnrollmentResult::AlreadyEnrolled);
    assert!(again.notifications.is_empty());

    let stranger = service.cancel(CLASS, "Z").await.expect("cancel stranger");
    assert_eq!(stranger.result, EnrollmentResult::NotEnrolled);

    assert_eq!(store.commit_count().unwrap(), 1);
    assert_no_dispatch(&mut rx).await;
}

#[tokio::test]
async fn second_cancel_reports_not_enrolled() {
    let store = memory_store(2);
    let (service, _rx) = service_with(store.clone(), ServiceConfig::default());

    service.enroll(CLASS, "A").await.expect("enroll");
    let first = service.cancel(CLASS, "A").await.expect("cancel");
    assert_eq!(first.result, EnrollmentResult::Cancelled);
    let before = service.roster(CLASS).await.expect("roster");

    let second = service.cancel(CLASS, "A").await.expect("cancel again");
    assert_eq!(second.result, EnrollmentResult::NotEnrolled);
    assert_eq!(service.roster(CLASS).await.expect("roster"), before);
}

#[tokio::test]
async fn unknown_class_is_not_found() {
    let (service, _rx) = service_with(memory_store(1), ServiceConfig::default());
    let err = service.enroll("nope", "A").await.unwrap_err();
    assert!(matches!(err, EnrollmentError::NotFound(id) if id == "nope"));
}

#[tokio::test]
async fn closed_class_is_unavailable_without_write() {
    let mut rec = class(3);
    rec.status = ClassStatus::Completed;
    let store = Arc::new(MemoryClassStore::with_records([rec]).expect("seed"));
    let (service, _rx) = service_with(store.clone(), ServiceConfig::default());

    let out = service.enroll(CLASS, "A").await.expect("enroll");
    assert_eq!(out.result, EnrollmentResult::ClassUnavailable);
    assert_eq!(store.commit_count().unwrap(), 0);
}

#[tokio::test]
async fn conflict_reloads_and_decides_on_fresh_state() {
    let store = Arc::new(RacingStore {
        inner: MemoryClassStore::with_records([class(1)]).expect("seed"),
        raced: AtomicBool::new(false),
        writes: AtomicUsize::new(0),
    });
    let (service, _rx) = service_with(store.clone(), ServiceConfig::default());

    let out = service.enroll(CLASS, "A").await.expect("enroll");
    assert_eq!(out.result, EnrollmentResult::Waitlisted);
    assert_eq!(store.writes.load(Ordering::SeqCst), 2);

    let roster = service.roster(CLASS).await.expect("roster");
    assert_eq!(roster.enrolled, vec!["rival"]);
    assert_eq!(roster.waitlist, vec!["A"]);
    assert_eq!(roster.revision, 2);
}

#[tokio::test]
async fn exhausted_retries_surface_contention() {
    let store = always_conflict();
    let (service, mut rx) = service_with(store.clone(), ServiceConfig::default());

    let err = service.enroll(CLASS, "A").await.unwrap_err();
    assert!(matches!(
        err,
        EnrollmentError::Contention { attempts: 5, .. }
    ));
    assert_eq!(store.writes.load(Ordering::SeqCst), 5);
    assert_no_dispatch(&mut rx).await;
}

#[tokio::test]
async fn deadline_stops_retry_loop_between_attempts() {
    let store = always_conflict();
    let config = ServiceConfig {
        max_attempts: 50,
        retry_backoff_ms: 20,
        ..ServiceConfig::default()
    };
    let (service, _rx) = service_with(store.clone(), config);

    let err = service
        .enroll_with(
            CLASS,
            "A",
            CallOptions::default().with_timeout(Duration::from_millis(30)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollmentError::Timeout));
    let writes = store.writes.load(Ordering::SeqCst);
    assert!((1..50).contains(&writes), "writes = {writes}");
}

#[tokio::test]
async fn configured_default_timeout_applies() {
    let store = always_conflict();
    let config = ServiceConfig {
        max_attempts: 1000,
        retry_backoff_ms: 5,
        default_timeout_ms: Some(25),
        ..ServiceConfig::default()
    };
    let (service, _rx) = service_with(store, config);

    // Nobody is enrolled, so the cancel is a no-op before any write.
    let noop = service.cancel(CLASS, "A").await.expect("noop");
    assert_eq!(noop.result, EnrollmentResult::NotEnrolled);

    let err = service.enroll(CLASS, "A").await.unwrap_err();
    assert!(matches!(err, EnrollmentError::Timeout));
}

#[tokio::test]
async fn cancelled_before_start_never_touches_store() {
    let store = always_conflict();
    let (service, _rx) = service_with(store.clone(), ServiceConfig::default());

    let (handle, signal) = cancel_pair();
    handle.cancel();
    let err = service
        .enroll_with(CLASS, "A", CallOptions::default().with_cancel(signal))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrollmentError::Cancelled));
    assert_eq!(store.writes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancel_signal_interrupts_backoff() {
    let store = always_conflict();
    let config = ServiceConfig {
        max_attempts: 3,
        retry_backoff_ms: 10_000,
        ..ServiceConfig::default()
    };
    let (service, _rx) = service_with(store.clone(), config);

    let (handle, signal) = cancel_pair();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.cancel();
    });

    let res = tokio::time::timeout(
        Duration::from_secs(2),
        service.enroll_with(CLASS, "A", CallOptions::default().with_cancel(signal)),
    )
    .await
    .expect("cancel should cut the backoff short");
    assert!(matches!(res, Err(EnrollmentError::Cancelled)));
    assert_eq!(store.writes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn notification_failures_do_not_undo_enrollment() {
    telemetry::try_init_for_tests();
    let store = memory_store(1);
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let service = EnrollmentService::new(
        store.clone(),
        Arc::new(FailingNotifier { seen: seen_tx }),
        ServiceConfig::default(),
    )
    .expect("service");

    let out = service.enroll(CLASS, "A").await.expect("enroll");
    assert_eq!(out.result, EnrollmentResult::Enrolled);

    // Both notifications are attempted even though the first one fails.
    for _ in 0..2 {
        tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
            .await
            .expect("dispatch attempted")
            .expect("open");
    }
    assert_eq!(service.roster(CLASS).await.unwrap().enrolled, vec!["A"]);
    assert_eq!(store.commit_count().unwrap(), 1);
}

#[tokio::test]
async fn inconsistent_roster_is_refused() {
    let mut rec = class(2);
    rec.enrolled = vec!["A".to_string()];
    rec.waitlist = vec!["A".to_string()];
    let store = Arc::new(MemoryClassStore::with_records([rec]).expect("seed"));
    let (service, _rx) = service_with(store.clone(), ServiceConfig::default());

    let err = service.enroll(CLASS, "B").await.unwrap_err();
    assert!(matches!(
        err,
        EnrollmentError::Inconsistent(InvariantViolation::MemberInBothLists(ref m)) if m == "A"
    ));
    assert_eq!(store.commit_count().unwrap(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_enrolls_for_last_seat_split_enrolled_and_waitlisted() {
    let mut rec = class(2);
    rec.enrolled = vec!["early".to_string()];
    let store = Arc::new(GateStore {
        inner: MemoryClassStore::with_records([rec]).expect("seed"),
        gate: Barrier::new(2),
        loads: AtomicUsize::new(0),
        writes: AtomicUsize::new(0),
    });
    let (service, _rx) = service_with(store.clone(), ServiceConfig::default());

    let s1 = service.clone();
    let s2 = service.clone();
    let t1 = tokio::spawn(async move { s1.enroll(CLASS, "P").await });
    let t2 = tokio::spawn(async move { s2.enroll(CLASS, "Q").await });
    let r1 = t1.await.expect("join").expect("enroll P");
    let r2 = t2.await.expect("join").expect("enroll Q");

    let mut results = vec![r1.result, r2.result];
    results.sort_by_key(|r| *r == EnrollmentResult::Waitlisted);
    assert_eq!(
        results,
        vec![EnrollmentResult::Enrolled, EnrollmentResult::Waitlisted]
    );

    // Both read revision 0; the loser conflicted once and retried.
    assert_eq!(store.writes.load(Ordering::SeqCst), 3);
    let roster = service.roster(CLASS).await.expect("roster");
    assert_eq!(roster.enrolled.len(), 2);
    assert_eq!(roster.waitlist.len(), 1);
    assert_eq!(roster.revision, 2);
    assert_eq!(service.history(CLASS).await.expect("history").len(), 2);
}

#[tokio::test]
async fn committed_changes_are_broadcast() {
    let (service, _rx) = service_with(memory_store(1), ServiceConfig::default());
    let mut events = service.subscribe();

    service.enroll(CLASS, "A").await.expect("enroll");
    service.enroll(CLASS, "A").await.expect("noop");
    service.enroll(CLASS, "B").await.expect("waitlist");

    let first = events.recv().await.expect("event");
    assert_eq!(
        first,
        RosterEvent::Committed {
            class_id: CLASS.to_string(),
            revision: 1,
            action: RosterAction::Enroll,
            member_id: "A".to_string(),
            result: EnrollmentResult::Enrolled,
            promoted: None,
        }
    );
    let second = events.recv().await.expect("event");
    assert!(matches!(
        second,
        RosterEvent::Committed { revision: 2, result: EnrollmentResult::Waitlisted, .. }
    ));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn standing_tracks_waitlist_position() {
    let (service, _rx) = service_with(memory_store(1), ServiceConfig::default());
    for m in ["A", "B", "C"] {
        service.enroll(CLASS, m).await.expect("enroll");
    }

    assert_eq!(service.standing(CLASS, "A").await.unwrap(), MemberStanding::Enrolled);
    assert_eq!(
        service.standing(CLASS, "C").await.unwrap(),
        MemberStanding::Waitlisted { position: 2 }
    );

    service.cancel(CLASS, "B").await.expect("leave waitlist");
    assert_eq!(
        service.standing(CLASS, "C").await.unwrap(),
        MemberStanding::Waitlisted { position: 1 }
    );
    assert_eq!(
        service.standing(CLASS, "B").await.unwrap(),
        MemberStanding::NotRegistered
    );
}

#[test]
fn config_loads_partial_json_and_rejects_zero_attempts() {
    let cfg = ServiceConfig::from_json_str(r#"{ "max_attempts": 3, "retry_backoff_ms": 15 }"#)
        .expect("config");
    assert_eq!(cfg.max_attempts, 3);
    assert_eq!(cfg.retry_backoff_ms, 15);
    assert_eq!(cfg.default_timeout_ms, None);
    assert_eq!(cfg.event_capacity, ServiceConfig::default().event_capacity);

    assert!(matches!(
        ServiceConfig::from_json_str(r#"{ "max_attempts": 0 }"#),
        Err(ConfigError::ZeroAttempts)
    ));
    assert!(matches!(
        ServiceConfig::from_json_str("not json"),
        Err(ConfigError::Parse(_))
    ));

    let bad = ServiceConfig {
        event_capacity: 0,
        ..ServiceConfig::default()
    };
    let (notifier, _rx) = ChannelNotifier::channel(1);
    assert!(matches!(
        EnrollmentService::new(memory_store(1), Arc::new(notifier), bad),
        Err(ConfigError::ZeroEventCapacity)
    ));
}

#[tokio::test]
async fn channel_notifier_reports_full_and_closed_queue() {
    let (notifier, rx) = ChannelNotifier::channel(1);
    let ctx = context();

    notifier
        .dispatch(&notice("A", TemplateKind::Enrolled), &ctx)
        .await
        .expect("first fits");
    let full = notifier
        .dispatch(&notice("coach", TemplateKind::NewEnrollment), &ctx)
        .await;
    assert!(matches!(full, Err(NotifyError::QueueFull)));

    drop(rx);
    let closed = notifier
        .dispatch(&notice("A", TemplateKind::Enrolled), &ctx)
        .await;
    assert!(matches!(closed, Err(NotifyError::Closed)));
}

#[tokio::test]
async fn full_notification_queue_still_commits() {
    telemetry::try_init_for_tests();
    let store = memory_store(2);
    let (notifier, mut rx) = ChannelNotifier::channel(1);
    let service = EnrollmentService::new(store.clone(), Arc::new(notifier), ServiceConfig::default())
        .expect("service");

    let out = service.enroll(CLASS, "A").await.expect("enroll");
    assert_eq!(out.result, EnrollmentResult::Enrolled);
    assert_eq!(out.notifications.len(), 2);

    // Only the member's notice fit; the instructor's was dropped.
    assert_eq!(next_dispatch(&mut rx).await, ("A".to_string(), TemplateKind::Enrolled));
    assert_no_dispatch(&mut rx).await;

    let roster = service.roster(CLASS).await.expect("roster");
    assert_eq!(roster.enrolled, vec!["A"]);
    assert_eq!(roster.revision, 1);
    assert_eq!(store.commit_count().unwrap(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn notifications_arrive_in_commit_order() {
    telemetry::try_init_for_tests();
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let service = EnrollmentService::new(
        memory_store(1),
        Arc::new(SlowWaitlistNotifier { seen: seen_tx }),
        ServiceConfig::default(),
    )
    .expect("service");

    service.enroll(CLASS, "A").await.expect("enroll A");
    service.enroll(CLASS, "C").await.expect("enroll C");
    let out = service.cancel(CLASS, "A").await.expect("cancel A");
    assert_eq!(out.promoted.as_deref(), Some("C"));

    let mut seen = Vec::new();
    for _ in 0..5 {
        let d = tokio::time::timeout(Duration::from_secs(1), seen_rx.recv())
            .await
            .expect("dispatch timeout")
            .expect("open");
        seen.push(d);
    }
    assert_eq!(
        seen,
        vec![
            ("A".to_string(), TemplateKind::Enrolled),
            ("coach".to_string(), TemplateKind::NewEnrollment),
            ("C".to_string(), TemplateKind::Waitlisted),
            ("A".to_string(), TemplateKind::CancellationConfirmed),
            ("C".to_string(), TemplateKind::SeatFreed),
        ]
    );
}

#[tokio::test]
async fn store_without_journal_reports_history_unavailable() {
    let (service, _rx) = service_with(always_conflict(), ServiceConfig::default());
    let err = service.history(CLASS).await.unwrap_err();
    assert!(matches!(
        err,
        EnrollmentError::StoreUnavailable(StoreError::Unavailable(_))
    ));
}
