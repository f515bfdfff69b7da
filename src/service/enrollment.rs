use std::sync::{Arc, OnceLock};

use thiserror::Error;
use tokio::{
    sync::{broadcast, mpsc, watch},
    time::{Duration, Instant},
};

use crate::{
    change::RosterChange,
    engine::{
        decide,
        invariants::{self, InvariantViolation},
    },
    notify::{NotificationContext, Notifier},
    persist::{ClassStore, RosterWrite, StoreError, StoreResult, WriteOutcome},
    roster::{ClassRecord, EnrollmentOutcome, MemberStanding, Notification},
    types::{ClassId, Revision, RosterAction},
};

use super::{
    config::{ConfigError, ServiceConfig},
    events::RosterEvent,
};

#[derive(Debug, Error)]
pub enum EnrollmentError {
    #[error("class {0} not found")]
    NotFound(ClassId),
    #[error("class {class_id} still contended after {attempts} attempts")]
    Contention { class_id: ClassId, attempts: u32 },
    #[error("deadline elapsed before the roster change committed")]
    Timeout,
    #[error("request cancelled by caller")]
    Cancelled,
    #[error("store unavailable: {0}")]
    StoreUnavailable(#[from] StoreError),
    #[error("roster is inconsistent: {0}")]
    Inconsistent(#[from] InvariantViolation),
}

/// Creates a linked cancel handle and signal.
pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Caller side of a cancellation; fires every linked [`CancelSignal`].
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observed by the retry loop between attempts.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Handle dropped without firing; never cancels.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Per-call abort controls.
#[derive(Debug, Clone, Default)]
pub struct CallOptions {
    pub timeout: Option<Duration>,
    pub cancel: Option<CancelSignal>,
}

impl CallOptions {
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// Notifications of one commit, queued for the dispatch worker.
struct DispatchJob {
    notifications: Vec<Notification>,
    context: NotificationContext,
}

/// Runs enroll/cancel requests against a [`ClassStore`] with optimistic
/// concurrency, then fans notifications out to a [`Notifier`].
///
/// Notifications are delivered by a single worker per service, so they reach
/// the notifier in commit order.
#[derive(Clone)]
pub struct EnrollmentService {
    store: Arc<dyn ClassStore>,
    notifier: Arc<dyn Notifier>,
    config: ServiceConfig,
    events_tx: broadcast::Sender<RosterEvent>,
    dispatch_tx: Arc<OnceLock<mpsc::UnboundedSender<DispatchJob>>>,
}

impl EnrollmentService {
    pub fn new(
        store: Arc<dyn ClassStore>,
        notifier: Arc<dyn Notifier>,
        config: ServiceConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let (events_tx, _) = broadcast::channel(config.event_capacity);
        Ok(Self {
            store,
            notifier,
            config,
            events_tx,
            dispatch_tx: Arc::new(OnceLock::new()),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RosterEvent> {
        self.events_tx.subscribe()
    }

    pub async fn enroll(
        &self,
        class_id: &str,
        member_id: &str,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        self.enroll_with(class_id, member_id, CallOptions::default())
            .await
    }

    pub async fn cancel(
        &self,
        class_id: &str,
        member_id: &str,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        self.cancel_with(class_id, member_id, CallOptions::default())
            .await
    }

    #[tracing::instrument(err, skip(self, opts), level = "info")]
    pub async fn enroll_with(
        &self,
        class_id: &str,
        member_id: &str,
        opts: CallOptions,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        self.run(RosterAction::Enroll, class_id, member_id, opts)
            .await
    }

    #[tracing::instrument(err, skip(self, opts), level = "info")]
    pub async fn cancel_with(
        &self,
        class_id: &str,
        member_id: &str,
        opts: CallOptions,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        self.run(RosterAction::Cancel, class_id, member_id, opts)
            .await
    }

    /// Current roster of `class_id`.
    pub async fn roster(&self, class_id: &str) -> Result<ClassRecord, EnrollmentError> {
        self.load(class_id)
            .await?
            .ok_or_else(|| EnrollmentError::NotFound(class_id.to_string()))
    }

    /// Where `member_id` currently sits in `class_id`.
    pub async fn standing(
        &self,
        class_id: &str,
        member_id: &str,
    ) -> Result<MemberStanding, EnrollmentError> {
        let record = self.roster(class_id).await?;
        Ok(decide::standing(&record, member_id))
    }

    /// Committed changes of `class_id`, oldest first.
    pub async fn history(&self, class_id: &str) -> Result<Vec<RosterChange>, EnrollmentError> {
        let id = class_id.to_string();
        self.blocking(move |store| store.history(&id)).await
    }

    async fn run(
        &self,
        action: RosterAction,
        class_id: &str,
        member_id: &str,
        opts: CallOptions,
    ) -> Result<EnrollmentOutcome, EnrollmentError> {
        let timeout = opts
            .timeout
            .or(self.config.default_timeout_ms.map(Duration::from_millis));
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut cancel = opts.cancel;
        let backoff = Duration::from_millis(self.config.retry_backoff_ms);

        for attempt in 1..=self.config.max_attempts {
            check_abort(deadline, cancel.as_ref())?;

            let record = self
                .load(class_id)
                .await?
                .ok_or_else(|| EnrollmentError::NotFound(class_id.to_string()))?;

            let decision = decide::decide(action, &record, member_id).inspect_err(|violation| {
                tracing::error!(%violation, revision = record.revision, "refusing to decide on inconsistent roster");
            })?;
            if decision.is_noop() {
                tracing::debug!(result = decision.outcome.result.as_str(), "no roster change");
                return Ok(decision.outcome);
            }
            invariants::check(&decision.next).inspect_err(|violation| {
                tracing::error!(%violation, "decision produced an inconsistent roster; not writing");
            })?;

            let outcome = decision.outcome;
            let change = RosterChange::new(
                class_id.to_string(),
                record.revision + 1,
                action,
                member_id.to_string(),
                outcome.result,
                outcome.promoted.clone(),
            );
            let write = RosterWrite {
                next: decision.next,
                change,
            };

            match self.write(class_id, record.revision, write).await? {
                WriteOutcome::Committed { revision } => {
                    tracing::info!(
                        revision,
                        result = outcome.result.as_str(),
                        promoted = ?outcome.promoted,
                        "roster change committed"
                    );
                    self.after_commit(&record, revision, action, member_id, &outcome);
                    return Ok(outcome);
                }
                WriteOutcome::Conflict { current } => {
                    tracing::debug!(
                        attempt,
                        expected = record.revision,
                        ?current,
                        "revision conflict; reloading"
                    );
                    if attempt < self.config.max_attempts && !backoff.is_zero() {
                        pause(backoff, deadline, cancel.as_mut()).await?;
                    }
                }
            }
        }

        tracing::warn!(
            attempts = self.config.max_attempts,
            "retry budget exhausted under contention"
        );
        Err(EnrollmentError::Contention {
            class_id: class_id.to_string(),
            attempts: self.config.max_attempts,
        })
    }

    fn after_commit(
        &self,
        record: &ClassRecord,
        revision: Revision,
        action: RosterAction,
        member_id: &str,
        outcome: &EnrollmentOutcome,
    ) {
        let _ = self.events_tx.send(RosterEvent::Committed {
            class_id: record.id.clone(),
            revision,
            action,
            member_id: member_id.to_string(),
            result: outcome.result,
            promoted: outcome.promoted.clone(),
        });

        if outcome.notifications.is_empty() {
            return;
        }
        let context = NotificationContext {
            class_id: record.id.clone(),
            class_title: record.title.clone(),
            revision,
        };
        let job = DispatchJob {
            notifications: outcome.notifications.clone(),
            context,
        };
        // Started on first use so `new` does not need a runtime.
        let tx = self
            .dispatch_tx
            .get_or_init(|| spawn_dispatcher(Arc::clone(&self.notifier)));
        if tx.send(job).is_err() {
            tracing::warn!(
                class_id = %record.id,
                revision,
                "notification worker stopped; dropping notifications"
            );
        }
    }

    async fn load(&self, class_id: &str) -> Result<Option<ClassRecord>, EnrollmentError> {
        let id = class_id.to_string();
        self.blocking(move |store| store.load(&id)).await
    }

    async fn write(
        &self,
        class_id: &str,
        expected: Revision,
        write: RosterWrite,
    ) -> Result<WriteOutcome, EnrollmentError> {
        let id = class_id.to_string();
        self.blocking(move |store| store.conditional_write(&id, expected, write))
            .await
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, EnrollmentError>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ClassStore) -> StoreResult<T> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let res = tokio::task::spawn_blocking(move || f(store.as_ref()))
            .await
            .map_err(|e| StoreError::Unavailable(format!("join error: {e}")))?;
        Ok(res?)
    }
}

fn spawn_dispatcher(notifier: Arc<dyn Notifier>) -> mpsc::UnboundedSender<DispatchJob> {
    let (tx, mut rx) = mpsc::unbounded_channel::<DispatchJob>();
    tokio::spawn(async move {
        while let Some(job) = rx.recv().await {
            for notification in &job.notifications {
                if let Err(err) = notifier.dispatch(notification, &job.context).await {
                    tracing::warn!(
                        recipient = %notification.recipient_id,
                        kind = ?notification.kind,
                        class_id = %job.context.class_id,
                        error = %err,
                        "notification dispatch failed"
                    );
                }
            }
        }
    });
    tx
}

fn check_abort(deadline: Option<Instant>, cancel: Option<&CancelSignal>) -> Result<(), EnrollmentError> {
    if cancel.is_some_and(CancelSignal::is_cancelled) {
        return Err(EnrollmentError::Cancelled);
    }
    if deadline.is_some_and(|d| Instant::now() >= d) {
        return Err(EnrollmentError::Timeout);
    }
    Ok(())
}

async fn pause(
    delay: Duration,
    deadline: Option<Instant>,
    cancel: Option<&mut CancelSignal>,
) -> Result<(), EnrollmentError> {
    let mut wake = Instant::now() + delay;
    if let Some(deadline) = deadline {
        wake = wake.min(deadline);
    }
    match cancel {
        Some(signal) => tokio::select! {
            _ = tokio::time::sleep_until(wake) => Ok(()),
            _ = signal.cancelled() => Err(EnrollmentError::Cancelled),
        },
        None => {
            tokio::time::sleep_until(wake).await;
            Ok(())
        }
    }
}
