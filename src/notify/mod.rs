//! Fire-and-forget notification delivery.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::{
    roster::Notification,
    types::{ClassId, Revision},
};

/// Class details rendered alongside every notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationContext {
    pub class_id: ClassId,
    pub class_title: String,
    /// Revision of the commit that produced the notification.
    pub revision: Revision,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification queue is full")]
    QueueFull,
    #[error("notification channel closed")]
    Closed,
    #[error("delivery rejected: {0}")]
    Rejected(String),
}

/// Accepts notifications for delivery. Implementations must not wait for the
/// recipient; returning `Ok` only means the request was accepted.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn dispatch(
        &self,
        notification: &Notification,
        context: &NotificationContext,
    ) -> Result<(), NotifyError>;
}

/// Writes every dispatch to the tracing log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn dispatch(
        &self,
        notification: &Notification,
        context: &NotificationContext,
    ) -> Result<(), NotifyError> {
        tracing::info!(
            recipient = %notification.recipient_id,
            kind = ?notification.kind,
            class_id = %context.class_id,
            revision = context.revision,
            "notification dispatched"
        );
        Ok(())
    }
}

/// Notification paired with its context, as seen by a [`ChannelNotifier`] consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dispatched {
    pub notification: Notification,
    pub context: NotificationContext,
}

/// Hands notifications to a bounded queue drained by a delivery worker.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: mpsc::Sender<Dispatched>,
}

impl ChannelNotifier {
    /// Creates the notifier and the receiving end of its queue.
    pub fn channel(bound: usize) -> (Self, mpsc::Receiver<Dispatched>) {
        let (tx, rx) = mpsc::channel(bound.max(1));
        (Self { tx }, rx)
    }
}

#[async_trait]
impl Notifier for ChannelNotifier {
    async fn dispatch(
        &self,
        notification: &Notification,
        context: &NotificationContext,
    ) -> Result<(), NotifyError> {
        self.tx
            .try_send(Dispatched {
                notification: notification.clone(),
                context: context.clone(),
            })
            .map_err(|err| match err {
                TrySendError::Full(_) => NotifyError::QueueFull,
                TrySendError::Closed(_) => NotifyError::Closed,
            })
    }
}
