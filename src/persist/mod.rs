pub mod sqlite;

use thiserror::Error;

use crate::{
    change::RosterChange,
    roster::ClassRecord,
    types::{ClassId, Revision},
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
    #[error("class {0} already exists")]
    AlreadyExists(ClassId),
    #[error("stored row is unreadable: {0}")]
    Corrupt(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Result of a revision-guarded write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Write landed; the record now sits at `revision`.
    Committed { revision: Revision },
    /// Someone else moved the record first. `current` is `None` if it vanished.
    Conflict { current: Option<Revision> },
}

/// New roster state plus the journal entry describing it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterWrite {
    pub next: ClassRecord,
    pub change: RosterChange,
}

/// Durable home of class records.
///
/// Calls may block; the service drives them from tokio's blocking pool.
pub trait ClassStore: Send + Sync {
    /// Inserts a freshly scheduled class.
    fn create(&self, record: ClassRecord) -> StoreResult<()>;

    fn load(&self, class_id: &str) -> StoreResult<Option<ClassRecord>>;

    /// Replaces the roster only if the stored revision still equals `expected`.
    ///
    /// On commit the stored revision becomes `expected + 1` and `write.change` is
    /// journaled in the same atomic step.
    fn conditional_write(
        &self,
        class_id: &str,
        expected: Revision,
        write: RosterWrite,
    ) -> StoreResult<WriteOutcome>;

    /// Journaled changes of `class_id`, oldest first.
    ///
    /// Stores that keep no journal report [`StoreError::Unavailable`].
    fn history(&self, _class_id: &str) -> StoreResult<Vec<RosterChange>> {
        Err(StoreError::Unavailable("history not supported".to_string()))
    }
}
