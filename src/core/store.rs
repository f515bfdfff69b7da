use std::sync::{Mutex, MutexGuard};

use hashbrown::HashMap;

use crate::{
    change::RosterChange,
    persist::{ClassStore, RosterWrite, StoreError, StoreResult, WriteOutcome},
    roster::ClassRecord,
    types::{ClassId, Revision},
};

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<ClassId, ClassRecord>,
    history: HashMap<ClassId, Vec<RosterChange>>,
    commits: u64,
}

/// Process-local [`ClassStore`] with the same compare-and-swap semantics as the
/// SQLite adapter.
#[derive(Debug, Default)]
pub struct MemoryClassStore {
    inner: Mutex<Inner>,
}

impl MemoryClassStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a store pre-populated with `records`.
    pub fn with_records(records: impl IntoIterator<Item = ClassRecord>) -> StoreResult<Self> {
        let store = Self::new();
        for record in records {
            store.create(record)?;
        }
        Ok(store)
    }

    /// Total committed writes across all classes.
    pub fn commit_count(&self) -> StoreResult<u64> {
        Ok(self.lock()?.commits)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".to_string()))
    }
}

impl ClassStore for MemoryClassStore {
    fn create(&self, record: ClassRecord) -> StoreResult<()> {
        let mut inner = self.lock()?;
        if inner.records.contains_key(&record.id) {
            return Err(StoreError::AlreadyExists(record.id));
        }
        inner.records.insert(record.id.clone(), record);
        Ok(())
    }

    fn load(&self, class_id: &str) -> StoreResult<Option<ClassRecord>> {
        Ok(self.lock()?.records.get(class_id).cloned())
    }

    fn conditional_write(
        &self,
        class_id: &str,
        expected: Revision,
        write: RosterWrite,
    ) -> StoreResult<WriteOutcome> {
        let mut inner = self.lock()?;
        let Some(stored) = inner.records.get_mut(class_id) else {
            return Ok(WriteOutcome::Conflict { current: None });
        };
        if stored.revision != expected {
            return Ok(WriteOutcome::Conflict {
                current: Some(stored.revision),
            });
        }

        let revision = expected + 1;
        stored.enrolled = write.next.enrolled;
        stored.waitlist = write.next.waitlist;
        stored.status = write.next.status;
        stored.revision = revision;

        let mut change = write.change;
        change.revision = revision;
        inner
            .history
            .entry(class_id.to_string())
            .or_default()
            .push(change);
        inner.commits += 1;

        Ok(WriteOutcome::Committed { revision })
    }

    fn history(&self, class_id: &str) -> StoreResult<Vec<RosterChange>> {
        Ok(self
            .lock()?
            .history
            .get(class_id)
            .cloned()
            .unwrap_or_default())
    }
}
