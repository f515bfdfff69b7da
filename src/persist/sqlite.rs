//! SQLite-backed class store with revision-guarded updates.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::{
    change::{CHANGE_FORMAT_VERSION, ChangeEnvelope, RosterChange},
    roster::ClassRecord,
    types::{ClassStatus, Revision},
};

use super::{ClassStore, RosterWrite, StoreError, StoreResult, WriteOutcome};

const SELECT_CLASS: &str = "SELECT id, title, instructor_id, capacity, status, enrolled, waitlist, revision \
     FROM classes WHERE id = ?1";

/// SQLite implementation of [`crate::persist::ClassStore`].
pub struct SqliteClassStore {
    conn: Mutex<Connection>,
}

impl SqliteClassStore {
    /// Opens or creates a SQLite-backed store at `path`.
    ///
    /// Enables WAL mode and sets `synchronous=NORMAL`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(conn)
    }

    /// Opens an in-memory SQLite store.
    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(conn)
    }

    fn init_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(include_str!("schema.sql"))?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "synchronous", "NORMAL")?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))
    }
}

impl ClassStore for SqliteClassStore {
    fn create(&self, record: ClassRecord) -> StoreResult<()> {
        let conn = self.conn()?;
        let inserted = conn.execute(
            "INSERT INTO classes(id, title, instructor_id, capacity, status, enrolled, waitlist, revision) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) ON CONFLICT(id) DO NOTHING",
            params![
                record.id,
                record.title,
                record.instructor_id,
                record.capacity,
                record.status.as_str(),
                serde_json::to_string(&record.enrolled)?,
                serde_json::to_string(&record.waitlist)?,
                record.revision as i64,
            ],
        )?;
        if inserted == 0 {
            return Err(StoreError::AlreadyExists(record.id));
        }
        Ok(())
    }

    fn load(&self, class_id: &str) -> StoreResult<Option<ClassRecord>> {
        let conn = self.conn()?;
        let raw = conn
            .query_row(SELECT_CLASS, params![class_id], RawClassRow::from_row)
            .optional()?;
        raw.map(RawClassRow::decode).transpose()
    }

    fn conditional_write(
        &self,
        class_id: &str,
        expected: Revision,
        write: RosterWrite,
    ) -> StoreResult<WriteOutcome> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE classes SET enrolled = ?1, waitlist = ?2, status = ?3, revision = revision + 1 \
             WHERE id = ?4 AND revision = ?5",
            params![
                serde_json::to_string(&write.next.enrolled)?,
                serde_json::to_string(&write.next.waitlist)?,
                write.next.status.as_str(),
                class_id,
                expected as i64,
            ],
        )?;

        if updated == 0 {
            let current: Option<i64> = tx
                .query_row(
                    "SELECT revision FROM classes WHERE id = ?1",
                    params![class_id],
                    |row| row.get(0),
                )
                .optional()?;
            return Ok(WriteOutcome::Conflict {
                current: current.map(|r| r as Revision),
            });
        }

        let revision = expected + 1;
        let mut change = write.change;
        change.revision = revision;
        let payload = serde_json::to_vec(&ChangeEnvelope::new(change.clone()))?;
        tx.execute(
            "INSERT INTO roster_changes(class_id, revision, ts_ms, payload) VALUES (?1, ?2, ?3, ?4)",
            params![class_id, revision as i64, change.ts_ms as i64, payload],
        )?;
        tx.commit()?;

        Ok(WriteOutcome::Committed { revision })
    }

    fn history(&self, class_id: &str) -> StoreResult<Vec<RosterChange>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT payload FROM roster_changes WHERE class_id = ?1 ORDER BY revision ASC",
        )?;
        let rows = stmt.query_map(params![class_id], |row| row.get::<_, Vec<u8>>(0))?;

        let mut out = Vec::new();
        for payload in rows {
            out.push(decode_change_payload(&payload?)?);
        }
        Ok(out)
    }
}

struct RawClassRow {
    id: String,
    title: String,
    instructor_id: String,
    capacity: u32,
    status: String,
    enrolled: String,
    waitlist: String,
    revision: i64,
}

impl RawClassRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            instructor_id: row.get(2)?,
            capacity: row.get(3)?,
            status: row.get(4)?,
            enrolled: row.get(5)?,
            waitlist: row.get(6)?,
            revision: row.get(7)?,
        })
    }

    fn decode(self) -> StoreResult<ClassRecord> {
        let status = ClassStatus::parse(&self.status)
            .ok_or_else(|| StoreError::Corrupt(format!("unknown class status {:?}", self.status)))?;
        Ok(ClassRecord {
            id: self.id,
            title: self.title,
            instructor_id: self.instructor_id,
            capacity: self.capacity,
            enrolled: serde_json::from_str(&self.enrolled)?,
            waitlist: serde_json::from_str(&self.waitlist)?,
            status,
            revision: self.revision as Revision,
        })
    }
}

fn decode_change_payload(payload: &[u8]) -> StoreResult<RosterChange> {
    let envelope: ChangeEnvelope = serde_json::from_slice(payload)?;
    if envelope.format_version != CHANGE_FORMAT_VERSION {
        return Err(StoreError::Corrupt(format!(
            "unsupported change format version: {}",
            envelope.format_version
        )));
    }
    Ok(envelope.change)
}
