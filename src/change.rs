//! Roster change journal entries and persistence wrappers.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::{
    roster::EnrollmentResult,
    types::{ClassId, MemberId, Revision, RosterAction},
};

/// Version number for serialized [`ChangeEnvelope`] payloads.
pub const CHANGE_FORMAT_VERSION: u16 = 1;

/// Immutable record of one committed roster mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterChange {
    /// Class that changed.
    pub class_id: ClassId,
    /// Revision the record reached with this change.
    pub revision: Revision,
    /// Commit timestamp in milliseconds.
    pub ts_ms: u64,
    /// Requested action.
    pub action: RosterAction,
    /// Member who asked.
    pub member_id: MemberId,
    /// Business result that was committed.
    pub result: EnrollmentResult,
    /// Waitlisted member promoted by this change.
    pub promoted: Option<MemberId>,
}

impl RosterChange {
    /// Stamps a change that will land at `revision`.
    pub fn new(
        class_id: ClassId,
        revision: Revision,
        action: RosterAction,
        member_id: MemberId,
        result: EnrollmentResult,
        promoted: Option<MemberId>,
    ) -> Self {
        Self {
            class_id,
            revision,
            ts_ms: now_ms(),
            action,
            member_id,
            result,
            promoted,
        }
    }
}

/// Versioned wrapper for stable on-disk payload decoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEnvelope {
    /// Payload format version.
    pub format_version: u16,
    /// Wrapped change.
    pub change: RosterChange,
}

impl ChangeEnvelope {
    /// Constructs an envelope using [`CHANGE_FORMAT_VERSION`].
    pub fn new(change: RosterChange) -> Self {
        Self {
            format_version: CHANGE_FORMAT_VERSION,
            change,
        }
    }
}

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
