//! Roster event stream payloads.

use crate::{
    roster::EnrollmentResult,
    types::{ClassId, MemberId, Revision, RosterAction},
};

/// Events broadcast by the enrollment service after a write commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterEvent {
    /// A roster change became durable.
    Committed {
        /// Class that changed.
        class_id: ClassId,
        /// Revision reached by the commit.
        revision: Revision,
        /// Requested action.
        action: RosterAction,
        /// Member who asked.
        member_id: MemberId,
        /// Committed business result.
        result: EnrollmentResult,
        /// Member promoted off the waitlist.
        promoted: Option<MemberId>,
    },
}
