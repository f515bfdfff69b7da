//! Shared primitive IDs and roster-related enums.

use serde::{Deserialize, Serialize};

/// Opaque class identifier.
pub type ClassId = String;
/// Opaque member identifier (members and instructors share this space).
pub type MemberId = String;
/// Optimistic-concurrency revision of a class record.
pub type Revision = u64;

/// Lifecycle state of a scheduled class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ClassStatus {
    /// Open for enrollment and cancellation.
    Scheduled,
    /// Called off by the scheduler.
    Cancelled,
    /// Already took place.
    Completed,
}

impl ClassStatus {
    /// Returns true when roster mutations are permitted.
    pub fn accepts_changes(self) -> bool {
        matches!(self, ClassStatus::Scheduled)
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            ClassStatus::Scheduled => "scheduled",
            ClassStatus::Cancelled => "cancelled",
            ClassStatus::Completed => "completed",
        }
    }

    pub(crate) fn parse(s: &str) -> Option<Self> {
        match s {
            "scheduled" => Some(ClassStatus::Scheduled),
            "cancelled" => Some(ClassStatus::Cancelled),
            "completed" => Some(ClassStatus::Completed),
            _ => None,
        }
    }
}

/// Message template a notification should be rendered with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TemplateKind {
    /// Member got a seat.
    Enrolled,
    /// Instructor learns about a new seat holder.
    NewEnrollment,
    /// Member was placed on the waitlist.
    Waitlisted,
    /// Member gave up a seat.
    CancellationConfirmed,
    /// Member left the waitlist.
    WaitlistLeft,
    /// Waitlisted member was promoted into a freed seat.
    SeatFreed,
}

/// Roster action requested by a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RosterAction {
    /// Take a seat or join the waitlist.
    Enroll,
    /// Give up a seat or leave the waitlist.
    Cancel,
}
