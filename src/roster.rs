//! Class roster record, draft, and per-request outcome types.

use serde::{Deserialize, Serialize};

use crate::{
    engine::invariants::InvariantViolation,
    types::{ClassId, ClassStatus, MemberId, Revision, TemplateKind},
};

/// Persisted roster state of one scheduled group class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRecord {
    /// Stable class identifier.
    pub id: ClassId,
    /// Display title, used in notification context.
    pub title: String,
    /// Instructor who hears about new enrollments.
    pub instructor_id: MemberId,
    /// Maximum number of enrolled members.
    pub capacity: u32,
    /// Members holding a confirmed seat, in enrollment order.
    pub enrolled: Vec<MemberId>,
    /// Members waiting for a seat, oldest first.
    pub waitlist: Vec<MemberId>,
    /// Lifecycle state.
    pub status: ClassStatus,
    /// Concurrency revision; advanced by the store on every commit.
    pub revision: Revision,
}

impl ClassRecord {
    /// Returns true when `member_id` holds a seat.
    pub fn is_enrolled(&self, member_id: &str) -> bool {
        self.enrolled.iter().any(|m| m == member_id)
    }

    /// Returns true when `member_id` is waiting for a seat.
    pub fn is_waitlisted(&self, member_id: &str) -> bool {
        self.waitlist.iter().any(|m| m == member_id)
    }

    /// Number of unoccupied seats.
    pub fn free_seats(&self) -> usize {
        (self.capacity as usize).saturating_sub(self.enrolled.len())
    }
}

/// Creation payload handed over by the scheduling collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassDraft {
    /// Identifier chosen by the scheduler.
    pub id: ClassId,
    /// Display title.
    pub title: String,
    /// Instructor running the class.
    pub instructor_id: MemberId,
    /// Seat count; must be positive.
    pub capacity: u32,
}

impl ClassDraft {
    /// Materializes a scheduled record with empty lists at revision 0.
    pub fn into_record(self) -> Result<ClassRecord, InvariantViolation> {
        if self.capacity == 0 {
            return Err(InvariantViolation::ZeroCapacity);
        }
        Ok(ClassRecord {
            id: self.id,
            title: self.title,
            instructor_id: self.instructor_id,
            capacity: self.capacity,
            enrolled: Vec::new(),
            waitlist: Vec::new(),
            status: ClassStatus::Scheduled,
            revision: 0,
        })
    }
}

/// Business-level result of an enroll or cancel request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EnrollmentResult {
    /// Member took a free seat.
    Enrolled,
    /// Class was full; member appended to the waitlist.
    Waitlisted,
    /// Member already holds a seat.
    AlreadyEnrolled,
    /// Member is already waiting.
    AlreadyWaitlisted,
    /// Cancel requested by someone on neither list.
    NotEnrolled,
    /// Class is not open for roster changes.
    ClassUnavailable,
    /// Member gave up their seat.
    Cancelled,
    /// Member left the waitlist.
    LeftWaitlist,
}

impl EnrollmentResult {
    /// Returns true for results that leave the record untouched.
    pub fn is_noop(self) -> bool {
        matches!(
            self,
            EnrollmentResult::AlreadyEnrolled
                | EnrollmentResult::AlreadyWaitlisted
                | EnrollmentResult::NotEnrolled
                | EnrollmentResult::ClassUnavailable
        )
    }

    pub(crate) fn as_str(self) -> &'static str {
        match self {
            EnrollmentResult::Enrolled => "enrolled",
            EnrollmentResult::Waitlisted => "waitlisted",
            EnrollmentResult::AlreadyEnrolled => "already_enrolled",
            EnrollmentResult::AlreadyWaitlisted => "already_waitlisted",
            EnrollmentResult::NotEnrolled => "not_enrolled",
            EnrollmentResult::ClassUnavailable => "class_unavailable",
            EnrollmentResult::Cancelled => "cancelled",
            EnrollmentResult::LeftWaitlist => "left_waitlist",
        }
    }
}

/// One message to hand to the notifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Who receives it.
    pub recipient_id: MemberId,
    /// Which template to render.
    pub kind: TemplateKind,
}

impl Notification {
    pub(crate) fn new(recipient_id: impl Into<MemberId>, kind: TemplateKind) -> Self {
        Self {
            recipient_id: recipient_id.into(),
            kind,
        }
    }
}

/// Ephemeral per-request outcome; never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrollmentOutcome {
    /// Business result.
    pub result: EnrollmentResult,
    /// Member moved from the waitlist into a seat, if any.
    pub promoted: Option<MemberId>,
    /// Messages to dispatch once the change is durable.
    pub notifications: Vec<Notification>,
}

impl EnrollmentOutcome {
    pub(crate) fn quiet(result: EnrollmentResult) -> Self {
        Self {
            result,
            promoted: None,
            notifications: Vec::new(),
        }
    }
}

/// Where a member currently stands in a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MemberStanding {
    /// Holds a seat.
    Enrolled,
    /// Waiting; `position` is 1 for the head of the queue.
    Waitlisted {
        /// 1-based queue position.
        position: usize,
    },
    /// On neither list.
    NotRegistered,
}
