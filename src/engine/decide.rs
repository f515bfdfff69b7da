use crate::{
    roster::{ClassRecord, EnrollmentOutcome, EnrollmentResult, MemberStanding, Notification},
    types::{RosterAction, TemplateKind},
};

use super::invariants::{self, InvariantViolation};

/// Next roster state plus the outcome that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub next: ClassRecord,
    pub outcome: EnrollmentOutcome,
}

impl Decision {
    fn unchanged(record: &ClassRecord, result: EnrollmentResult) -> Self {
        Self {
            next: record.clone(),
            outcome: EnrollmentOutcome::quiet(result),
        }
    }

    /// Returns true when nothing needs to be written or sent.
    pub fn is_noop(&self) -> bool {
        self.outcome.result.is_noop()
    }
}

/// Dispatches to [`decide_enroll`] or [`decide_cancel`].
pub fn decide(
    action: RosterAction,
    record: &ClassRecord,
    member_id: &str,
) -> Result<Decision, InvariantViolation> {
    match action {
        RosterAction::Enroll => decide_enroll(record, member_id),
        RosterAction::Cancel => decide_cancel(record, member_id),
    }
}

/// Seats `member_id` if a seat is free, otherwise appends them to the waitlist tail.
pub fn decide_enroll(record: &ClassRecord, member_id: &str) -> Result<Decision, InvariantViolation> {
    if !record.status.accepts_changes() {
        return Ok(Decision::unchanged(record, EnrollmentResult::ClassUnavailable));
    }
    invariants::check(record)?;

    if record.is_enrolled(member_id) {
        return Ok(Decision::unchanged(record, EnrollmentResult::AlreadyEnrolled));
    }
    if record.is_waitlisted(member_id) {
        return Ok(Decision::unchanged(record, EnrollmentResult::AlreadyWaitlisted));
    }

    let mut next = record.clone();
    let outcome = if record.free_seats() > 0 {
        next.enrolled.push(member_id.to_string());
        EnrollmentOutcome {
            result: EnrollmentResult::Enrolled,
            promoted: None,
            notifications: vec![
                Notification::new(member_id, TemplateKind::Enrolled),
                Notification::new(record.instructor_id.clone(), TemplateKind::NewEnrollment),
            ],
        }
    } else {
        next.waitlist.push(member_id.to_string());
        EnrollmentOutcome {
            result: EnrollmentResult::Waitlisted,
            promoted: None,
            notifications: vec![Notification::new(member_id, TemplateKind::Waitlisted)],
        }
    };

    Ok(Decision { next, outcome })
}

/// Removes `member_id` from whichever list holds them, promoting the waitlist head
/// into a seat the member frees.
pub fn decide_cancel(record: &ClassRecord, member_id: &str) -> Result<Decision, InvariantViolation> {
    if !record.status.accepts_changes() {
        return Ok(Decision::unchanged(record, EnrollmentResult::ClassUnavailable));
    }
    invariants::check(record)?;

    let seat = record.enrolled.iter().position(|m| m == member_id);
    let queued = record.waitlist.iter().position(|m| m == member_id);

    let mut next = record.clone();
    let outcome = match (seat, queued) {
        (None, None) => return Ok(Decision::unchanged(record, EnrollmentResult::NotEnrolled)),
        (Some(_), Some(_)) => {
            return Err(InvariantViolation::MemberInBothLists(member_id.to_string()));
        }
        (None, Some(idx)) => {
            next.waitlist.remove(idx);
            EnrollmentOutcome {
                result: EnrollmentResult::LeftWaitlist,
                promoted: None,
                notifications: vec![Notification::new(member_id, TemplateKind::WaitlistLeft)],
            }
        }
        (Some(idx), None) => {
            next.enrolled.remove(idx);
            let mut notifications =
                vec![Notification::new(member_id, TemplateKind::CancellationConfirmed)];
            let promoted = if next.waitlist.is_empty() {
                None
            } else {
                let head = next.waitlist.remove(0);
                next.enrolled.push(head.clone());
                notifications.push(Notification::new(head.clone(), TemplateKind::SeatFreed));
                Some(head)
            };
            EnrollmentOutcome {
                result: EnrollmentResult::Cancelled,
                promoted,
                notifications,
            }
        }
    };

    Ok(Decision { next, outcome })
}

/// Reports where `member_id` sits in `record`.
pub fn standing(record: &ClassRecord, member_id: &str) -> MemberStanding {
    if record.is_enrolled(member_id) {
        return MemberStanding::Enrolled;
    }
    match record.waitlist.iter().position(|m| m == member_id) {
        Some(idx) => MemberStanding::Waitlisted { position: idx + 1 },
        None => MemberStanding::NotRegistered,
    }
}
