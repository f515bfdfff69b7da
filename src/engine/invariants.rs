use hashbrown::HashSet;
use thiserror::Error;

use crate::{roster::ClassRecord, types::MemberId};

/// Roster state that can only arise from a bug elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("class capacity must be positive")]
    ZeroCapacity,
    #[error("{enrolled} members enrolled but capacity is {capacity}")]
    OverCapacity { capacity: u32, enrolled: usize },
    #[error("member {0} appears more than once in the enrolled list")]
    DuplicateEnrolled(MemberId),
    #[error("member {0} appears more than once in the waitlist")]
    DuplicateWaitlisted(MemberId),
    #[error("member {0} is both enrolled and waitlisted")]
    MemberInBothLists(MemberId),
}

/// Verifies capacity, uniqueness, and list disjointness of `record`.
pub fn check(record: &ClassRecord) -> Result<(), InvariantViolation> {
    if record.capacity == 0 {
        return Err(InvariantViolation::ZeroCapacity);
    }
    if record.enrolled.len() > record.capacity as usize {
        return Err(InvariantViolation::OverCapacity {
            capacity: record.capacity,
            enrolled: record.enrolled.len(),
        });
    }

    let mut seated: HashSet<&str> = HashSet::with_capacity(record.enrolled.len());
    for member in &record.enrolled {
        if !seated.insert(member.as_str()) {
            return Err(InvariantViolation::DuplicateEnrolled(member.clone()));
        }
    }

    let mut waiting: HashSet<&str> = HashSet::with_capacity(record.waitlist.len());
    for member in &record.waitlist {
        if seated.contains(member.as_str()) {
            return Err(InvariantViolation::MemberInBothLists(member.clone()));
        }
        if !waiting.insert(member.as_str()) {
            return Err(InvariantViolation::DuplicateWaitlisted(member.clone()));
        }
    }

    Ok(())
}
