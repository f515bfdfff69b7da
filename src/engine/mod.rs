//! Pure enrollment decisions; no I/O.

/// Enroll/cancel decision functions and member standing.
pub mod decide;
/// Roster invariant checks.
pub mod invariants;
