//! Enrollment orchestration over a store and a notifier.

/// Service configuration.
pub mod config;
/// Enroll/cancel orchestration, call options, and errors.
pub mod enrollment;
/// Event stream types emitted after commits.
pub mod events;
