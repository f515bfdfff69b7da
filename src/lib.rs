//! Class-capacity enrollment with FIFO waitlist promotion under optimistic concurrency.
//!
//! # Examples
//!
//! Pure decisions with [`engine::decide`]:
//! ```
//! use rollcall::{
//!     engine::decide::{decide_cancel, decide_enroll},
//!     roster::{ClassDraft, EnrollmentResult},
//! };
//!
//! let mut class = ClassDraft {
//!     id: "spin-0700".to_string(),
//!     title: "Morning Spin".to_string(),
//!     instructor_id: "coach-ana".to_string(),
//!     capacity: 1,
//! }
//! .into_record()
//! .expect("positive capacity");
//!
//! class = decide_enroll(&class, "m-1").expect("consistent").next;
//! let queued = decide_enroll(&class, "m-2").expect("consistent");
//! assert_eq!(queued.outcome.result, EnrollmentResult::Waitlisted);
//!
//! let freed = decide_cancel(&queued.next, "m-1").expect("consistent");
//! assert_eq!(freed.outcome.promoted.as_deref(), Some("m-2"));
//! ```
//!
//! Service usage with the SQLite store:
//! ```no_run
//! use std::sync::Arc;
//!
//! use rollcall::{
//!     notify::TracingNotifier,
//!     persist::{sqlite::SqliteClassStore, ClassStore},
//!     roster::ClassDraft,
//!     service::{config::ServiceConfig, enrollment::EnrollmentService},
//! };
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = SqliteClassStore::open("classes.db").expect("open sqlite");
//! store.create(ClassDraft {
//!     id: "yoga-1800".to_string(),
//!     title: "Evening Yoga".to_string(),
//!     instructor_id: "coach-bo".to_string(),
//!     capacity: 12,
//! }.into_record().expect("record")).expect("create");
//!
//! let service = EnrollmentService::new(
//!     Arc::new(store),
//!     Arc::new(TracingNotifier),
//!     ServiceConfig::default(),
//! ).expect("config");
//! let outcome = service.enroll("yoga-1800", "m-42").await.expect("enroll");
//! println!("{:?}", outcome.result);
//! # }
//! ```

/// Roster change journal entries.
pub mod change;
/// In-memory class store.
pub mod core;
/// Pure enroll/cancel decisions and invariant checks.
pub mod engine;
/// Notifier abstraction and bundled notifiers.
pub mod notify;
/// Persistence abstraction and SQLite implementation.
pub mod persist;
/// Class records, drafts, and outcomes.
pub mod roster;
/// Retrying enrollment service.
pub mod service;
/// Tracing subscriber setup.
pub mod telemetry;
/// Shared primitive types and enums.
pub mod types;
