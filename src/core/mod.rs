//! In-memory class store.

/// Mutex-guarded [`crate::persist::ClassStore`] implementation.
pub mod store;
