//! cronwarden-guard: login brute-force throttling.
//!
//! Two independent counters decide whether a login may proceed: failed
//! attempts per username, read from the durable login log, and failed
//! attempts per origin address, held in memory by [`OriginFailures`].

pub mod origin;
pub mod throttle;

pub use origin::{ORIGIN_WINDOW, OriginFailures};
pub use throttle::{
    DEFAULT_MAX_ORIGIN_FAILURES, DEFAULT_MAX_USERNAME_FAILURES, LoginThrottle, ThrottleLimits,
    USERNAME_WINDOW_SECS,
};

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("Storage error: {0}")]
    Storage(#[from] cronwarden_storage::StorageError),
}
