//! Lock matching
//!
//! Pure functions over a lock set. The watcher runs them against its
//! replicated view; callers holding their own lock list can use them directly.

use bulwark_common::crd::{Lock, LockTarget};
use chrono::{DateTime, Utc};

use crate::error::LockError;

/// Whether `lock` is in force at `now` and selects any of `targets`
pub fn lock_applies(lock: &Lock, targets: &[LockTarget], now: DateTime<Utc>) -> bool {
    lock.is_in_force(now) && targets.iter().any(|t| lock.target().selects(t))
}

/// Locks in force at `now` that select any of `targets`, in iteration order
pub fn find_locks_in_force<'a>(
    locks: impl IntoIterator<Item = &'a Lock>,
    targets: &[LockTarget],
    now: DateTime<Utc>,
) -> Vec<&'a Lock> {
    locks
        .into_iter()
        .filter(|lock| lock_applies(lock, targets, now))
        .collect()
}

/// Fail with the first lock in force at `now` that selects any of `targets`
pub fn check_lock_in_force<'a>(
    locks: impl IntoIterator<Item = &'a Lock>,
    targets: &[LockTarget],
    now: DateTime<Utc>,
) -> Result<(), LockError> {
    match locks
        .into_iter()
        .find(|lock| lock_applies(lock, targets, now))
    {
        Some(lock) => Err(lock_in_force(lock)),
        None => Ok(()),
    }
}

/// Error describing `lock`
pub fn lock_in_force(lock: &Lock) -> LockError {
    LockError::LockInForce {
        name: lock.lock_name(),
        target: lock.target().clone(),
        message: lock.message().map(str::to_string),
    }
}
