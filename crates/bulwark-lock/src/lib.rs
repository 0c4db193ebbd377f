//! Lock enforcement for bulwark
//!
//! Keeps a replicated, eventually-consistent view of every [`Lock`] and
//! answers whether a set of principals is locked out. The view tracks its own
//! freshness: when the backing watch is lost for longer than the configured
//! grace period it reports itself stale, and strict consumers treat that as a
//! lock on everyone.
//!
//! [`Lock`]: bulwark_common::crd::Lock

#![deny(missing_docs)]

pub mod check;
pub mod error;
pub mod source;
pub mod watcher;

pub use check::{check_lock_in_force, find_locks_in_force};
pub use error::{LockError, WatchError};
pub use source::{KubeLockSource, LockEvent, LockEventSource, LockEventStream, MemoryLockSource};
pub use watcher::{LockWatcher, LockWatcherConfig};
