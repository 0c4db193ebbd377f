//! Integration tests for connection monitoring
//!
//! Each test runs real monitors against a real lock watcher fed by the
//! in-memory lock backend, with a fake wall clock and paused tokio time.
//!
//! - `expiry`: certificate expiry and client idleness
//! - `locks`: locks created before and after a connection is attached,
//!   and strict locking over a stale lock view
//! - `termination`: close discipline when several triggers race, and local
//!   or parent-driven shutdown
//!
//! ```bash
//! cargo test -p bulwark-monitor --test monitor
//! ```

mod expiry;
mod helpers;
mod locks;
mod termination;
