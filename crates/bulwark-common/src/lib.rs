//! Common types for bulwark: CRDs, identities, access decisions, and utilities

#![deny(missing_docs)]

pub mod access;
pub mod clock;
pub mod config;
pub mod crd;
pub mod error;
pub mod identity;
pub mod retry;
pub mod telemetry;

pub use access::{AccessChecker, LockingMode};
pub use clock::{Clock, FakeClock, SystemClock};
pub use error::AccessError;
pub use identity::Identity;

/// Env var overriding the cluster-wide locking mode
pub const ENV_LOCKING_MODE: &str = "BULWARK_LOCKING_MODE";
