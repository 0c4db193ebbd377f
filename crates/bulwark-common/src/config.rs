//! Environment configuration
//!
//! Provides trait-based access to environment variables so config loading can
//! be unit tested without touching process-global state.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

/// Trait for reading configuration from the environment
#[cfg_attr(test, mockall::automock)]
pub trait EnvConfig: Send + Sync {
    /// Get a variable, `None` if unset
    fn var(&self, key: &str) -> Option<String>;
}

/// Default implementation that reads process environment variables
#[derive(Clone, Copy, Debug, Default)]
pub struct OsEnv;

impl EnvConfig for OsEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Parse a variable, falling back to `default` when unset or invalid
///
/// Invalid values are logged and ignored.
pub fn parse_or<T>(env: &dyn EnvConfig, key: &str, default: T) -> T
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env.var(key) {
        Some(raw) if !raw.trim().is_empty() => match raw.trim().parse() {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %key, value = %raw, error = %e, "Ignoring invalid environment value");
                default
            }
        },
        _ => default,
    }
}

/// Read a duration given in whole seconds
pub fn secs_or(env: &dyn EnvConfig, key: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_or(env, key, default.as_secs()))
}

/// Read a duration given in milliseconds
pub fn millis_or(env: &dyn EnvConfig, key: &str, default: Duration) -> Duration {
    let millis = parse_or(env, key, default.as_millis() as u64);
    Duration::from_millis(millis)
}
