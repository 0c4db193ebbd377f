//! Per-connection monitor
//!
//! One task per connection re-evaluates the connection whenever the lock view
//! changes and on a fixed tick, and terminates it once its certificate has
//! expired, the client has been idle too long, a lock selects it, or the lock
//! view went stale under strict locking. Every trigger is evaluated once as
//! soon as the monitor starts so connections that are already expired or
//! locked are caught without waiting for an event.

use std::sync::Arc;
use std::time::Duration;

use bulwark_common::config::{millis_or, parse_or, secs_or, EnvConfig};
use bulwark_common::crd::LockTarget;
use bulwark_common::{AccessChecker, Clock, Identity, LockingMode, ENV_LOCKING_MODE};
use bulwark_lock::LockWatcher;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::audit::AuditEmitter;
use crate::conn::{ActivityTracker, AuditTarget, MonitorContext, TrackingConn};
use crate::error::MonitorError;
use crate::reason::DisconnectReason;

/// Default period between expiry and idle re-checks
pub const DEFAULT_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Env var overriding [`MonitorSettings::check_interval`], in milliseconds
pub const ENV_CHECK_INTERVAL_MS: &str = "BULWARK_MONITOR_CHECK_INTERVAL_MS";

/// Env var overriding [`MonitorSettings::disconnect_expired_cert`]
pub const ENV_DISCONNECT_EXPIRED_CERT: &str = "BULWARK_DISCONNECT_EXPIRED_CERT";

/// Env var overriding [`MonitorSettings::client_idle_timeout`], in seconds
pub const ENV_CLIENT_IDLE_TIMEOUT_SECS: &str = "BULWARK_CLIENT_IDLE_TIMEOUT_SECS";

/// Cluster-wide monitoring defaults, before per-principal adjustment
#[derive(Clone, Debug, PartialEq)]
pub struct MonitorSettings {
    /// Period between expiry and idle re-checks
    pub check_interval: Duration,
    /// Disconnect clients when their certificate expires
    pub disconnect_expired_cert: bool,
    /// Disconnect clients idle for this long (zero disables)
    pub client_idle_timeout: Duration,
    /// Locking mode when the principal's policy does not override it
    pub locking_mode: LockingMode,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            check_interval: DEFAULT_CHECK_INTERVAL,
            disconnect_expired_cert: false,
            client_idle_timeout: Duration::ZERO,
            locking_mode: LockingMode::BestEffort,
        }
    }
}

impl MonitorSettings {
    /// Defaults with environment overrides applied
    pub fn from_env(env: &dyn EnvConfig) -> Self {
        let defaults = Self::default();
        Self {
            check_interval: millis_or(env, ENV_CHECK_INTERVAL_MS, defaults.check_interval),
            disconnect_expired_cert: parse_or(
                env,
                ENV_DISCONNECT_EXPIRED_CERT,
                defaults.disconnect_expired_cert,
            ),
            client_idle_timeout: secs_or(
                env,
                ENV_CLIENT_IDLE_TIMEOUT_SECS,
                defaults.client_idle_timeout,
            ),
            locking_mode: parse_or(env, ENV_LOCKING_MODE, defaults.locking_mode),
        }
    }
}

/// Effective certificate expiry to enforce for `identity`
///
/// `None` when the principal's policy does not disconnect on expiry. An
/// MFA-verified certificate carved from a longer session defers to that
/// session's expiry.
pub fn get_disconnect_expired_cert_from_identity(
    checker: &dyn AccessChecker,
    disconnect_expired_cert: bool,
    identity: &Identity,
) -> Option<DateTime<Utc>> {
    if !checker.adjust_disconnect_expired_cert(disconnect_expired_cert) {
        return None;
    }
    match identity.previous_identity_expires {
        Some(previous) if identity.is_mfa_verified() => Some(previous),
        _ => identity.expires,
    }
}

/// Everything one monitor task needs
pub struct MonitorConfig {
    /// Shared lock view
    pub lock_watcher: LockWatcher,
    /// Targets a lock may select this connection by
    pub lock_targets: Vec<LockTarget>,
    /// Effective locking mode for the principal
    pub locking_mode: LockingMode,
    /// Certificate expiry to enforce, if any
    pub disconnect_expired_cert: Option<DateTime<Utc>>,
    /// Idle timeout to enforce (zero disables)
    pub client_idle_timeout: Duration,
    /// Period between expiry and idle re-checks
    pub check_interval: Duration,
    /// Wall clock for expiry and idle evaluation
    pub clock: Arc<dyn Clock>,
    /// Client activity of the connection
    pub tracker: Arc<dyn ActivityTracker>,
    /// Context to terminate
    pub context: MonitorContext,
}

impl MonitorConfig {
    fn validate(&self) -> Result<(), MonitorError> {
        if self.check_interval.is_zero() {
            return Err(MonitorError::invalid_config(
                "check interval must be positive",
            ));
        }
        if self.lock_targets.is_empty() {
            return Err(MonitorError::invalid_config(
                "at least one lock target is required",
            ));
        }
        Ok(())
    }
}

/// Start supervising a connection
///
/// Spawns the monitor task; the returned handle completes once the context is
/// cancelled. Must be called from within a tokio runtime.
pub fn start_monitor(config: MonitorConfig) -> Result<JoinHandle<()>, MonitorError> {
    config.validate()?;

    // Subscribe before the first check so no change can slip in between
    let changes = config.lock_watcher.subscribe();
    debug!(
        targets = config.lock_targets.len(),
        locking_mode = %config.locking_mode,
        idle_timeout_secs = config.client_idle_timeout.as_secs(),
        "Connection monitor started"
    );
    Ok(tokio::spawn(Monitor { config, changes }.run()))
}

struct Monitor {
    config: MonitorConfig,
    changes: watch::Receiver<u64>,
}

impl Monitor {
    async fn run(mut self) {
        let context = self.config.context.clone();

        if let Some(reason) = self.check() {
            context.terminate(reason);
            return;
        }

        let period = self.config.check_interval;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut watching = true;

        loop {
            tokio::select! {
                _ = context.cancelled() => break,
                _ = ticker.tick() => {}
                changed = self.changes.changed(), if watching => {
                    if changed.is_err() {
                        warn!("Lock watcher gone, treating lock view as stale");
                        watching = false;
                        if self.config.locking_mode == LockingMode::Strict {
                            context.terminate(DisconnectReason::StaleLockView);
                            break;
                        }
                    }
                }
            }

            if let Some(reason) = self.check() {
                context.terminate(reason);
                break;
            }
        }

        // Cancelled through the parent
        if context.cause().is_none() {
            context.terminate(DisconnectReason::Closed);
        }
    }

    fn check(&self) -> Option<DisconnectReason> {
        let config = &self.config;
        let now = config.clock.now();

        if let Some(expires) = config.disconnect_expired_cert {
            if expires <= now {
                return Some(DisconnectReason::CertExpired { expires });
            }
        }

        if !config.client_idle_timeout.is_zero() {
            let idle = (now - config.tracker.last_active()).to_std().unwrap_or_default();
            if idle >= config.client_idle_timeout {
                return Some(DisconnectReason::IdleTimeout {
                    timeout: config.client_idle_timeout,
                });
            }
        }

        config
            .lock_watcher
            .check_lock_in_force(config.locking_mode, &config.lock_targets)
            .err()
            .map(DisconnectReason::from)
    }
}

/// Process-wide settings shared by every monitored connection
pub struct ConnectionMonitorConfig {
    /// Shared lock view
    pub lock_watcher: LockWatcher,
    /// Sink for disconnect records
    pub emitter: Arc<dyn AuditEmitter>,
    /// Wall clock
    pub clock: Arc<dyn Clock>,
    /// Identity of this server, also used as a node lock target
    pub server_id: String,
    /// Cluster-wide monitoring defaults
    pub settings: MonitorSettings,
}

/// Attaches monitors to authenticated connections
pub struct ConnectionMonitor {
    config: ConnectionMonitorConfig,
}

impl ConnectionMonitor {
    /// Create a monitor factory
    pub fn new(config: ConnectionMonitorConfig) -> Result<Self, MonitorError> {
        if config.settings.check_interval.is_zero() {
            return Err(MonitorError::invalid_config(
                "check interval must be positive",
            ));
        }
        Ok(Self { config })
    }

    /// Lock targets for `identity` on this server
    pub fn lock_targets(&self, identity: &Identity) -> Vec<LockTarget> {
        let mut targets = identity.lock_targets();
        if !self.config.server_id.is_empty() {
            targets.push(LockTarget::node(&self.config.server_id));
        }
        targets
    }

    /// Supervise `conn`, authenticated as `identity`
    ///
    /// The caller must use the returned connection in place of `conn`. The
    /// context is cancelled once the connection is terminated or `parent` is
    /// cancelled; its cause says why.
    pub fn monitor_conn<T>(
        &self,
        identity: &Identity,
        checker: &dyn AccessChecker,
        conn: T,
        parent: &CancellationToken,
    ) -> Result<(MonitorContext, TrackingConn<T>), MonitorError>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let settings = &self.config.settings;
        let context = MonitorContext::new(
            parent,
            self.config.clock.clone(),
            Some(AuditTarget {
                emitter: self.config.emitter.clone(),
                user: identity.username.clone(),
                server_id: self.config.server_id.clone(),
            }),
        );

        let monitor = MonitorConfig {
            lock_watcher: self.config.lock_watcher.clone(),
            lock_targets: self.lock_targets(identity),
            locking_mode: checker.locking_mode(settings.locking_mode),
            disconnect_expired_cert: get_disconnect_expired_cert_from_identity(
                checker,
                settings.disconnect_expired_cert,
                identity,
            ),
            client_idle_timeout: checker.adjust_client_idle_timeout(settings.client_idle_timeout),
            check_interval: settings.check_interval,
            clock: self.config.clock.clone(),
            tracker: context.activity(),
            context: context.clone(),
        };
        monitor.validate()?;

        let conn = context.track(conn);
        start_monitor(monitor)?;
        debug!(user = %identity.username, "Monitoring connection");
        Ok((context, conn))
    }
}
