//! Replicated lock view
//!
//! A single background task keeps a process-local copy of every lock in sync
//! with a [`LockEventSource`]. Consumers query it through [`LockWatcher`]
//! handles and subscribe to change notifications.
//!
//! # Staleness
//!
//! The view starts unsynced. Whenever no watch has completed a full listing
//! for `max_staleness` (at startup or after a lost watch) the view is marked
//! stale. Only a complete listing on a fresh watch clears the flag, and the
//! replacement and the flag flip happen under one write lock, so a reader
//! never observes a partial listing as fresh.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use bulwark_common::config::{secs_or, EnvConfig};
use bulwark_common::crd::{Lock, LockTarget};
use bulwark_common::retry::{Backoff, RetryConfig};
use bulwark_common::{Clock, LockingMode};
use futures::StreamExt;
use parking_lot::RwLock;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::check;
use crate::error::LockError;
use crate::source::{LockEvent, LockEventSource, LockEventStream};

/// Default grace period before an unsynced view is declared stale
pub const DEFAULT_MAX_STALENESS: Duration = Duration::from_secs(300);

/// Env var overriding [`LockWatcherConfig::max_staleness`], in seconds
pub const ENV_MAX_STALENESS_SECS: &str = "BULWARK_LOCK_MAX_STALENESS_SECS";

/// Lock watcher configuration
#[derive(Clone, Debug, PartialEq)]
pub struct LockWatcherConfig {
    /// How long the view may go without a completed listing before it is stale
    pub max_staleness: Duration,
    /// Backoff between watch attempts
    pub retry: RetryConfig,
}

impl Default for LockWatcherConfig {
    fn default() -> Self {
        Self {
            max_staleness: DEFAULT_MAX_STALENESS,
            retry: RetryConfig::default(),
        }
    }
}

impl LockWatcherConfig {
    /// Defaults with environment overrides applied
    pub fn from_env(env: &dyn EnvConfig) -> Self {
        Self {
            max_staleness: secs_or(env, ENV_MAX_STALENESS_SECS, DEFAULT_MAX_STALENESS),
            ..Default::default()
        }
    }
}

#[derive(Default)]
struct LockView {
    locks: BTreeMap<String, Lock>,
    stale: bool,
}

struct Shared {
    view: RwLock<LockView>,
    changes: watch::Sender<u64>,
    resets: watch::Sender<u64>,
    loops: watch::Sender<u64>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
}

fn bump(tx: &watch::Sender<u64>) {
    tx.send_modify(|n| *n = n.wrapping_add(1));
}

impl Shared {
    fn replace(&self, locks: BTreeMap<String, Lock>) {
        let count = locks.len();
        {
            let mut view = self.view.write();
            view.locks = locks;
            view.stale = false;
        }
        info!(locks = count, "Lock view synchronized");
        bump(&self.changes);
        bump(&self.resets);
    }

    fn apply(&self, lock: Lock) {
        let name = lock.lock_name();
        debug!(lock = %name, target = %lock.target(), "Lock applied");
        self.view.write().locks.insert(name, lock);
        bump(&self.changes);
    }

    fn delete(&self, name: &str) {
        if self.view.write().locks.remove(name).is_some() {
            debug!(lock = %name, "Lock deleted");
            bump(&self.changes);
        }
    }

    fn mark_stale(&self) {
        let was_stale = std::mem::replace(&mut self.view.write().stale, true);
        if !was_stale {
            warn!("Lock view is stale");
            bump(&self.changes);
        }
    }
}

/// Cancels the background task once the last handle is dropped
struct StopOnDrop(CancellationToken);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

/// Handle to the shared lock view
///
/// Cheap to clone. Every clone talks to the same background task, which
/// stops when [`LockWatcher::shutdown`] is called or the last clone is dropped.
#[derive(Clone)]
pub struct LockWatcher {
    shared: Arc<Shared>,
    _stop: Arc<StopOnDrop>,
}

impl LockWatcher {
    /// Start watching `source`
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        config: LockWatcherConfig,
        source: Arc<dyn LockEventSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let shared = Arc::new(Shared {
            view: RwLock::new(LockView::default()),
            changes: watch::channel(0).0,
            resets: watch::channel(0).0,
            loops: watch::channel(0).0,
            clock,
            cancel: CancellationToken::new(),
        });

        let task = WatchLoop {
            backoff: Backoff::new(config.retry.clone()),
            stale_at: Some(Instant::now() + config.max_staleness),
            shared: shared.clone(),
            source,
            config,
        };
        tokio::spawn(task.run());

        let stop = Arc::new(StopOnDrop(shared.cancel.clone()));
        Self {
            shared,
            _stop: stop,
        }
    }

    /// Whether the view may be missing recent changes
    pub fn is_stale(&self) -> bool {
        self.shared.view.read().stale
    }

    /// Fail if a lock selecting any of `targets` is in force
    ///
    /// Under [`LockingMode::Strict`] a stale view is itself a lock on
    /// everyone.
    pub fn check_lock_in_force(
        &self,
        mode: LockingMode,
        targets: &[LockTarget],
    ) -> Result<(), LockError> {
        let now = self.shared.clock.now();
        let view = self.shared.view.read();
        check::check_lock_in_force(view.locks.values(), targets, now)?;
        if view.stale && mode == LockingMode::Strict {
            return Err(LockError::StaleLockView);
        }
        Ok(())
    }

    /// Locks in force that select any of `targets`, ordered by name
    pub fn find_locks_in_force(&self, targets: &[LockTarget]) -> Vec<Lock> {
        let now = self.shared.clock.now();
        let view = self.shared.view.read();
        check::find_locks_in_force(view.locks.values(), targets, now)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Snapshot of every lock in the view, ordered by name
    pub fn locks(&self) -> Vec<Lock> {
        self.shared.view.read().locks.values().cloned().collect()
    }

    /// Notified on every change to the view, including staleness
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.shared.changes.subscribe()
    }

    /// Notified each time a full listing replaces the view
    pub fn subscribe_resets(&self) -> watch::Receiver<u64> {
        self.shared.resets.subscribe()
    }

    /// Notified each time the background task finishes a processing step
    pub fn subscribe_loops(&self) -> watch::Receiver<u64> {
        self.shared.loops.subscribe()
    }

    /// Stop the background task
    ///
    /// The view is marked stale immediately so strict consumers disconnect
    /// instead of trusting a view that will no longer be updated.
    pub fn shutdown(&self) {
        self.shared.cancel.cancel();
        self.shared.mark_stale();
    }

    /// Whether [`LockWatcher::shutdown`] was called
    pub fn is_shutdown(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl std::fmt::Debug for LockWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let view = self.shared.view.read();
        f.debug_struct("LockWatcher")
            .field("locks", &view.locks.len())
            .field("stale", &view.stale)
            .finish()
    }
}

enum Exit {
    Shutdown,
    Lost(String),
}

struct WatchLoop {
    shared: Arc<Shared>,
    source: Arc<dyn LockEventSource>,
    config: LockWatcherConfig,
    backoff: Backoff,
    /// When the view becomes stale unless a listing completes first
    stale_at: Option<Instant>,
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

impl WatchLoop {
    async fn run(mut self) {
        info!(
            max_staleness_secs = self.config.max_staleness.as_secs(),
            "Lock watcher started"
        );

        loop {
            let opened = tokio::select! {
                _ = self.shared.cancel.cancelled() => break,
                _ = deadline(self.stale_at) => {
                    self.expire();
                    continue;
                }
                opened = self.source.watch() => opened,
            };

            let reason = match opened {
                Ok(stream) => match self.consume(stream).await {
                    Exit::Shutdown => break,
                    Exit::Lost(reason) => reason,
                },
                Err(e) => e.to_string(),
            };

            self.arm();
            let delay = self.backoff.next_delay();
            warn!(
                error = %reason,
                attempt = self.backoff.attempt(),
                retry_in_ms = delay.as_millis() as u64,
                "Lock watch lost, retrying"
            );
            bump(&self.shared.loops);

            let retry_at = Instant::now() + delay;
            loop {
                tokio::select! {
                    _ = self.shared.cancel.cancelled() => {
                        self.shutdown();
                        return;
                    }
                    _ = deadline(self.stale_at) => self.expire(),
                    _ = tokio::time::sleep_until(retry_at) => break,
                }
            }
        }

        self.shutdown();
    }

    /// Apply events from one watch until it is lost or the watcher stops
    async fn consume(&mut self, mut stream: LockEventStream) -> Exit {
        let mut listing: Option<BTreeMap<String, Lock>> = None;
        let mut synced = false;

        loop {
            let event = tokio::select! {
                _ = self.shared.cancel.cancelled() => return Exit::Shutdown,
                _ = deadline(self.stale_at) => {
                    self.expire();
                    continue;
                }
                event = stream.next() => event,
            };

            match event {
                Some(Ok(LockEvent::Init)) => {
                    listing = Some(BTreeMap::new());
                    synced = false;
                }
                Some(Ok(LockEvent::InitApply(lock))) => match listing.as_mut() {
                    Some(locks) => {
                        locks.insert(lock.lock_name(), lock);
                    }
                    None => debug!("Ignoring listed lock outside a listing"),
                },
                Some(Ok(LockEvent::InitDone)) => match listing.take() {
                    Some(locks) => {
                        self.shared.replace(locks);
                        self.stale_at = None;
                        self.backoff.reset();
                        synced = true;
                    }
                    None => debug!("Ignoring listing end without a start"),
                },
                Some(Ok(LockEvent::Apply(lock))) if synced => self.shared.apply(lock),
                Some(Ok(LockEvent::Delete(name))) if synced => self.shared.delete(&name),
                Some(Ok(_)) => debug!("Ignoring lock delta before listing completed"),
                Some(Err(e)) => return Exit::Lost(e.to_string()),
                None => return Exit::Lost("watch stream ended".to_string()),
            }

            bump(&self.shared.loops);
        }
    }

    /// Start the staleness countdown unless one is running or the view is already stale
    fn arm(&mut self) {
        if self.stale_at.is_none() && !self.shared.view.read().stale {
            self.stale_at = Some(Instant::now() + self.config.max_staleness);
        }
    }

    fn expire(&mut self) {
        self.stale_at = None;
        self.shared.mark_stale();
        bump(&self.shared.loops);
    }

    fn shutdown(&self) {
        self.shared.mark_stale();
        info!("Lock watcher stopped");
    }
}
