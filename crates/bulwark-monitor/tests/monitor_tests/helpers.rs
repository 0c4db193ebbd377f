//! Shared fixtures for monitor integration tests

#![allow(dead_code)]

use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use bulwark_common::crd::{Lock, LockSpec, LockTarget, RemoteCluster};
use bulwark_common::retry::RetryConfig;
use bulwark_common::{AccessChecker, AccessError, FakeClock, Identity, LockingMode};
use bulwark_lock::{LockWatcher, LockWatcherConfig, MemoryLockSource};
use bulwark_monitor::{
    ChannelEmitter, ConnectionMonitor, ConnectionMonitorConfig, DisconnectRecord,
    MonitorContext, MonitorSettings, TrackingConn,
};
use chrono::{DateTime, TimeZone, Utc};
use tokio::io::{duplex, AsyncRead, AsyncWrite, DuplexStream, ReadBuf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Server the monitored connections are attached to
pub const SERVER_ID: &str = "node-1";

/// Grace period before the lock view goes stale
pub const MAX_STALENESS: Duration = Duration::from_secs(5);

/// Access policy that passes cluster defaults through, with optional overrides
#[derive(Clone, Debug, Default)]
pub struct Policy {
    pub locking_mode: Option<LockingMode>,
}

impl Policy {
    pub fn strict() -> Self {
        Self {
            locking_mode: Some(LockingMode::Strict),
        }
    }
}

impl AccessChecker for Policy {
    fn check_access_to_remote_cluster(&self, _cluster: &RemoteCluster) -> Result<(), AccessError> {
        Ok(())
    }

    fn adjust_disconnect_expired_cert(&self, disconnect: bool) -> bool {
        disconnect
    }

    fn adjust_client_idle_timeout(&self, timeout: Duration) -> Duration {
        timeout
    }

    fn locking_mode(&self, default: LockingMode) -> LockingMode {
        self.locking_mode.unwrap_or(default)
    }
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
}

pub fn lock(name: &str, target: LockTarget) -> Lock {
    Lock::new(
        name,
        LockSpec {
            target,
            message: Some("Revoked by security team".to_string()),
            expires: None,
        },
    )
}

pub fn identity(user: &str) -> Identity {
    Identity {
        username: user.to_string(),
        roles: vec!["dev".to_string()],
        ..Default::default()
    }
}

/// One monitored connection
pub struct Session {
    pub context: MonitorContext,
    pub conn: TrackingConn<DuplexStream>,
    pub client: DuplexStream,
}

/// Lock backend, watcher and monitor wired together
pub struct Harness {
    pub source: MemoryLockSource,
    pub watcher: LockWatcher,
    pub clock: FakeClock,
    pub monitor: ConnectionMonitor,
    pub records: mpsc::UnboundedReceiver<DisconnectRecord>,
}

impl Harness {
    pub fn new(settings: MonitorSettings) -> Self {
        let clock = FakeClock::new(start_time());
        let source = MemoryLockSource::new();
        let watcher = LockWatcher::spawn(
            LockWatcherConfig {
                max_staleness: MAX_STALENESS,
                retry: RetryConfig {
                    initial_delay: Duration::from_millis(100),
                    max_delay: Duration::from_secs(1),
                    backoff_multiplier: 2.0,
                    jitter: false,
                },
            },
            Arc::new(source.clone()),
            Arc::new(clock.clone()),
        );
        let (emitter, records) = ChannelEmitter::new();
        let monitor = ConnectionMonitor::new(ConnectionMonitorConfig {
            lock_watcher: watcher.clone(),
            emitter: Arc::new(emitter),
            clock: Arc::new(clock.clone()),
            server_id: SERVER_ID.to_string(),
            settings,
        })
        .unwrap();

        Self {
            source,
            watcher,
            clock,
            monitor,
            records,
        }
    }

    /// Harness whose lock view has completed its first listing
    pub async fn synced(settings: MonitorSettings) -> Self {
        let harness = Self::new(settings);
        let mut resets = harness.watcher.subscribe_resets();
        tokio::time::timeout(Duration::from_secs(30), resets.changed())
            .await
            .expect("lock view never synced")
            .unwrap();
        harness
    }

    pub fn connect(&self, identity: &Identity, policy: &Policy) -> Session {
        let (client, server) = duplex(1024);
        let (context, conn) = self
            .monitor
            .monitor_conn(identity, policy, server, &CancellationToken::new())
            .unwrap();
        Session {
            context,
            conn,
            client,
        }
    }

    pub async fn next_record(&mut self) -> DisconnectRecord {
        tokio::time::timeout(Duration::from_secs(30), self.records.recv())
            .await
            .expect("no disconnect record")
            .expect("audit channel closed")
    }
}

/// Whether the context is cancelled within `within`
pub async fn cancelled_within(context: &MonitorContext, within: Duration) -> bool {
    tokio::time::timeout(within, context.cancelled())
        .await
        .is_ok()
}

/// Transport that counts how many times it was closed
pub struct CountingStream {
    inner: DuplexStream,
    closes: Arc<AtomicUsize>,
}

impl CountingStream {
    pub fn new(inner: DuplexStream, closes: Arc<AtomicUsize>) -> Self {
        Self { inner, closes }
    }
}

impl Drop for CountingStream {
    fn drop(&mut self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

impl AsyncRead for CountingStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for CountingStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}
