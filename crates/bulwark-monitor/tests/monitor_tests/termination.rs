//! Close discipline

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bulwark_common::crd::LockTarget;
use bulwark_monitor::{DisconnectReason, MonitorSettings};
use tokio::io::{duplex, AsyncReadExt, AsyncWriteExt};
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

use super::helpers::{
    cancelled_within, identity, lock, CountingStream, Harness, Policy,
};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn racing_triggers_close_once_and_emit_once() {
    let mut harness = Harness::synced(MonitorSettings::default()).await;
    let closes = Arc::new(AtomicUsize::new(0));
    let (_client, server) = duplex(64);
    let (context, _conn) = harness
        .monitor
        .monitor_conn(
            &identity("alice"),
            &Policy::default(),
            CountingStream::new(server, closes.clone()),
            &CancellationToken::new(),
        )
        .unwrap();

    let barrier = Arc::new(Barrier::new(9));
    let mut tasks = Vec::new();
    for i in 0..8u64 {
        let context = context.clone();
        let barrier = barrier.clone();
        tasks.push(tokio::spawn(async move {
            barrier.wait().await;
            let reason = if i % 2 == 0 {
                DisconnectReason::StaleLockView
            } else {
                DisconnectReason::IdleTimeout {
                    timeout: Duration::from_secs(i),
                }
            };
            context.terminate(reason)
        }));
    }
    // The monitor's own lock trigger races the direct terminations
    harness
        .source
        .upsert(lock("offboard-alice", LockTarget::user("alice")));
    barrier.wait().await;

    let mut wins = 0;
    for task in tasks {
        if task.await.unwrap() {
            wins += 1;
        }
    }
    context.cancelled().await;

    assert!(wins <= 1);
    assert!(context.cause().is_some());
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    let record = harness.next_record().await;
    assert_eq!(Some(record.reason), context.cause());
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.records.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn terminated_connection_reads_eof_and_rejects_writes() {
    let harness = Harness::synced(MonitorSettings::default()).await;
    let mut session = harness.connect(&identity("alice"), &Policy::default());

    session.client.write_all(b"hello").await.unwrap();
    let mut buf = [0u8; 5];
    session.conn.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"hello");

    harness
        .source
        .upsert(lock("offboard-alice", LockTarget::user("alice")));
    assert!(cancelled_within(&session.context, Duration::from_secs(2)).await);

    // The peer sees the transport close
    let mut peer = [0u8; 8];
    assert_eq!(session.client.read(&mut peer).await.unwrap(), 0);

    assert_eq!(session.conn.read(&mut buf).await.unwrap(), 0);
    let err = session.conn.write_all(b"more").await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::BrokenPipe);
}

#[tokio::test(start_paused = true)]
async fn local_close_stops_monitor_without_audit() {
    let mut harness = Harness::synced(MonitorSettings::default()).await;
    let mut session = harness.connect(&identity("alice"), &Policy::default());

    session.conn.shutdown().await.unwrap();
    assert!(session.context.is_cancelled());
    assert_eq!(session.context.cause(), Some(DisconnectReason::Closed));

    // A later lock is not reported against the closed connection
    harness
        .source
        .upsert(lock("offboard-alice", LockTarget::user("alice")));
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(session.context.cause(), Some(DisconnectReason::Closed));
    assert!(harness.records.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn parent_cancellation_closes_without_audit() {
    let mut harness = Harness::synced(MonitorSettings::default()).await;
    let parent = CancellationToken::new();
    let (mut client, server) = duplex(64);
    let (context, _conn) = harness
        .monitor
        .monitor_conn(&identity("alice"), &Policy::default(), server, &parent)
        .unwrap();

    parent.cancel();
    assert!(cancelled_within(&context, Duration::from_millis(100)).await);

    // Give the monitor a chance to notice and release the transport
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(context.cause(), Some(DisconnectReason::Closed));
    let mut buf = [0u8; 4];
    assert_eq!(client.read(&mut buf).await.unwrap(), 0);
    assert!(harness.records.try_recv().is_err());
}
