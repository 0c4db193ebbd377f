//! Locks and lock view staleness

use std::time::Duration;

use bulwark_common::crd::{Lock, LockSpec, LockTarget};
use bulwark_common::LockingMode;
use bulwark_monitor::{DisconnectReason, MonitorSettings};

use super::helpers::{
    cancelled_within, identity, lock, start_time, Harness, Policy, MAX_STALENESS, SERVER_ID,
};

#[tokio::test(start_paused = true)]
async fn lock_created_after_attach_closes_only_the_locked_user() {
    let mut harness = Harness::synced(MonitorSettings::default()).await;
    let alice = harness.connect(&identity("alice"), &Policy::default());
    let bob = harness.connect(&identity("bob"), &Policy::default());
    assert!(!cancelled_within(&alice.context, Duration::from_secs(2)).await);

    harness
        .source
        .upsert(lock("offboard-alice", LockTarget::user("alice")));

    assert!(cancelled_within(&alice.context, Duration::from_secs(2)).await);
    let cause = alice.context.cause().unwrap();
    assert!(cause.is_access_denied());
    assert_eq!(cause.lock_name(), Some("offboard-alice"));

    let record = harness.next_record().await;
    assert_eq!(record.user, "alice");
    assert!(record.message.contains("offboard-alice"));
    assert!(record.message.contains("in force"));
    assert_eq!(record.message, cause.to_string());

    assert!(!cancelled_within(&bob.context, Duration::from_secs(10)).await);
    assert!(bob.context.cause().is_none());
}

#[tokio::test(start_paused = true)]
async fn lock_existing_before_attach_closes_immediately() {
    let harness = Harness::new(MonitorSettings::default());
    harness
        .source
        .upsert(lock("freeze-dev", LockTarget::role("dev")));
    let mut resets = harness.watcher.subscribe_resets();
    resets.changed().await.unwrap();

    let alice = harness.connect(&identity("alice"), &Policy::default());
    assert!(cancelled_within(&alice.context, Duration::from_millis(100)).await);
    assert_eq!(alice.context.cause().unwrap().lock_name(), Some("freeze-dev"));
}

#[tokio::test(start_paused = true)]
async fn locking_the_server_closes_its_sessions() {
    let harness = Harness::synced(MonitorSettings::default()).await;
    let alice = harness.connect(&identity("alice"), &Policy::default());

    harness
        .source
        .upsert(lock("drain-node", LockTarget::node(SERVER_ID)));
    assert!(cancelled_within(&alice.context, Duration::from_secs(2)).await);
    assert_eq!(alice.context.cause().unwrap().lock_name(), Some("drain-node"));
}

#[tokio::test(start_paused = true)]
async fn expired_and_deleted_locks_do_not_close() {
    let harness = Harness::synced(MonitorSettings::default()).await;
    let alice = harness.connect(&identity("alice"), &Policy::default());

    harness.source.upsert(Lock::new(
        "old-incident",
        LockSpec {
            target: LockTarget::user("alice"),
            message: None,
            expires: Some(start_time() - chrono::Duration::minutes(5)),
        },
    ));
    assert!(!cancelled_within(&alice.context, Duration::from_secs(3)).await);

    // A lock removed before anyone looks again never applies
    harness
        .source
        .upsert(lock("mistake", LockTarget::user("bob")));
    harness.source.delete("mistake");
    assert!(!cancelled_within(&alice.context, Duration::from_secs(3)).await);
}

#[tokio::test(start_paused = true)]
async fn stale_view_closes_strict_connections_only() {
    let mut harness = Harness::synced(MonitorSettings::default()).await;
    let strict = harness.connect(&identity("alice"), &Policy::strict());
    let best_effort = harness.connect(&identity("bob"), &Policy::default());

    harness.source.set_available(false);
    harness.source.close_watchers();

    // Inside the grace period nobody is disconnected
    assert!(!cancelled_within(&strict.context, MAX_STALENESS - Duration::from_secs(1)).await);

    assert!(cancelled_within(&strict.context, Duration::from_secs(5)).await);
    assert_eq!(strict.context.cause(), Some(DisconnectReason::StaleLockView));
    assert!(harness.watcher.is_stale());

    let record = harness.next_record().await;
    assert_eq!(record.user, "alice");
    assert_eq!(record.reason, DisconnectReason::StaleLockView);

    assert!(!cancelled_within(&best_effort.context, Duration::from_secs(10)).await);
}

#[tokio::test(start_paused = true)]
async fn strict_cluster_default_applies_without_policy_override() {
    let harness = Harness::synced(MonitorSettings {
        locking_mode: LockingMode::Strict,
        ..Default::default()
    })
    .await;
    let alice = harness.connect(&identity("alice"), &Policy::default());

    harness.watcher.shutdown();
    assert!(cancelled_within(&alice.context, Duration::from_secs(2)).await);
    assert_eq!(alice.context.cause(), Some(DisconnectReason::StaleLockView));
}

#[tokio::test(start_paused = true)]
async fn watcher_shutdown_does_not_hang_best_effort_monitors() {
    let harness = Harness::synced(MonitorSettings::default()).await;
    let alice = harness.connect(&identity("alice"), &Policy::default());

    harness.watcher.shutdown();
    assert!(!cancelled_within(&alice.context, Duration::from_secs(3)).await);

    drop(alice.conn);
    assert!(alice.context.is_cancelled());
    assert_eq!(alice.context.cause(), Some(DisconnectReason::Closed));
}
