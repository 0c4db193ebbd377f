//! Certificate expiry and idle timeout

use std::time::Duration;

use bulwark_monitor::{DisconnectReason, MonitorSettings};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use super::helpers::{cancelled_within, identity, start_time, Harness, Policy, SERVER_ID};

fn disconnect_expired() -> MonitorSettings {
    MonitorSettings {
        disconnect_expired_cert: true,
        ..Default::default()
    }
}

#[tokio::test(start_paused = true)]
async fn already_expired_certificate_is_closed_at_attach() {
    let mut harness = Harness::new(disconnect_expired());
    let mut alice = identity("alice");
    let expires = start_time() - chrono::Duration::seconds(1);
    alice.expires = Some(expires);

    let session = harness.connect(&alice, &Policy::default());

    // Well inside the first tick, before the lock view has even synced
    assert!(cancelled_within(&session.context, Duration::from_millis(100)).await);
    assert_eq!(
        session.context.cause(),
        Some(DisconnectReason::CertExpired { expires })
    );

    let record = harness.next_record().await;
    assert_eq!(record.user, "alice");
    assert_eq!(record.server_id, SERVER_ID);
    assert!(record.message.starts_with("client certificate expired at"));
}

#[tokio::test(start_paused = true)]
async fn certificate_expiring_later_is_closed_on_tick() {
    let harness = Harness::synced(disconnect_expired()).await;
    let mut alice = identity("alice");
    alice.expires = Some(start_time() + chrono::Duration::seconds(10));

    let session = harness.connect(&alice, &Policy::default());
    assert!(!cancelled_within(&session.context, Duration::from_secs(3)).await);

    harness.clock.advance(chrono::Duration::seconds(10));
    assert!(cancelled_within(&session.context, Duration::from_secs(2)).await);
    assert!(matches!(
        session.context.cause(),
        Some(DisconnectReason::CertExpired { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn expiry_ignored_when_policy_keeps_expired_sessions() {
    let harness = Harness::synced(MonitorSettings::default()).await;
    let mut alice = identity("alice");
    alice.expires = Some(start_time() - chrono::Duration::seconds(60));

    let session = harness.connect(&alice, &Policy::default());
    assert!(!cancelled_within(&session.context, Duration::from_secs(5)).await);
}

#[tokio::test(start_paused = true)]
async fn mfa_session_defers_to_previous_identity_expiry() {
    let harness = Harness::synced(disconnect_expired()).await;
    let mut alice = identity("alice");
    alice.expires = Some(start_time() - chrono::Duration::seconds(1));
    alice.previous_identity_expires = Some(start_time() + chrono::Duration::seconds(3600));
    alice.mfa_verified = Some("yubikey-1".to_string());

    let session = harness.connect(&alice, &Policy::default());
    assert!(!cancelled_within(&session.context, Duration::from_secs(5)).await);
}

#[tokio::test(start_paused = true)]
async fn idle_client_is_disconnected() {
    let mut harness = Harness::synced(MonitorSettings {
        client_idle_timeout: Duration::from_secs(60),
        ..Default::default()
    })
    .await;
    let mut session = harness.connect(&identity("alice"), &Policy::default());

    // Activity halfway through resets the idle window
    harness.clock.advance(chrono::Duration::seconds(30));
    session.client.write_all(b"keepalive").await.unwrap();
    let mut buf = [0u8; 9];
    session.conn.read_exact(&mut buf).await.unwrap();

    harness.clock.advance(chrono::Duration::seconds(40));
    assert!(!cancelled_within(&session.context, Duration::from_secs(3)).await);

    harness.clock.advance(chrono::Duration::seconds(30));
    assert!(cancelled_within(&session.context, Duration::from_secs(2)).await);
    assert_eq!(
        session.context.cause(),
        Some(DisconnectReason::IdleTimeout {
            timeout: Duration::from_secs(60)
        })
    );
    assert_eq!(
        harness.next_record().await.message,
        "client reported no activity in the last 60s"
    );
}
