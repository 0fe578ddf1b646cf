//! Expired sessions and reused ids.

use std::time::Duration;

use super::helpers::{TestHarness, continue_request};
use crate::error::DispatchError;
use crate::session::SessionConfig;
use crate::testing::EngineBehavior;

#[tokio::test]
async fn test_expired_session_is_rejected() {
    let harness = TestHarness::new();
    let built = harness.build().await;
    let id = built.session_id;

    harness.time.advance_secs(1198);
    let result = harness
        .dispatcher
        .handle(continue_request(&built, "5"))
        .await;

    assert!(matches!(result, Err(DispatchError::SessionExpiredOrMissing)));
    assert_eq!(harness.engine.invocations().len(), 1);
    assert!(!harness.dispatcher.store().is_live(id));

    let line = harness.audit_lines().pop().expect("audit line");
    assert!(line.contains("\"continue\""));
    assert!(line.contains("\"err\""));
}

#[tokio::test]
async fn test_session_live_at_ttl_boundary() {
    let harness = TestHarness::new();
    let built = harness.build().await;

    harness.time.advance_secs(1196);
    let continued = harness
        .dispatcher
        .handle(continue_request(&built, "5"))
        .await
        .expect("session is still live");

    // The continuation touched the session, so it lives on.
    harness.time.advance_secs(1196);
    harness
        .dispatcher
        .handle(continue_request(&continued, "6"))
        .await
        .expect("session was touched");
}

#[tokio::test]
async fn test_ttl_running_out_during_engine_run_keeps_result() {
    let harness = TestHarness::with(EngineBehavior::Slow, SessionConfig::default());
    let built = harness.build().await;
    let id = built.session_id;

    harness.time.advance_secs(1196);
    let (result, ()) = tokio::join!(
        harness.dispatcher.handle(continue_request(&built, "777")),
        async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            harness.time.advance_secs(5);
        }
    );

    let continued = result.expect("the committed insert is reported");
    assert_eq!(continued.inserted, vec!["777"]);
    let leaf = std::fs::read_to_string(harness.layout().leaf_blocks(id)).expect("read leaf");
    assert!(leaf.ends_with("777\n"));
    assert!(harness.dispatcher.store().is_live(id));

    let line = harness.audit_lines().pop().expect("audit line");
    assert!(line.contains("\"continue\""));
    assert!(!line.contains("\"err\""));
}

#[tokio::test]
async fn test_token_for_reused_id_is_rejected() {
    let harness = TestHarness::with(
        EngineBehavior::Working,
        SessionConfig {
            id_range: 10..=10,
            ..SessionConfig::default()
        },
    );
    let old = harness.build().await;

    harness.time.advance_secs(1201);
    let new = harness.build().await;
    assert_eq!(new.session_id, old.session_id);

    let result = harness
        .dispatcher
        .handle(continue_request(&old, "5"))
        .await;
    assert!(matches!(result, Err(DispatchError::SessionExpiredOrMissing)));

    harness
        .dispatcher
        .handle(continue_request(&new, "5"))
        .await
        .expect("new occupant continues");
}

#[tokio::test]
async fn test_id_not_reused_before_threshold() {
    let harness = TestHarness::with(
        EngineBehavior::Working,
        SessionConfig {
            id_range: 10..=10,
            allocation_attempts: 2,
            ..SessionConfig::default()
        },
    );
    harness.build().await;

    // Expired by TTL, but still inside the reuse threshold.
    harness.time.advance_secs(1199);
    let result = harness
        .dispatcher
        .handle(super::helpers::start_request(None, "40", "10", "i"))
        .await;
    assert!(matches!(result, Err(DispatchError::CapacityExhausted)));
}
