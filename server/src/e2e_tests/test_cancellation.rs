//! Requests whose futures are dropped before they complete.

use std::time::Duration;

use super::helpers::{TestHarness, start_request};
use crate::dispatcher::BuildSource;
use crate::session::SessionConfig;
use crate::testing::EngineBehavior;

fn single_id() -> SessionConfig {
    SessionConfig {
        id_range: 10..=10,
        ..SessionConfig::default()
    }
}

#[tokio::test]
async fn test_abandoned_build_releases_session() {
    let harness = TestHarness::with(EngineBehavior::Hanging, single_id());
    let request = start_request(
        Some(BuildSource::Upload {
            file_name: "values.txt".to_string(),
            bytes: b"8 6 7 5 3 0 9".to_vec(),
        }),
        "40",
        "10",
        "b",
    );

    let outcome = tokio::time::timeout(
        Duration::from_millis(300),
        harness.dispatcher.handle(request),
    )
    .await;
    assert!(outcome.is_err(), "the engine never finishes");

    assert!(harness.session_files().is_empty());
    let guard = harness
        .dispatcher
        .store()
        .allocate()
        .expect("the only id is free again");
    assert_eq!(guard.id().get(), 10);
}

#[tokio::test]
async fn test_abandoned_build_is_audited() {
    let harness = TestHarness::with(EngineBehavior::Hanging, single_id());

    let outcome = tokio::time::timeout(
        Duration::from_millis(300),
        harness.dispatcher.handle(start_request(None, "40", "10", "i")),
    )
    .await;
    assert!(outcome.is_err());

    let lines = harness.audit_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("\"build\""));
    assert!(lines[0].contains("\"err\""));
    assert!(lines[0].contains("r1000"));
}
