//! Concurrent requests against shared sessions.

use super::helpers::{TestHarness, continue_request};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_continuations_are_serialized() {
    let harness = TestHarness::new();
    let built = harness.build().await;

    let (first, second, third) = tokio::join!(
        harness.dispatcher.handle(continue_request(&built, "101")),
        harness.dispatcher.handle(continue_request(&built, "202")),
        harness.dispatcher.handle(continue_request(&built, "303")),
    );
    assert!(first.is_ok());
    assert!(second.is_ok());
    assert!(third.is_ok());

    // Each run started from the previous run's output, so none was lost.
    let leaf = std::fs::read_to_string(harness.layout().leaf_blocks(built.session_id))
        .expect("read leaf");
    for value in ["101", "202", "303"] {
        assert_eq!(leaf.lines().filter(|line| *line == value).count(), 1);
    }
    assert_eq!(harness.engine.invocations().len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_builds_get_distinct_sessions() {
    let harness = TestHarness::new();

    let (a, b, c) = tokio::join!(harness.build(), harness.build(), harness.build());

    assert_ne!(a.session_id, b.session_id);
    assert_ne!(b.session_id, c.session_id);
    assert_ne!(a.session_id, c.session_id);
    for visualization in [&a, &b, &c] {
        assert!(harness.dispatcher.store().is_live(visualization.session_id));
    }
}
