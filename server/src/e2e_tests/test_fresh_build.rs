//! Fresh builds from the canned samples.

use super::helpers::{SAMPLE_VALUES, TestHarness, count_flag, start_request};
use crate::dispatcher::BuildSource;
use crate::error::DispatchError;
use crate::params::BuildMode;
use crate::session::SessionConfig;
use crate::testing::EngineBehavior;

#[tokio::test]
async fn test_bulk_load_sample() {
    let harness = TestHarness::new();

    let visualization = harness
        .dispatcher
        .handle(start_request(
            Some(BuildSource::Sample("r1000".to_string())),
            "40",
            "10",
            "b",
        ))
        .await
        .expect("build should succeed");

    let id = visualization.session_id;
    assert!((10..=25).contains(&id.get()));
    assert_eq!(visualization.parameters.leaf_size, 40);
    assert_eq!(visualization.parameters.fanout, 10);
    assert_eq!(visualization.parameters.build_mode, BuildMode::BulkLoad);
    assert!(visualization.html.contains("btree"));
    assert!(!visualization.token.is_empty());

    let store = harness.dispatcher.store();
    assert!(store.is_live(id));
    assert!(store.has_built_tree(id));
    assert_eq!(
        std::fs::read_to_string(harness.layout().leaf_blocks(id)).expect("read leaf"),
        SAMPLE_VALUES
    );

    let invocations = harness.engine.invocations();
    assert_eq!(invocations.len(), 1);
    let args = &invocations[0];
    assert_eq!(count_flag(args, "--bulk-load"), 1);
    assert_eq!(count_flag(args, "--incremental"), 0);
    let input = args
        .iter()
        .position(|arg| arg == "--input")
        .map(|index| args[index + 1].clone());
    assert_eq!(
        input,
        Some(harness.sample_path("r1000").display().to_string())
    );
}

#[tokio::test]
async fn test_default_sample_and_mode() {
    let harness = TestHarness::new();

    let mut request = start_request(None, "40", "10", "i");
    request.parameters.build_mode = None;
    let visualization = harness
        .dispatcher
        .handle(request)
        .await
        .expect("build should succeed");

    assert_eq!(visualization.parameters.build_mode, BuildMode::Insert);
    let args = &harness.engine.invocations()[0];
    assert_eq!(count_flag(args, "--incremental"), 1);
    assert!(args.iter().any(|arg| arg.ends_with("r1000")));
}

#[tokio::test]
async fn test_declared_session_id_is_ignored() {
    let harness = TestHarness::new();
    let first = harness.build().await;

    // A start-page request naming an existing session still gets a new one.
    let mut request = start_request(None, "40", "10", "i");
    request.declared_session_id = Some(first.session_id.to_string());
    let second = harness
        .dispatcher
        .handle(request)
        .await
        .expect("build should succeed");

    assert_ne!(second.session_id, first.session_id);
    assert!(harness.dispatcher.store().is_live(first.session_id));
}

#[tokio::test]
async fn test_parameter_anomalies_are_audited() {
    let harness = TestHarness::new();

    let visualization = harness
        .dispatcher
        .handle(start_request(None, "abc", "5000", "x"))
        .await
        .expect("anomalies never fail a build");

    assert_eq!(visualization.parameters.leaf_size, 40);
    assert_eq!(visualization.parameters.fanout, 10);
    assert_eq!(visualization.parameters.build_mode, BuildMode::Insert);

    let lines = harness.audit_lines();
    assert_eq!(lines.len(), 1);
    let line = &lines[0];
    assert!(line.contains("\"build\""));
    assert!(line.contains("\"e2e-agent/1.0\""));
    assert!(line.contains("\"192.0.2.1\""));
    assert!(line.contains(&format!("\"{}\"", SAMPLE_VALUES.len())));
    assert!(line.ends_with("\"[lns][abc]\",\"[fan][5000]\",\"[blm][x]\""));
}

#[tokio::test]
async fn test_unknown_sample_is_upload_failure() {
    let harness = TestHarness::new();

    let result = harness
        .dispatcher
        .handle(start_request(
            Some(BuildSource::Sample("../../etc/passwd".to_string())),
            "40",
            "10",
            "i",
        ))
        .await;

    assert!(matches!(result, Err(DispatchError::UploadFailure(_))));
    assert!(harness.engine.invocations().is_empty());
    assert!(harness.session_files().is_empty());
    assert!(harness.audit_lines()[0].contains("\"err\""));
}

#[tokio::test]
async fn test_engine_failure_releases_session() {
    let harness = TestHarness::with(EngineBehavior::Failing, SessionConfig::default());

    let result = harness
        .dispatcher
        .handle(start_request(None, "40", "10", "b"))
        .await;

    assert!(matches!(
        result,
        Err(DispatchError::EngineInvocationFailure(_))
    ));
    assert_eq!(harness.engine.invocations().len(), 1);
    assert!(harness.session_files().is_empty());
}

#[tokio::test]
async fn test_capacity_exhausted() {
    let harness = TestHarness::with(
        EngineBehavior::Working,
        SessionConfig {
            id_range: 10..=10,
            allocation_attempts: 4,
            ..SessionConfig::default()
        },
    );
    let first = harness.build().await;

    let result = harness
        .dispatcher
        .handle(start_request(None, "40", "10", "i"))
        .await;

    assert!(matches!(result, Err(DispatchError::CapacityExhausted)));
    assert!(harness.dispatcher.store().is_live(first.session_id));
    assert_eq!(harness.engine.invocations().len(), 1);
}
