//! Requests that do not come from our pages.

use super::helpers::{TestHarness, client, start_request};
use crate::dispatcher::{Action, RequestOrigin};
use crate::error::DispatchError;

#[tokio::test]
async fn test_tokenless_request_from_result_page_is_rejected() {
    let harness = TestHarness::new();

    let mut request = start_request(None, "40", "10", "i");
    request.origin = RequestOrigin::VisualizePage;
    request.declared_origin = "btree".to_string();
    request.declared_session_id = Some("12".to_string());
    request.insert = Some("5".to_string());
    let result = harness.dispatcher.handle(request).await;

    assert!(matches!(result, Err(DispatchError::InvalidOrigin)));
    assert!(harness.engine.invocations().is_empty());
    assert!(harness.session_files().is_empty());
}

#[tokio::test]
async fn test_unknown_origin_is_rejected_and_audited() {
    let harness = TestHarness::new();

    let mut request = start_request(None, "40", "10", "i");
    request.origin = RequestOrigin::Unknown;
    request.declared_origin = "https://elsewhere.example/form".to_string();
    let result = harness.dispatcher.handle(request).await;

    assert!(matches!(result, Err(DispatchError::InvalidOrigin)));
    let lines = harness.audit_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("\"rejected\""));
    assert!(lines[0].contains("\"https://elsewhere.example/form\""));
    assert!(lines[0].contains("\"err\""));
}

#[tokio::test]
async fn test_valid_token_continues_from_any_origin() {
    let harness = TestHarness::new();
    let built = harness.build().await;

    let mut request = super::helpers::continue_request(&built, "5");
    request.origin = RequestOrigin::Unknown;
    let action = harness.dispatcher.classify(&request).expect("classify");
    assert!(matches!(action, Action::Continue { id, .. } if id == built.session_id));
}

#[test]
fn test_start_view_is_audited() {
    let harness = TestHarness::new();
    harness.dispatcher.record_start_view(&client());

    let lines = harness.audit_lines();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains("\"start\""));
    assert!(lines[0].contains("\"e2e-agent/1.0\""));
}
