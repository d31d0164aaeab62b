mod common;

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::json;

use chart_verifier_ci::github::PullRequestClient;
use chart_verifier_ci::retry::RetryPolicy;

use common::MockServer;

#[derive(Clone, Default)]
struct MockPulls {
    files: Arc<Vec<String>>,
    /// File listing pages from this one on decode as an object, not an array.
    malformed_from_page: Option<usize>,
    fail_files: bool,
    /// Merge lookups report merged once this many have been served; zero
    /// means never.
    merged_after: usize,
    file_requests: Arc<AtomicUsize>,
    merge_requests: Arc<AtomicUsize>,
}

async fn changed_files(
    State(state): State<MockPulls>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    state.file_requests.fetch_add(1, Ordering::SeqCst);
    if state.fail_files {
        return (StatusCode::INTERNAL_SERVER_ERROR, "listing unavailable").into_response();
    }
    let per_page: usize = params
        .get("per_page")
        .and_then(|value| value.parse().ok())
        .unwrap_or(30);
    let page: usize = params
        .get("page")
        .and_then(|value| value.parse().ok())
        .unwrap_or(1);
    if state.malformed_from_page.is_some_and(|from| page >= from) {
        return Json(json!({ "message": "listing truncated" })).into_response();
    }
    let batch: Vec<_> = state
        .files
        .iter()
        .skip((page - 1) * per_page)
        .take(per_page)
        .map(|name| json!({ "filename": name }))
        .collect();
    Json(serde_json::Value::Array(batch)).into_response()
}

async fn pull_request(State(state): State<MockPulls>) -> Response {
    let served = state.merge_requests.fetch_add(1, Ordering::SeqCst) + 1;
    let merged = state.merged_after != 0 && served >= state.merged_after;
    Json(json!({ "merged": merged })).into_response()
}

fn mock_pulls(state: MockPulls) -> (MockServer, MockPulls) {
    let router = Router::new()
        .route("/repos/{org}/{repo}/pulls/{number}/files", get(changed_files))
        .route("/repos/{org}/{repo}/pulls/{number}", get(pull_request))
        .with_state(state.clone());
    (MockServer::start(router), state)
}

fn client_for(server: &MockServer) -> PullRequestClient {
    PullRequestClient::new(format!(
        "{}/repos/openshift-helm-charts/charts/pulls/42",
        server.base_url()
    ))
    .expect("build pull request client")
}

#[test]
fn changed_files_pages_through_long_listings() {
    let files: Vec<String> = (0..205).map(|n| format!("charts/partner/file-{n:03}")).collect();
    let (server, state) = mock_pulls(MockPulls {
        files: Arc::new(files),
        ..Default::default()
    });
    let client = client_for(&server);

    let listed = client.changed_files().expect("changed files");

    assert_eq!(listed.len(), 205);
    assert_eq!(listed[0], "charts/partner/file-000");
    assert_eq!(listed[204], "charts/partner/file-204");
    assert_eq!(state.file_requests.load(Ordering::SeqCst), 3);
}

#[test]
fn changed_files_handles_an_empty_listing() {
    let (server, state) = mock_pulls(MockPulls::default());
    let client = client_for(&server);

    let listed = client.changed_files().expect("changed files");

    assert!(listed.is_empty());
    assert_eq!(state.file_requests.load(Ordering::SeqCst), 1);
}

#[test]
fn changed_files_keeps_collected_names_when_a_page_is_malformed() {
    let files: Vec<String> = (0..25).map(|n| format!("docs/page-{n:02}.md")).collect();
    let (server, state) = mock_pulls(MockPulls {
        files: Arc::new(files),
        malformed_from_page: Some(2),
        ..Default::default()
    });
    let client = client_for(&server).with_page_size(10);

    let listed = client.changed_files().expect("changed files");

    assert_eq!(listed.len(), 10);
    assert_eq!(state.file_requests.load(Ordering::SeqCst), 2);
}

#[test]
fn changed_files_surfaces_http_errors() {
    let (server, _state) = mock_pulls(MockPulls {
        fail_files: true,
        ..Default::default()
    });
    let client = client_for(&server);

    let err = client.changed_files().unwrap_err();

    assert!(err.to_string().contains("500"));
}

#[test]
fn wait_until_merged_polls_until_the_flag_flips() {
    let (server, state) = mock_pulls(MockPulls {
        merged_after: 3,
        ..Default::default()
    });
    let client = client_for(&server);

    client
        .wait_until_merged(&RetryPolicy::new(5, Duration::ZERO))
        .expect("merged within budget");

    assert_eq!(state.merge_requests.load(Ordering::SeqCst), 3);
}

#[test]
fn wait_until_merged_gives_up_after_the_budget() {
    let (server, state) = mock_pulls(MockPulls::default());
    let client = client_for(&server);

    let err = client
        .wait_until_merged(&RetryPolicy::new(2, Duration::ZERO))
        .unwrap_err();

    assert!(err.to_string().contains("not merged after 2 attempts"));
    assert_eq!(state.merge_requests.load(Ordering::SeqCst), 2);
}

#[test]
fn is_merged_reads_the_merged_field() {
    let (server, _state) = mock_pulls(MockPulls {
        merged_after: 1,
        ..Default::default()
    });
    let client = client_for(&server);

    assert!(client.is_merged().expect("merge lookup"));
}
