//! HTTP API tests, driving the router without a socket

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use deploy_api::{
    CancelDeploymentResponse, CreateDeploymentResponse, Deployment, DeploymentListResponse,
    DeploymentStatus, ErrorResponse, HealthResponse,
};
use deployd::app::options::AppOptions;
use deployd::app::state::AppState;
use deployd::deploy::demo::DemoRunner;
use deployd::registry::DeploymentRegistry;
use deployd::server::serve::router;
use deployd::server::state::ServerState;
use deployd::storage::layout::StorageLayout;
use serde::de::DeserializeOwned;
use tempfile::TempDir;
use tower::ServiceExt;

struct TestApp {
    _tmp: TempDir,
    router: Router,
    registry: Arc<DeploymentRegistry>,
}

async fn app(runner: DemoRunner) -> TestApp {
    let tmp = tempfile::tempdir().unwrap();
    let layout = StorageLayout::new(tmp.path());
    layout
        .bundles_dir()
        .subdir("repo-42")
        .file("main.tf")
        .write_string("resource \"azurerm_resource_group\" \"rg\" {}")
        .await
        .unwrap();

    let options = AppOptions {
        layout,
        ..Default::default()
    };
    let state = AppState::with_runner(&options, Arc::new(runner));
    let registry = state.registry.clone();
    let router = router(Arc::new(ServerState::new(state.registry, state.bundles)));

    TestApp {
        _tmp: tmp,
        router,
        registry,
    }
}

async fn send(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            request = request.header("content-type", "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = router
        .clone()
        .oneshot(request.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, bytes.to_vec())
}

fn json<T: DeserializeOwned>(bytes: &[u8]) -> T {
    serde_json::from_slice(bytes).unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = app(DemoRunner::new()).await;
    let (status, body) = send(&app.router, "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = json(&body);
    assert_eq!(health.status, "healthy");
    assert_eq!(health.service, "deployd");
}

#[tokio::test]
async fn test_create_then_poll_to_completion() {
    let app = app(DemoRunner::new()).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/deployments",
        Some(serde_json::json!({"referenceId": "repo-42", "subjectName": "acme/web"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let created: CreateDeploymentResponse = json(&body);

    tokio::time::timeout(Duration::from_secs(10), app.registry.wait(&created.job_id))
        .await
        .unwrap()
        .unwrap();

    let (status, body) = send(&app.router, "GET", &format!("/deployments/{}", created.job_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let deployment: Deployment = json(&body);
    assert_eq!(deployment.status, DeploymentStatus::Completed);
    assert_eq!(deployment.subject_name, "acme/web");
    assert_eq!(deployment.reference_id, "repo-42");
    assert_eq!(deployment.outputs["resource_group"], "rg-demo");

    // Wire format is camelCase
    let raw: serde_json::Value = json(&body);
    assert!(raw.get("aggregatedLog").is_some());
    assert!(raw.get("startedAt").is_some());
    assert_eq!(raw["updates"][0]["status"], "initializing");
}

#[tokio::test]
async fn test_create_returns_before_job_finishes() {
    let app = app(DemoRunner::new().delay("terraform", "init", Duration::from_secs(30))).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/deployments",
        Some(serde_json::json!({"referenceId": "repo-42", "mode": "apply"})),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let created: CreateDeploymentResponse = json(&body);

    let (_, body) = send(&app.router, "GET", &format!("/deployments/{}", created.job_id), None).await;
    let deployment: Deployment = json(&body);
    assert!(!deployment.status.is_terminal());
    assert_eq!(deployment.subject_name, "repo-42");

    let (status, body) = send(
        &app.router,
        "POST",
        &format!("/deployments/{}/cancel", created.job_id),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let cancel: CancelDeploymentResponse = json(&body);
    assert!(cancel.cancelled);

    let done = tokio::time::timeout(Duration::from_secs(10), app.registry.wait(&created.job_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(done.status, DeploymentStatus::Failed);
}

#[tokio::test]
async fn test_unknown_and_invalid_references() {
    let app = app(DemoRunner::new()).await;

    let (status, body) = send(
        &app.router,
        "POST",
        "/deployments",
        Some(serde_json::json!({"referenceId": "does-not-exist"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ErrorResponse = json(&body);
    assert!(error.error.contains("does-not-exist"));

    let (status, _) = send(
        &app.router,
        "POST",
        "/deployments",
        Some(serde_json::json!({"referenceId": "../etc"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(app.registry.is_empty());
}

#[tokio::test]
async fn test_malformed_request_body_gets_json_error() {
    let app = app(DemoRunner::new()).await;

    for body in [
        serde_json::json!({"referenceId": "repo-42", "mode": "yolo"}),
        serde_json::json!({"subjectName": "web"}),
    ] {
        let (status, bytes) = send(&app.router, "POST", "/deployments", Some(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let error: ErrorResponse = json(&bytes);
        assert!(!error.error.is_empty());
    }
    assert!(app.registry.is_empty());
}

#[tokio::test]
async fn test_unknown_job_is_404() {
    let app = app(DemoRunner::new()).await;

    let (status, body) = send(&app.router, "GET", "/deployments/nope", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let error: ErrorResponse = json(&body);
    assert_eq!(error.error, "Deployment nope not found");

    let (status, _) = send(&app.router, "POST", "/deployments/nope/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_deployments() {
    let app = app(DemoRunner::new()).await;

    let (_, body) = send(&app.router, "GET", "/deployments", None).await;
    let empty: DeploymentListResponse = json(&body);
    assert_eq!(empty.total, 0);

    for _ in 0..2 {
        let (status, _) = send(
            &app.router,
            "POST",
            "/deployments",
            Some(serde_json::json!({"referenceId": "repo-42"})),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let (status, body) = send(&app.router, "GET", "/deployments", None).await;
    assert_eq!(status, StatusCode::OK);
    let list: DeploymentListResponse = json(&body);
    assert_eq!(list.total, 2);
    assert_eq!(list.deployments.len(), 2);

    tokio::time::timeout(Duration::from_secs(10), app.registry.wait_all())
        .await
        .unwrap();
}
