//! HTTP request handlers

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use deploy_api::{
    CancelDeploymentResponse, CreateDeploymentRequest, CreateDeploymentResponse,
    DeploymentListResponse, ErrorResponse, HealthResponse, VersionResponse,
};
use tracing::warn;

use crate::bundle::BundleError;
use crate::registry::NewDeployment;
use crate::server::state::ServerState;
use crate::utils::version_info;

/// JSON error body with a status code
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn job_not_found(job_id: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, format!("Deployment {} not found", job_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorResponse { error: self.message })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<BundleError> for ApiError {
    fn from(err: BundleError) -> Self {
        let status = match &err {
            BundleError::NotFound(_) => StatusCode::NOT_FOUND,
            BundleError::InvalidReference(_) => StatusCode::BAD_REQUEST,
            BundleError::Unreadable { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self::new(status, err.to_string())
    }
}

/// Health check handler
pub async fn health_handler() -> impl IntoResponse {
    let version = version_info();
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "deployd".to_string(),
        version: version.version,
    })
}

/// Version handler
pub async fn version_handler() -> impl IntoResponse {
    let version = version_info();
    Json(VersionResponse {
        version: version.version,
        git_hash: version.git_hash,
        build_time: version.build_time,
    })
}

/// Create a deployment from a bundle reference; returns before any stage runs
pub async fn create_deployment_handler(
    State(state): State<Arc<ServerState>>,
    payload: Result<Json<CreateDeploymentRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(request) = payload.map_err(|rejection| {
        warn!("Rejected deployment request body: {}", rejection.body_text());
        ApiError::from(rejection)
    })?;
    let bundle = state.bundles.fetch(&request.reference_id).await.map_err(|e| {
        warn!("Rejected deployment request: {}", e);
        ApiError::from(e)
    })?;

    let subject_name = request
        .subject_name
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| request.reference_id.clone());

    let job_id = state.registry.create_with(NewDeployment {
        subject_name,
        reference_id: request.reference_id,
        mode: request.mode,
        bundle,
    });

    Ok((StatusCode::ACCEPTED, Json(CreateDeploymentResponse { job_id })))
}

pub async fn get_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    state
        .registry
        .get(&job_id)
        .map(Json)
        .ok_or_else(|| ApiError::job_not_found(&job_id))
}

pub async fn list_deployments_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let deployments = state.registry.list();
    Json(DeploymentListResponse {
        total: deployments.len(),
        deployments,
    })
}

pub async fn cancel_deployment_handler(
    State(state): State<Arc<ServerState>>,
    Path(job_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    if !state.registry.cancel(&job_id) {
        return Err(ApiError::job_not_found(&job_id));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(CancelDeploymentResponse {
            job_id,
            cancelled: true,
        }),
    ))
}
