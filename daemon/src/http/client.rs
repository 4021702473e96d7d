//! HTTP client implementation

use async_trait::async_trait;
use deploy_api::{
    CancelDeploymentResponse, CreateDeploymentRequest, CreateDeploymentResponse, Deployment,
    DeploymentListResponse, ErrorResponse,
};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

use crate::errors::DeploydError;
use crate::registry::DeploymentRegistry;

/// Anything that can report the current state of a job
#[async_trait]
pub trait DeploymentFetcher: Send + Sync {
    async fn fetch(&self, job_id: &str) -> Result<Deployment, DeploydError>;
}

/// HTTP client for the deployments API
pub struct HttpClient {
    client: Client,
    base_url: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str) -> Result<Self, DeploydError> {
        url::Url::parse(base_url)
            .map_err(|e| DeploydError::ConfigError(format!("Invalid server URL {}: {}", base_url, e)))?;

        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Make a GET request
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, DeploydError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("GET {}", url);

        let response = self.client.get(&url).send().await?;
        Self::parse(response, "GET").await
    }

    /// Make a POST request
    pub async fn post<T: DeserializeOwned, B: Serialize>(&self, path: &str, body: &B) -> Result<T, DeploydError> {
        let url = format!("{}{}", self.base_url, path);
        debug!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;
        Self::parse(response, "POST").await
    }

    async fn parse<T: DeserializeOwned>(response: Response, method: &str) -> Result<T, DeploydError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorResponse>(&body)
                .map(|e| e.error)
                .unwrap_or(body);
            error!("HTTP {} failed: {} - {}", method, status, message);
            return Err(match status {
                StatusCode::NOT_FOUND => DeploydError::NotFound(message),
                _ => DeploydError::ServerError(format!("{}: {}", status, message)),
            });
        }

        let body = response.json().await?;
        Ok(body)
    }

    pub async fn create_deployment(&self, request: &CreateDeploymentRequest) -> Result<String, DeploydError> {
        let response: CreateDeploymentResponse = self.post("/deployments", request).await?;
        Ok(response.job_id)
    }

    pub async fn get_deployment(&self, job_id: &str) -> Result<Deployment, DeploydError> {
        self.get(&format!("/deployments/{}", job_id)).await
    }

    pub async fn list_deployments(&self) -> Result<DeploymentListResponse, DeploydError> {
        self.get("/deployments").await
    }

    pub async fn cancel_deployment(&self, job_id: &str) -> Result<CancelDeploymentResponse, DeploydError> {
        self.post(&format!("/deployments/{}/cancel", job_id), &serde_json::json!({}))
            .await
    }
}

#[async_trait]
impl DeploymentFetcher for HttpClient {
    async fn fetch(&self, job_id: &str) -> Result<Deployment, DeploydError> {
        self.get_deployment(job_id).await
    }
}

#[async_trait]
impl DeploymentFetcher for DeploymentRegistry {
    async fn fetch(&self, job_id: &str) -> Result<Deployment, DeploydError> {
        self.get(job_id)
            .ok_or_else(|| DeploydError::NotFound(format!("Deployment {} not found", job_id)))
    }
}
