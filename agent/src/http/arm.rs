//! Resource Manager request helpers

use std::time::Duration;

use arm_models::models::CloudError;
use reqwest::{Method, Response, StatusCode};
use serde::Serialize;
use tracing::error;

use crate::errors::OpsError;
use crate::http::client::HttpClient;

pub const ASYNC_OPERATION_HEADER: &str = "azure-asyncoperation";

impl HttpClient {
    /// Send a Resource Manager request. Non-success statuses other than those
    /// in `allowed` become [`OpsError::CloudError`] carrying the service's
    /// error code and message.
    pub async fn arm_request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        token: &str,
        body: Option<&B>,
        allowed: &[StatusCode],
    ) -> Result<Response, OpsError> {
        let verb = method.to_string();
        let response = self.send(method, path, Some(token), body).await?;

        let status = response.status();
        if status.is_success() || allowed.contains(&status) {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        error!("ARM {} {} failed: {} - {}", verb, path, status, body);
        Err(cloud_error(status, &body))
    }
}

/// Turn an error body into an [`OpsError::CloudError`]
pub fn cloud_error(status: StatusCode, body: &str) -> OpsError {
    match serde_json::from_str::<CloudError>(body) {
        Ok(envelope) => OpsError::CloudError(format!("{} ({})", envelope.error, status)),
        Err(_) => OpsError::CloudError(format!("{}: {}", status, body)),
    }
}

/// `Retry-After` in seconds, if present
pub fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

pub fn header_url(response: &Response, name: &str) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
