//! HTTP client implementation

use std::time::Duration;

use reqwest::{header, Client, Method, Response};
use serde::{de::DeserializeOwned, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, error};
use url::Url;

use crate::errors::OpsError;
use crate::filesys::file::File;
use crate::utils::Sha256Stream;

const USER_AGENT: &str = concat!("gameops/", env!("CARGO_PKG_VERSION"));

/// HTTP client shared by the release feed and the cloud control plane
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    base_url: String,
}

/// Result of a streamed download
#[derive(Debug, Clone)]
pub struct Downloaded {
    pub bytes: u64,
    pub sha256: String,
}

impl HttpClient {
    /// Create a new HTTP client
    pub fn new(base_url: &str) -> Result<Self, OpsError> {
        Self::with_timeout(base_url, Duration::from_secs(30))
    }

    /// Create a client with a custom per-request timeout
    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, OpsError> {
        // An empty base means every request uses an absolute URL
        if !base_url.is_empty() {
            Url::parse(base_url)
                .map_err(|e| OpsError::ConfigError(format!("invalid base URL {}: {}", base_url, e)))?;
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
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

    /// Absolute URLs pass through; paths are joined to the base URL
    pub fn resolve(&self, path_or_url: &str) -> String {
        if path_or_url.starts_with("http://") || path_or_url.starts_with("https://") {
            path_or_url.to_string()
        } else {
            format!("{}{}", self.base_url, path_or_url)
        }
    }

    /// Send a request and return the raw response, whatever its status
    pub async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        token: Option<&str>,
        body: Option<&B>,
    ) -> Result<Response, OpsError> {
        let url = self.resolve(path);
        debug!("{} {}", method, url);

        let mut request = self.client.request(method, &url);
        if let Some(token) = token {
            request = request.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        Ok(request.send().await?)
    }

    /// Make a GET request and decode the JSON body
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&str>,
    ) -> Result<T, OpsError> {
        let response = self
            .send::<()>(Method::GET, path, token, None)
            .await?;
        Self::decode(response, "GET").await
    }

    /// POST a url-encoded form and decode the JSON body
    pub async fn post_form<T: DeserializeOwned, F: Serialize + ?Sized>(
        &self,
        path: &str,
        form: &F,
    ) -> Result<T, OpsError> {
        let url = self.resolve(path);
        debug!("POST {}", url);

        let response = self.client.post(&url).form(form).send().await?;
        Self::decode(response, "POST").await
    }

    /// Stream the body of `url` into `dest`, hashing as it goes
    pub async fn download(
        &self,
        url: &str,
        token: Option<&str>,
        dest: &File,
    ) -> Result<Downloaded, OpsError> {
        let mut response = self
            .send::<()>(Method::GET, url, token, None)
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            error!("Download failed: {} - {}", status, url);
            return Err(OpsError::DownloadError(format!("{}: {}", status, url)));
        }

        let mut file = tokio::fs::File::create(dest.path()).await?;
        let mut hasher = Sha256Stream::new();
        let mut bytes = 0u64;

        while let Some(chunk) = response.chunk().await? {
            hasher.update(&chunk);
            file.write_all(&chunk).await?;
            bytes += chunk.len() as u64;
        }
        file.sync_all().await?;

        Ok(Downloaded {
            bytes,
            sha256: hasher.finish(),
        })
    }

    /// Decode a JSON response, turning non-success statuses into errors
    pub async fn decode<T: DeserializeOwned>(response: Response, verb: &str) -> Result<T, OpsError> {
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            error!("HTTP {} failed: {} - {}", verb, status, body);
            return Err(OpsError::HttpStatus {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.json().await?;
        Ok(body)
    }
}
