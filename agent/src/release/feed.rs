//! Release feed client

use std::time::Duration;

use async_trait::async_trait;
use release_feed::Release;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info};

use crate::errors::OpsError;
use crate::filesys::file::File;
use crate::http::client::{Downloaded, HttpClient};

/// Source of the latest published release
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    /// `Ok(None)` when the project has no published release
    async fn latest_release(&self) -> Result<Option<Release>, OpsError>;
}

/// Downloads release artifacts to local files
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &File) -> Result<Downloaded, OpsError>;
}

/// Release feed options
#[derive(Debug, Clone)]
pub struct FeedOptions {
    /// API base URL of the release-hosting service
    pub api_base_url: String,

    pub owner: String,

    pub repo: String,

    /// Bearer token for private repositories
    pub token: Option<SecretString>,

    /// Timeout for a whole artifact download
    pub download_timeout: Duration,
}

impl Default for FeedOptions {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com".to_string(),
            owner: String::new(),
            repo: String::new(),
            token: None,
            download_timeout: Duration::from_secs(30 * 60),
        }
    }
}

/// Release feed client backed by the hosting service's REST API
pub struct ReleaseFeedClient {
    api: HttpClient,
    downloads: HttpClient,
    options: FeedOptions,
}

impl ReleaseFeedClient {
    pub fn new(options: FeedOptions) -> Result<Self, OpsError> {
        if options.owner.is_empty() || options.repo.is_empty() {
            return Err(OpsError::ConfigError(
                "release feed owner and repo must be set".to_string(),
            ));
        }

        Ok(Self {
            api: HttpClient::new(&options.api_base_url)?,
            downloads: HttpClient::with_timeout("", options.download_timeout)?,
            options,
        })
    }

    fn token(&self) -> Option<&str> {
        self.options.token.as_ref().map(|t| t.expose_secret())
    }
}

#[async_trait]
impl ReleaseSource for ReleaseFeedClient {
    async fn latest_release(&self) -> Result<Option<Release>, OpsError> {
        debug!(
            owner = %self.options.owner,
            repo = %self.options.repo,
            "Fetching latest release"
        );

        match self
            .api
            .get_latest_release(&self.options.owner, &self.options.repo, self.token())
            .await
        {
            Ok(release) => {
                info!(tag = %release.tag, assets = release.assets.len(), "Found latest release");
                Ok(Some(release))
            }
            Err(OpsError::HttpStatus { status: 404, .. }) => Ok(None),
            Err(e) => Err(OpsError::FeedError(e.to_string())),
        }
    }
}

#[async_trait]
impl ArtifactFetcher for ReleaseFeedClient {
    async fn fetch(&self, url: &str, dest: &File) -> Result<Downloaded, OpsError> {
        info!(url = %url, path = ?dest.path(), "Downloading artifact");
        let downloaded = self.downloads.download(url, self.token(), dest).await?;
        info!(bytes = downloaded.bytes, "Artifact downloaded");
        Ok(downloaded)
    }
}
