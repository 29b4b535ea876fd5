//! Release feed API

use release_feed::Release;

use crate::errors::OpsError;
use crate::http::client::HttpClient;

impl HttpClient {
    /// Get the latest published release of `owner/repo`
    pub async fn get_latest_release(
        &self,
        owner: &str,
        repo: &str,
        token: Option<&str>,
    ) -> Result<Release, OpsError> {
        let path = format!("/repos/{}/{}/releases/latest", owner, repo);
        self.get(&path, token).await
    }
}
