//! OAuth2 token endpoint API

use serde::Deserialize;

use crate::errors::OpsError;
use crate::http::client::HttpClient;

/// Successful token endpoint response
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,

    /// Lifetime in seconds
    pub expires_in: i64,

    #[serde(default)]
    pub token_type: Option<String>,

    /// Only returned for delegated grants
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Device authorization response
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeResponse {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,

    /// Minimum polling interval in seconds
    #[serde(default = "default_interval")]
    pub interval: u64,

    /// Instructions to show the user
    #[serde(default)]
    pub message: Option<String>,
}

fn default_interval() -> u64 {
    5
}

/// Error body returned by the token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenErrorResponse {
    pub error: String,

    #[serde(default)]
    pub error_description: Option<String>,
}

impl TokenErrorResponse {
    /// Parse the body of an [`OpsError::HttpStatus`], if it is a token error
    pub fn from_error(err: &OpsError) -> Option<Self> {
        match err {
            OpsError::HttpStatus { body, .. } => serde_json::from_str(body).ok(),
            _ => None,
        }
    }
}

impl HttpClient {
    /// Exchange a grant for an access token
    pub async fn request_token(
        &self,
        tenant_id: &str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, OpsError> {
        let path = format!("/{}/oauth2/v2.0/token", tenant_id);
        self.post_form(&path, form).await
    }

    /// Start a device authorization flow
    pub async fn request_device_code(
        &self,
        tenant_id: &str,
        client_id: &str,
        scope: &str,
    ) -> Result<DeviceCodeResponse, OpsError> {
        let path = format!("/{}/oauth2/v2.0/devicecode", tenant_id);
        self.post_form(&path, &[("client_id", client_id), ("scope", scope)])
            .await
    }
}
