//! Control-plane credentials

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::errors::OpsError;
use crate::http::client::HttpClient;
use crate::http::oauth::{TokenErrorResponse, TokenResponse};

/// A bearer token and its expiry
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub secret: SecretString,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn from_response(response: TokenResponse) -> Self {
        Self {
            secret: SecretString::from(response.access_token),
            expires_at: Utc::now() + chrono::Duration::seconds(response.expires_in),
        }
    }

    /// Check if the token is expired
    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Check if the token expires within the given duration
    pub fn expires_within(&self, seconds: i64) -> bool {
        self.expires_at < Utc::now() + chrono::Duration::seconds(seconds)
    }
}

/// Source of bearer tokens for the cloud control plane
#[async_trait]
pub trait TokenCredential: Send + Sync {
    async fn get_token(&self) -> Result<AccessToken, OpsError>;
}

/// Credential options
#[derive(Debug, Clone)]
pub struct CredentialOptions {
    pub authority_host: String,
    pub tenant_id: String,
    pub client_id: String,

    /// Client credentials are used when set, the device-code flow otherwise
    pub client_secret: Option<SecretString>,

    pub scope: String,

    /// Tokens this close to expiry are renewed
    pub refresh_margin: Duration,
}

impl Default for CredentialOptions {
    fn default() -> Self {
        Self {
            authority_host: "https://login.microsoftonline.com".to_string(),
            tenant_id: String::new(),
            client_id: String::new(),
            client_secret: None,
            scope: "https://management.azure.com/.default".to_string(),
            refresh_margin: Duration::from_secs(300),
        }
    }
}

impl CredentialOptions {
    fn validate(&self) -> Result<(), OpsError> {
        if self.tenant_id.is_empty() || self.client_id.is_empty() {
            return Err(OpsError::ConfigError(
                "cloud tenant_id and client_id must be set".to_string(),
            ));
        }
        Ok(())
    }
}

/// Build the configured credential
pub fn credential_from_options(
    options: CredentialOptions,
) -> Result<Box<dyn TokenCredential>, OpsError> {
    if options.client_secret.is_some() {
        Ok(Box::new(ClientSecretCredential::new(options)?))
    } else {
        Ok(Box::new(DeviceCodeCredential::new(options)?))
    }
}

struct TokenCache {
    cached: RwLock<Option<AccessToken>>,
    margin: i64,
}

impl TokenCache {
    fn new(margin: Duration) -> Self {
        Self {
            cached: RwLock::new(None),
            margin: margin.as_secs() as i64,
        }
    }

    async fn fresh(&self) -> Option<AccessToken> {
        let cached = self.cached.read().await;
        cached
            .as_ref()
            .filter(|token| !token.expires_within(self.margin))
            .cloned()
    }

    async fn store(&self, token: AccessToken) -> AccessToken {
        *self.cached.write().await = Some(token.clone());
        token
    }
}

/// Service-principal credential using the client credentials grant
pub struct ClientSecretCredential {
    http: HttpClient,
    options: CredentialOptions,
    cache: TokenCache,
}

impl ClientSecretCredential {
    pub fn new(options: CredentialOptions) -> Result<Self, OpsError> {
        options.validate()?;
        if options.client_secret.is_none() {
            return Err(OpsError::ConfigError("client secret is not set".to_string()));
        }

        Ok(Self {
            http: HttpClient::new(&options.authority_host)?,
            cache: TokenCache::new(options.refresh_margin),
            options,
        })
    }
}

#[async_trait]
impl TokenCredential for ClientSecretCredential {
    async fn get_token(&self) -> Result<AccessToken, OpsError> {
        if let Some(token) = self.cache.fresh().await {
            return Ok(token);
        }

        debug!("Requesting client credentials token");
        let secret = self
            .options
            .client_secret
            .as_ref()
            .map(|s| s.expose_secret())
            .unwrap_or_default();

        let response = self
            .http
            .request_token(
                &self.options.tenant_id,
                &[
                    ("grant_type", "client_credentials"),
                    ("client_id", self.options.client_id.as_str()),
                    ("client_secret", secret),
                    ("scope", self.options.scope.as_str()),
                ],
            )
            .await
            .map_err(|e| OpsError::AuthError(format!("token request failed: {}", e)))?;

        let token = AccessToken::from_response(response);
        info!("Acquired control-plane token, expires at: {}", token.expires_at);
        Ok(self.cache.store(token).await)
    }
}

/// Interactive credential: the user signs in on another device with a code
pub struct DeviceCodeCredential {
    http: HttpClient,
    options: CredentialOptions,
    cache: TokenCache,
    refresh_token: RwLock<Option<SecretString>>,
}

impl DeviceCodeCredential {
    pub fn new(options: CredentialOptions) -> Result<Self, OpsError> {
        options.validate()?;
        Ok(Self {
            http: HttpClient::new(&options.authority_host)?,
            cache: TokenCache::new(options.refresh_margin),
            refresh_token: RwLock::new(None),
            options,
        })
    }

    fn scope(&self) -> String {
        format!("{} offline_access", self.options.scope)
    }

    async fn sign_in(&self) -> Result<AccessToken, OpsError> {
        let scope = self.scope();
        let code = self
            .http
            .request_device_code(&self.options.tenant_id, &self.options.client_id, &scope)
            .await
            .map_err(|e| OpsError::AuthError(format!("device code request failed: {}", e)))?;

        let prompt = code.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}",
                code.verification_uri, code.user_code
            )
        });
        // The prompt must reach the user even when logs go to a file
        eprintln!("{}", prompt);
        info!("{}", prompt);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(code.expires_in);
        let mut interval = Duration::from_secs(code.interval.max(1));

        while tokio::time::Instant::now() < deadline {
            tokio::time::sleep(interval).await;

            let result = self
                .http
                .request_token(
                    &self.options.tenant_id,
                    &[
                        ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                        ("client_id", self.options.client_id.as_str()),
                        ("device_code", code.device_code.as_str()),
                    ],
                )
                .await;

            match result {
                Ok(response) => return Ok(self.accept(response).await),
                Err(e) => match TokenErrorResponse::from_error(&e) {
                    Some(err) if err.error == "authorization_pending" => continue,
                    Some(err) if err.error == "slow_down" => {
                        interval += Duration::from_secs(5);
                    }
                    _ => return Err(OpsError::AuthError(format!("sign-in failed: {}", e))),
                },
            }
        }

        Err(OpsError::AuthError("device code expired before sign-in".to_string()))
    }

    async fn redeem_refresh_token(&self, refresh: &SecretString) -> Result<AccessToken, OpsError> {
        let scope = self.scope();
        let response = self
            .http
            .request_token(
                &self.options.tenant_id,
                &[
                    ("grant_type", "refresh_token"),
                    ("client_id", self.options.client_id.as_str()),
                    ("refresh_token", refresh.expose_secret()),
                    ("scope", scope.as_str()),
                ],
            )
            .await?;
        Ok(self.accept(response).await)
    }

    async fn accept(&self, response: TokenResponse) -> AccessToken {
        if let Some(refresh) = &response.refresh_token {
            *self.refresh_token.write().await = Some(SecretString::from(refresh.clone()));
        }
        let token = AccessToken::from_response(response);
        info!("Signed in, token expires at: {}", token.expires_at);
        self.cache.store(token).await
    }
}

#[async_trait]
impl TokenCredential for DeviceCodeCredential {
    async fn get_token(&self) -> Result<AccessToken, OpsError> {
        if let Some(token) = self.cache.fresh().await {
            return Ok(token);
        }

        let refresh = self.refresh_token.read().await.clone();
        if let Some(refresh) = refresh {
            match self.redeem_refresh_token(&refresh).await {
                Ok(token) => return Ok(token),
                Err(e) => warn!("Refresh token rejected, signing in again: {}", e),
            }
        }

        self.sign_in().await
    }
}
