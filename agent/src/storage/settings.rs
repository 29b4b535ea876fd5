//! Settings file management

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, info};

use crate::authn::credential::CredentialOptions;
use crate::cloud::arm::ArmOptions;
use crate::cloud::provisioner::ProvisionOptions;
use crate::errors::OpsError;
use crate::filesys::file::File;
use crate::logs::LogLevel;
use crate::release::feed::FeedOptions;
use crate::remote::deployer::DeployOptions;
use crate::remote::session::SshOptions;
use crate::update::process::ProcessOptions;

pub const FEED_TOKEN_ENV: &str = "GAMEOPS_FEED_TOKEN";
pub const CLIENT_SECRET_ENV: &str = "GAMEOPS_CLIENT_SECRET";

/// gameops settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// Log level
    #[serde(default)]
    pub log_level: LogLevel,

    /// Emit JSON log lines
    #[serde(default)]
    pub log_json: bool,

    /// Also write daily rolling log files under the storage logs directory
    #[serde(default)]
    pub log_to_file: bool,

    /// Local self-update
    #[serde(default)]
    pub update: UpdateSettings,

    /// Cloud provisioning
    #[serde(default)]
    pub cloud: CloudSettings,

    /// Remote deployment
    #[serde(default)]
    pub remote: RemoteSettings,
}

impl Settings {
    /// Read settings from `file`; a missing file yields the defaults.
    /// Secrets in the environment override the file.
    pub async fn load(file: &File) -> Result<Self, OpsError> {
        let mut settings = if file.exists().await {
            file.read_json::<Settings>().await.map_err(|e| {
                OpsError::ConfigError(format!(
                    "unable to read settings file {}: {}",
                    file.path().display(),
                    e
                ))
            })?
        } else {
            info!(
                "Settings file {} not found, using defaults",
                file.path().display()
            );
            Settings::default()
        };

        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    /// Apply environment overrides using `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(token) = lookup(FEED_TOKEN_ENV).filter(|v| !v.is_empty()) {
            debug!("Release feed token taken from {}", FEED_TOKEN_ENV);
            self.update.token = Some(SecretString::from(token));
        }
        if let Some(secret) = lookup(CLIENT_SECRET_ENV).filter(|v| !v.is_empty()) {
            debug!("Cloud client secret taken from {}", CLIENT_SECRET_ENV);
            self.cloud.client_secret = Some(SecretString::from(secret));
        }
    }
}

fn default_true() -> bool {
    true
}

fn deserialize_optional_secret<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<SecretString>, D::Error> {
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.filter(|v| !v.is_empty()).map(SecretString::from))
}

// ================================ UPDATE ================================= //

/// Self-update settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSettings {
    /// Run the periodic update poller in daemon mode
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_feed_api_url")]
    pub feed_api_url: String,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub repo: String,

    #[serde(default, skip_serializing, deserialize_with = "deserialize_optional_secret")]
    pub token: Option<SecretString>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    #[serde(default = "default_install_dir")]
    pub install_dir: PathBuf,

    /// Defaults to the storage layout's backup directory
    #[serde(default)]
    pub backup_dir: Option<PathBuf>,

    #[serde(default = "default_process_name")]
    pub process_name: String,

    /// Defaults to `{install_dir}/{process_name}`
    #[serde(default)]
    pub executable: Option<PathBuf>,

    #[serde(default = "default_launch_args")]
    pub launch_args: Vec<String>,

    #[serde(default = "default_stop_timeout")]
    pub stop_timeout_secs: u64,

    #[serde(default = "default_settle_delay")]
    pub settle_delay_secs: u64,
}

fn default_feed_api_url() -> String {
    "https://api.github.com".to_string()
}

fn default_poll_interval() -> u64 {
    300
}

fn default_install_dir() -> PathBuf {
    PathBuf::from("/opt/gameserver")
}

fn default_process_name() -> String {
    "GameServer".to_string()
}

fn default_launch_args() -> Vec<String> {
    vec!["-batchmode".to_string(), "-nographics".to_string()]
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_settle_delay() -> u64 {
    2
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            feed_api_url: default_feed_api_url(),
            owner: String::new(),
            repo: String::new(),
            token: None,
            poll_interval_secs: default_poll_interval(),
            install_dir: default_install_dir(),
            backup_dir: None,
            process_name: default_process_name(),
            executable: None,
            launch_args: default_launch_args(),
            stop_timeout_secs: default_stop_timeout(),
            settle_delay_secs: default_settle_delay(),
        }
    }
}

impl UpdateSettings {
    pub fn is_configured(&self) -> bool {
        !self.owner.is_empty() && !self.repo.is_empty()
    }

    pub fn feed_options(&self) -> FeedOptions {
        FeedOptions {
            api_base_url: self.feed_api_url.clone(),
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            token: self.token.clone(),
            ..Default::default()
        }
    }

    pub fn process_options(&self) -> ProcessOptions {
        ProcessOptions {
            process_name: self.process_name.clone(),
            executable: self
                .executable
                .clone()
                .unwrap_or_else(|| self.install_dir.join(&self.process_name)),
            working_dir: self.install_dir.clone(),
            args: self.launch_args.clone(),
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            settle_delay: Duration::from_secs(self.settle_delay_secs),
            ..Default::default()
        }
    }
}

// ================================= CLOUD ================================= //

/// Cloud provisioning settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudSettings {
    #[serde(default = "default_authority_host")]
    pub authority_host: String,

    #[serde(default = "default_arm_endpoint")]
    pub endpoint: String,

    #[serde(default)]
    pub tenant_id: String,

    #[serde(default)]
    pub subscription_id: String,

    #[serde(default)]
    pub client_id: String,

    /// Service-principal secret; the device-code sign-in is used without it
    #[serde(default, skip_serializing, deserialize_with = "deserialize_optional_secret")]
    pub client_secret: Option<SecretString>,

    #[serde(default = "default_region")]
    pub region: String,

    #[serde(default = "default_vm_size")]
    pub vm_size: String,

    #[serde(default = "default_spot_max_price")]
    pub spot_max_price: f64,

    /// Delete the resource group when deployment fails after provisioning
    #[serde(default)]
    pub teardown_on_failure: bool,
}

fn default_authority_host() -> String {
    "https://login.microsoftonline.com".to_string()
}

fn default_arm_endpoint() -> String {
    "https://management.azure.com".to_string()
}

fn default_region() -> String {
    "westeurope".to_string()
}

fn default_vm_size() -> String {
    "Standard_D2s_v3".to_string()
}

fn default_spot_max_price() -> f64 {
    -1.0
}

impl Default for CloudSettings {
    fn default() -> Self {
        Self {
            authority_host: default_authority_host(),
            endpoint: default_arm_endpoint(),
            tenant_id: String::new(),
            subscription_id: String::new(),
            client_id: String::new(),
            client_secret: None,
            region: default_region(),
            vm_size: default_vm_size(),
            spot_max_price: default_spot_max_price(),
            teardown_on_failure: false,
        }
    }
}

impl CloudSettings {
    pub fn credential_options(&self) -> CredentialOptions {
        CredentialOptions {
            authority_host: self.authority_host.clone(),
            tenant_id: self.tenant_id.clone(),
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            ..Default::default()
        }
    }

    pub fn arm_options(&self) -> ArmOptions {
        ArmOptions {
            endpoint: self.endpoint.clone(),
            subscription_id: self.subscription_id.clone(),
            ..Default::default()
        }
    }

    pub fn provision_options(&self) -> ProvisionOptions {
        ProvisionOptions {
            vm_size: self.vm_size.clone(),
            spot_max_price: self.spot_max_price,
            ..Default::default()
        }
    }
}

// ================================ REMOTE ================================= //

/// Remote deployment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteSettings {
    #[serde(default = "default_ssh_port")]
    pub ssh_port: u16,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_payload_dir")]
    pub payload_dir: PathBuf,

    /// Deployed directory relative to the remote user's home
    #[serde(default = "default_relative_path")]
    pub relative_path: String,

    #[serde(default = "default_process_name")]
    pub binary: String,

    #[serde(default = "default_launch_args")]
    pub launch_args: Vec<String>,

    #[serde(default = "default_upload_poll_interval")]
    pub upload_poll_interval_ms: u64,
}

fn default_ssh_port() -> u16 {
    crate::models::target::DEFAULT_SSH_PORT
}

fn default_connect_timeout() -> u64 {
    15
}

fn default_payload_dir() -> PathBuf {
    PathBuf::from("build/server")
}

fn default_relative_path() -> String {
    "gameserver".to_string()
}

fn default_upload_poll_interval() -> u64 {
    100
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            ssh_port: default_ssh_port(),
            connect_timeout_secs: default_connect_timeout(),
            payload_dir: default_payload_dir(),
            relative_path: default_relative_path(),
            binary: default_process_name(),
            launch_args: default_launch_args(),
            upload_poll_interval_ms: default_upload_poll_interval(),
        }
    }
}

impl RemoteSettings {
    pub fn deploy_options(&self) -> DeployOptions {
        DeployOptions {
            payload_dir: self.payload_dir.clone(),
            binary: self.binary.clone(),
            launch_args: self.launch_args.clone(),
            upload_poll_interval: Duration::from_millis(self.upload_poll_interval_ms),
            ..Default::default()
        }
    }

    pub fn ssh_options(&self) -> SshOptions {
        SshOptions {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            ..Default::default()
        }
    }
}
