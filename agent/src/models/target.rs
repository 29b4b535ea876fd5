//! Deployment target (location) model

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::OpsError;

/// Default SSH port for deployment targets
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A remote host plus the credentials and path convention used to mirror and
/// run a server payload on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentTarget {
    /// Registry identifier; empty until the registry assigns one
    #[serde(default)]
    pub id: String,

    /// Domain name or address of the host
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    pub username: String,

    #[serde(
        serialize_with = "serialize_secret",
        deserialize_with = "deserialize_secret"
    )]
    pub password: SecretString,

    /// Payload location relative to the user's home directory
    pub relative_path: String,

    /// Name of the VM backing this target, when it was provisioned by us
    #[serde(default)]
    pub vm_name: Option<String>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl DeploymentTarget {
    pub fn new(
        host: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        relative_path: impl Into<String>,
    ) -> Self {
        Self {
            id: String::new(),
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: username.into(),
            password: SecretString::from(password.into()),
            relative_path: relative_path.into(),
            vm_name: None,
        }
    }

    /// Ensure host, username and password are all set
    pub fn validate(&self) -> Result<(), OpsError> {
        let mut missing = Vec::new();
        if self.host.trim().is_empty() {
            missing.push("host");
        }
        if self.username.trim().is_empty() {
            missing.push("username");
        }
        if self.password.expose_secret().is_empty() {
            missing.push("password");
        }

        if missing.is_empty() {
            Ok(())
        } else {
            Err(OpsError::InvalidArgument(format!(
                "deployment target is missing: {}",
                missing.join(", ")
            )))
        }
    }

    /// Absolute remote directory: `/home/{user}/{relative_path}`
    pub fn remote_dir(&self) -> String {
        let rel = self.relative_path.trim_matches('/');
        if rel.is_empty() {
            format!("/home/{}", self.username)
        } else {
            format!("/home/{}/{}", self.username, rel)
        }
    }

    /// Replace the stored password
    pub fn rotate_password(&mut self, password: impl Into<String>) {
        self.password = SecretString::from(password.into());
    }
}

fn serialize_secret<S: Serializer>(secret: &SecretString, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

fn deserialize_secret<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SecretString, D::Error> {
    let raw = String::deserialize(deserializer)?;
    Ok(SecretString::from(raw))
}
