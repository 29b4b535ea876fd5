//! Deployment target registry

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::errors::OpsError;
use crate::filesys::file::File;
use crate::models::target::DeploymentTarget;
use crate::utils::generate_uuid;

/// Persistent store of deployment targets keyed by opaque id
#[async_trait]
pub trait LocationRegistry: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<DeploymentTarget>, OpsError>;

    async fn list(&self) -> Result<Vec<DeploymentTarget>, OpsError>;

    /// Store a new target and return its assigned id
    async fn add(&self, target: DeploymentTarget) -> Result<String, OpsError>;

    async fn update(&self, target: &DeploymentTarget) -> Result<(), OpsError>;

    async fn delete(&self, id: &str) -> Result<(), OpsError>;
}

/// Registry kept in a single JSON file readable only by the owner, since
/// targets carry passwords
pub struct JsonFileRegistry {
    file: File,
    lock: Mutex<()>,
}

impl JsonFileRegistry {
    pub fn new(file: File) -> Self {
        Self {
            file,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> Result<BTreeMap<String, DeploymentTarget>, OpsError> {
        if !self.file.exists().await {
            return Ok(BTreeMap::new());
        }
        self.file.read_json().await.map_err(|e| {
            OpsError::RegistryError(format!(
                "Failed to read registry {}: {}",
                self.file.path().display(),
                e
            ))
        })
    }

    async fn save(&self, targets: &BTreeMap<String, DeploymentTarget>) -> Result<(), OpsError> {
        self.file.write_json_private(targets).await?;
        debug!("Saved {} deployment targets", targets.len());
        Ok(())
    }
}

#[async_trait]
impl LocationRegistry for JsonFileRegistry {
    async fn get(&self, id: &str) -> Result<Option<DeploymentTarget>, OpsError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(id))
    }

    async fn list(&self) -> Result<Vec<DeploymentTarget>, OpsError> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.into_values().collect())
    }

    async fn add(&self, mut target: DeploymentTarget) -> Result<String, OpsError> {
        let _guard = self.lock.lock().await;
        let mut targets = self.load().await?;

        if target.id.is_empty() {
            target.id = generate_uuid();
        }
        if targets.contains_key(&target.id) {
            return Err(OpsError::RegistryError(format!(
                "Target {} already exists",
                target.id
            )));
        }

        let id = target.id.clone();
        info!(id = %id, host = %target.host, "Registering deployment target");
        targets.insert(id.clone(), target);
        self.save(&targets).await?;
        Ok(id)
    }

    async fn update(&self, target: &DeploymentTarget) -> Result<(), OpsError> {
        let _guard = self.lock.lock().await;
        let mut targets = self.load().await?;

        match targets.get_mut(&target.id) {
            Some(existing) => *existing = target.clone(),
            None => return Err(OpsError::NotFound(format!("deployment target {}", target.id))),
        }
        self.save(&targets).await
    }

    async fn delete(&self, id: &str) -> Result<(), OpsError> {
        let _guard = self.lock.lock().await;
        let mut targets = self.load().await?;

        if targets.remove(id).is_none() {
            return Err(OpsError::NotFound(format!("deployment target {}", id)));
        }
        info!(id = %id, "Removed deployment target");
        self.save(&targets).await
    }
}
