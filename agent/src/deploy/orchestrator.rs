//! Server creation pipeline: provision, deploy, register

use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::cloud::provisioner::{BuildRequest, VmProvisioner};
use crate::deploy::fsm::{CreationEvent, CreationFsm};
use crate::errors::OpsError;
use crate::models::deployment::{DeploymentResult, VmHandle};
use crate::models::target::{DeploymentTarget, DEFAULT_SSH_PORT};
use crate::progress::Progress;
use crate::remote::deployer::RemoteDeployer;
use crate::storage::registry::LocationRegistry;

/// Orchestrator options
#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// SSH port of freshly provisioned VMs
    pub ssh_port: u16,

    /// Deployed directory relative to the admin user's home
    pub relative_path: String,

    /// Delete the resource group when deploying or registering fails
    pub teardown_on_failure: bool,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            ssh_port: DEFAULT_SSH_PORT,
            relative_path: "gameserver".to_string(),
            teardown_on_failure: false,
        }
    }
}

pub struct DeploymentOrchestrator {
    provisioner: Arc<VmProvisioner>,
    deployer: Arc<RemoteDeployer>,
    registry: Arc<dyn LocationRegistry>,
    options: OrchestratorOptions,
}

impl DeploymentOrchestrator {
    pub fn new(
        provisioner: Arc<VmProvisioner>,
        deployer: Arc<RemoteDeployer>,
        registry: Arc<dyn LocationRegistry>,
        options: OrchestratorOptions,
    ) -> Self {
        Self {
            provisioner,
            deployer,
            registry,
            options,
        }
    }

    /// Build a VM, deploy the server payload to it and register it as a
    /// deployment target. Each stage only runs if the previous one succeeded.
    #[instrument(skip(self, request, progress), fields(name = %request.name))]
    pub async fn create_server(
        &self,
        request: &BuildRequest,
        progress: &Progress,
    ) -> DeploymentResult {
        let mut fsm = CreationFsm::new();
        advance(&mut fsm, CreationEvent::Provision);

        progress.info(format!("Provisioning server {}", request.name));
        let built = self.provisioner.build(request, progress).await;
        let vm = match built.vm.clone() {
            Some(vm) if built.success => vm,
            _ => {
                advance(
                    &mut fsm,
                    CreationEvent::Fail(built.detail.clone().unwrap_or_default()),
                );
                return built;
            }
        };
        advance(&mut fsm, CreationEvent::Provisioned);

        let mut target = DeploymentTarget::new(
            vm.domain_name.clone(),
            request.admin_user.clone(),
            request.admin_password.clone(),
            self.options.relative_path.clone(),
        );
        target.port = self.options.ssh_port;
        target.vm_name = Some(request.name.clone());

        progress.info(format!("Deploying server files to {}", vm.domain_name));
        if let Err(e) = self.deployer.deploy(&target, progress).await {
            return self.fail(&mut fsm, request, vm, e, progress).await;
        }
        advance(&mut fsm, CreationEvent::Deployed);

        let id = match self.registry.add(target).await {
            Ok(id) => id,
            Err(e) => return self.fail(&mut fsm, request, vm, e, progress).await,
        };
        advance(&mut fsm, CreationEvent::Registered);

        progress.info(format!(
            "Server {} is ready, connect to {}",
            request.name, vm.domain_name
        ));
        info!(target_id = %id, "Server created");
        DeploymentResult::succeeded(format!("Server {} registered as {}", request.name, id), vm)
    }

    async fn fail(
        &self,
        fsm: &mut CreationFsm,
        request: &BuildRequest,
        vm: VmHandle,
        error: OpsError,
        progress: &Progress,
    ) -> DeploymentResult {
        let stage = fsm.state();
        advance(fsm, CreationEvent::Fail(error.to_string()));
        progress.error(format!("Server creation failed while {}: {}", stage, error));

        let mut kept = Some(vm);
        if self.options.teardown_on_failure {
            progress.warn(format!("Tearing down resources of {}", request.name));
            match self.provisioner.destroy(&request.name).await {
                Ok(()) => kept = None,
                Err(e) => progress.error(format!("Teardown failed: {}", e)),
            }
        }

        DeploymentResult::failed(
            format!("Server creation failed while {}", stage),
            error.to_string(),
        )
        .with_vm(kept)
    }
}

fn advance(fsm: &mut CreationFsm, event: CreationEvent) {
    if let Err(e) = fsm.process(event) {
        warn!("{}", e);
    }
}
