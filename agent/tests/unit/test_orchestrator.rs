//! Server creation pipeline tests

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arm_models::models::{
    InstanceView, NetworkInterface, PublicIpAddress, ResourceGroup, Subnet, VirtualMachine,
    VirtualNetwork,
};
use async_trait::async_trait;
use secrecy::ExposeSecret;

use gameops::cloud::arm::ComputeApi;
use gameops::cloud::provisioner::{BuildRequest, ProvisionOptions, VmProvisioner};
use gameops::deploy::orchestrator::{DeploymentOrchestrator, OrchestratorOptions};
use gameops::errors::OpsError;
use gameops::filesys::file::File;
use gameops::models::target::DeploymentTarget;
use gameops::progress::Progress;
use gameops::remote::deployer::{DeployOptions, RemoteDeployer};
use gameops::remote::session::{CommandOutput, RemoteConnector, RemoteSession, UploadTicket};
use gameops::storage::registry::{JsonFileRegistry, LocationRegistry};

// ================================ FAKES ================================== //

/// Echoes every resource back with an id
#[derive(Default)]
struct EchoCompute {
    fail_vm: bool,
    deleted: Mutex<Vec<String>>,
}

fn with_id(kind: &str, name: &str) -> Option<String> {
    Some(format!("/subscriptions/s/resourceGroups/rg/providers/{}/{}", kind, name))
}

#[async_trait]
impl ComputeApi for EchoCompute {
    async fn resource_group_exists(&self, _name: &str) -> Result<bool, OpsError> {
        Ok(false)
    }

    async fn delete_resource_group(&self, name: &str) -> Result<(), OpsError> {
        self.deleted.lock().unwrap().push(name.to_string());
        Ok(())
    }

    async fn create_resource_group(&self, name: &str, location: &str) -> Result<ResourceGroup, OpsError> {
        Ok(ResourceGroup {
            id: with_id("resourceGroups", name),
            name: Some(name.to_string()),
            location: location.to_string(),
        })
    }

    async fn create_virtual_network(&self, _rg: &str, name: &str, network: &VirtualNetwork) -> Result<VirtualNetwork, OpsError> {
        let mut created = network.clone();
        created.id = with_id("virtualNetworks", name);
        Ok(created)
    }

    async fn create_subnet(&self, _rg: &str, _network: &str, name: &str, subnet: &Subnet) -> Result<Subnet, OpsError> {
        let mut created = subnet.clone();
        created.id = with_id("subnets", name);
        Ok(created)
    }

    async fn create_public_ip(&self, _rg: &str, name: &str, address: &PublicIpAddress) -> Result<PublicIpAddress, OpsError> {
        let mut created = address.clone();
        created.id = with_id("publicIPAddresses", name);
        Ok(created)
    }

    async fn create_network_interface(&self, _rg: &str, name: &str, nic: &NetworkInterface) -> Result<NetworkInterface, OpsError> {
        let mut created = nic.clone();
        created.id = with_id("networkInterfaces", name);
        Ok(created)
    }

    async fn create_virtual_machine(&self, _rg: &str, name: &str, vm: &VirtualMachine) -> Result<VirtualMachine, OpsError> {
        if self.fail_vm {
            return Err(OpsError::CloudError("QuotaExceeded: no cores left (409 Conflict)".to_string()));
        }
        let mut created = vm.clone();
        created.id = with_id("virtualMachines", name);
        Ok(created)
    }

    async fn vm_instance_view(&self, _rg: &str, _name: &str) -> Result<InstanceView, OpsError> {
        Ok(InstanceView::default())
    }
}

/// Accepts every upload unless told otherwise and records commands
#[derive(Default)]
struct RecordingSession {
    commands: Mutex<Vec<String>>,
    fail_uploads: bool,
}

#[async_trait]
impl RemoteSession for RecordingSession {
    async fn open_transfer(&self) -> Result<(), OpsError> {
        Ok(())
    }

    async fn close_transfer(&self) -> Result<(), OpsError> {
        Ok(())
    }

    async fn open_shell(&self) -> Result<(), OpsError> {
        Ok(())
    }

    async fn close_shell(&self) -> Result<(), OpsError> {
        Ok(())
    }

    async fn upload_file(&self, local: &Path, _remote: &str) -> Result<UploadTicket, OpsError> {
        if self.fail_uploads {
            return Ok(UploadTicket::ready(Err(OpsError::RemoteError("broken pipe".to_string()))));
        }
        let len = tokio::fs::metadata(local).await?.len();
        Ok(UploadTicket::ready(Ok(len)))
    }

    async fn download_file(&self, _remote: &str, _local: &Path) -> Result<u64, OpsError> {
        Ok(0)
    }

    async fn make_directory(&self, _remote: &str) -> Result<(), OpsError> {
        Ok(())
    }

    async fn run_command(&self, command: &str) -> Result<CommandOutput, OpsError> {
        self.commands.lock().unwrap().push(command.to_string());
        Ok(CommandOutput::default())
    }
}

/// Registry whose backing store refuses writes
struct ReadOnlyRegistry;

#[async_trait]
impl LocationRegistry for ReadOnlyRegistry {
    async fn get(&self, _id: &str) -> Result<Option<DeploymentTarget>, OpsError> {
        Ok(None)
    }

    async fn list(&self) -> Result<Vec<DeploymentTarget>, OpsError> {
        Ok(Vec::new())
    }

    async fn add(&self, _target: DeploymentTarget) -> Result<String, OpsError> {
        Err(OpsError::RegistryError("targets.json: read-only file system".to_string()))
    }

    async fn update(&self, _target: &DeploymentTarget) -> Result<(), OpsError> {
        Ok(())
    }

    async fn delete(&self, _id: &str) -> Result<(), OpsError> {
        Ok(())
    }
}

struct Connector {
    session: Arc<RecordingSession>,
    seen: Mutex<Vec<DeploymentTarget>>,
}

impl RemoteConnector for Connector {
    fn session(&self, target: &DeploymentTarget) -> Arc<dyn RemoteSession> {
        self.seen.lock().unwrap().push(target.clone());
        self.session.clone()
    }
}

// ================================ HARNESS ================================ //

struct Harness {
    _tmp: tempfile::TempDir,
    compute: Arc<EchoCompute>,
    connector: Arc<Connector>,
    registry: Arc<dyn LocationRegistry>,
    orchestrator: DeploymentOrchestrator,
}

async fn harness(compute: EchoCompute, session: RecordingSession, teardown: bool) -> Harness {
    harness_with_registry(compute, session, teardown, None).await
}

async fn harness_with_registry(
    compute: EchoCompute,
    session: RecordingSession,
    teardown: bool,
    registry: Option<Arc<dyn LocationRegistry>>,
) -> Harness {
    let tmp = tempfile::tempdir().unwrap();
    let payload = tmp.path().join("payload");
    tokio::fs::create_dir_all(&payload).await.unwrap();
    tokio::fs::write(payload.join("GameServer"), "binary").await.unwrap();

    let compute = Arc::new(compute);
    let connector = Arc::new(Connector {
        session: Arc::new(session),
        seen: Mutex::new(Vec::new()),
    });
    let registry: Arc<dyn LocationRegistry> = match registry {
        Some(registry) => registry,
        None => Arc::new(JsonFileRegistry::new(File::new(tmp.path().join("targets.json")))),
    };

    let orchestrator = DeploymentOrchestrator::new(
        Arc::new(VmProvisioner::new(compute.clone(), ProvisionOptions::default())),
        Arc::new(RemoteDeployer::new(
            connector.clone(),
            DeployOptions {
                payload_dir: payload,
                upload_poll_interval: Duration::from_millis(1),
                ..Default::default()
            },
        )),
        registry.clone(),
        OrchestratorOptions {
            teardown_on_failure: teardown,
            ..Default::default()
        },
    );

    Harness {
        _tmp: tmp,
        compute,
        connector,
        registry,
        orchestrator,
    }
}

fn request() -> BuildRequest {
    BuildRequest {
        name: "Arena EU".to_string(),
        admin_user: "ops".to_string(),
        admin_password: "Str0ng-Pass".to_string(),
        region: "westeurope".to_string(),
    }
}

// ================================ TESTS ================================== //

#[tokio::test]
async fn test_create_server_provisions_deploys_and_registers() {
    let h = harness(EchoCompute::default(), RecordingSession::default(), false).await;

    let result = h.orchestrator.create_server(&request(), &Progress::silent()).await;

    assert!(result.success, "{:?}", result.detail);
    assert_eq!(
        result.domain_name.as_deref(),
        Some("arena-eu.westeurope.cloudapp.azure.com")
    );

    let seen = h.connector.seen.lock().unwrap().clone();
    assert_eq!(seen[0].host, "arena-eu.westeurope.cloudapp.azure.com");
    assert_eq!(seen[0].port, 22);

    let commands = h.connector.session.commands.lock().unwrap().clone();
    assert_eq!(commands.len(), 2);
    assert!(commands[1].starts_with("cd /home/ops/gameserver && nohup ./GameServer"));

    let targets = h.registry.list().await.unwrap();
    assert_eq!(targets.len(), 1);
    assert_eq!(targets[0].username, "ops");
    assert_eq!(targets[0].password.expose_secret(), "Str0ng-Pass");
    assert_eq!(targets[0].vm_name.as_deref(), Some("Arena EU"));
}

#[tokio::test]
async fn test_provisioning_failure_stops_pipeline() {
    let h = harness(
        EchoCompute {
            fail_vm: true,
            ..Default::default()
        },
        RecordingSession::default(),
        true,
    )
    .await;
    let (progress, mut rx) = Progress::channel();

    let result = h.orchestrator.create_server(&request(), &progress).await;

    assert!(!result.success);
    assert!(result.detail.unwrap().contains("QuotaExceeded"));
    assert!(h.connector.seen.lock().unwrap().is_empty());
    assert!(h.registry.list().await.unwrap().is_empty());

    drop(progress);
    let mut messages = Vec::new();
    while let Some(event) = rx.recv().await {
        messages.push(event.message);
    }
    assert!(messages.iter().any(|m| m.starts_with("Provisioning failed")));
}

#[tokio::test]
async fn test_deploy_failure_keeps_vm_by_default() {
    let h = harness(
        EchoCompute::default(),
        RecordingSession {
            fail_uploads: true,
            ..Default::default()
        },
        false,
    )
    .await;

    let result = h.orchestrator.create_server(&request(), &Progress::silent()).await;

    assert!(!result.success);
    assert_eq!(result.message, "Server creation failed while deploying");
    assert!(result.vm.is_some());
    assert!(h.compute.deleted.lock().unwrap().is_empty());
    assert!(h.registry.list().await.unwrap().is_empty());
    assert!(h.connector.session.commands.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_deploy_failure_tears_down_when_enabled() {
    let h = harness(
        EchoCompute::default(),
        RecordingSession {
            fail_uploads: true,
            ..Default::default()
        },
        true,
    )
    .await;

    let result = h.orchestrator.create_server(&request(), &Progress::silent()).await;

    assert!(!result.success);
    assert!(result.vm.is_none());
    assert_eq!(*h.compute.deleted.lock().unwrap(), vec!["arena-eu-rg".to_string()]);
}

#[tokio::test]
async fn test_registry_failure_fails_creation_and_tears_down() {
    let h = harness_with_registry(
        EchoCompute::default(),
        RecordingSession::default(),
        true,
        Some(Arc::new(ReadOnlyRegistry)),
    )
    .await;
    let (progress, mut rx) = Progress::channel();

    let result = h.orchestrator.create_server(&request(), &progress).await;
    drop(progress);

    assert!(!result.success);
    assert_eq!(result.message, "Server creation failed while registering");
    assert!(result.detail.unwrap().contains("read-only file system"));
    assert!(result.vm.is_none());
    assert_eq!(*h.compute.deleted.lock().unwrap(), vec!["arena-eu-rg".to_string()]);

    // Files were deployed and the server launched before registering failed
    assert_eq!(h.connector.session.commands.lock().unwrap().len(), 2);

    let mut messages = Vec::new();
    while let Some(event) = rx.recv().await {
        messages.push(event.message);
    }
    assert!(messages
        .iter()
        .any(|m| m.starts_with("Server creation failed while registering")));
    assert!(messages.iter().any(|m| m.starts_with("Tearing down")));
}
