//! VM provisioning tests

use std::sync::{Arc, Mutex};

use arm_models::models::{
    InstanceView, InstanceViewStatus, NetworkInterface, PublicIpAddress, ResourceGroup, Subnet,
    VirtualMachine, VirtualNetwork,
};
use async_trait::async_trait;

use gameops::cloud::arm::ComputeApi;
use gameops::cloud::provisioner::{BuildRequest, ProvisionOptions, VmProvisioner};
use gameops::errors::OpsError;
use gameops::progress::Progress;

// ================================ FAKES ================================== //

/// Records every call and echoes resources back with provider-style ids
#[derive(Default)]
struct FakeCompute {
    calls: Mutex<Vec<String>>,
    existing_group: bool,
    fail_vm: bool,
    last_vm: Mutex<Option<VirtualMachine>>,
}

impl FakeCompute {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

fn resource_id(group: &str, kind: &str, name: &str) -> String {
    format!("/subscriptions/sub-1/resourceGroups/{}/providers/{}/{}", group, kind, name)
}

#[async_trait]
impl ComputeApi for FakeCompute {
    async fn resource_group_exists(&self, name: &str) -> Result<bool, OpsError> {
        self.record(format!("exists {}", name));
        Ok(self.existing_group)
    }

    async fn delete_resource_group(&self, name: &str) -> Result<(), OpsError> {
        self.record(format!("delete {}", name));
        Ok(())
    }

    async fn create_resource_group(
        &self,
        name: &str,
        location: &str,
    ) -> Result<ResourceGroup, OpsError> {
        self.record(format!("group {} {}", name, location));
        Ok(ResourceGroup {
            id: Some(format!("/subscriptions/sub-1/resourceGroups/{}", name)),
            name: Some(name.to_string()),
            location: location.to_string(),
        })
    }

    async fn create_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        network: &VirtualNetwork,
    ) -> Result<VirtualNetwork, OpsError> {
        self.record(format!(
            "vnet {} {}",
            name,
            network.properties.address_space.address_prefixes.join(",")
        ));
        let mut created = network.clone();
        created.id = Some(resource_id(resource_group, "Microsoft.Network/virtualNetworks", name));
        Ok(created)
    }

    async fn create_subnet(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
        subnet: &Subnet,
    ) -> Result<Subnet, OpsError> {
        self.record(format!("subnet {} {}", name, subnet.properties.address_prefix));
        let mut created = subnet.clone();
        created.id = Some(resource_id(
            resource_group,
            "Microsoft.Network/virtualNetworks",
            &format!("{}/subnets/{}", network, name),
        ));
        Ok(created)
    }

    async fn create_public_ip(
        &self,
        resource_group: &str,
        name: &str,
        address: &PublicIpAddress,
    ) -> Result<PublicIpAddress, OpsError> {
        let label = address
            .properties
            .dns_settings
            .as_ref()
            .map(|dns| dns.domain_name_label.clone())
            .unwrap_or_default();
        self.record(format!("ip {} {}", name, label));

        let mut created = address.clone();
        created.id = Some(resource_id(resource_group, "Microsoft.Network/publicIPAddresses", name));
        if let Some(dns) = created.properties.dns_settings.as_mut() {
            dns.fqdn = Some(format!(
                "{}.{}.cloudapp.azure.com",
                dns.domain_name_label, address.location
            ));
        }
        Ok(created)
    }

    async fn create_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<NetworkInterface, OpsError> {
        self.record(format!(
            "nic {} accelerated={}",
            name, nic.properties.enable_accelerated_networking
        ));
        let mut created = nic.clone();
        created.id = Some(resource_id(resource_group, "Microsoft.Network/networkInterfaces", name));
        Ok(created)
    }

    async fn create_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine, OpsError> {
        self.record(format!("vm {}", name));
        *self.last_vm.lock().unwrap() = Some(vm.clone());
        if self.fail_vm {
            return Err(OpsError::CloudError(
                "SkuNotAvailable: no Spot capacity (409 Conflict)".to_string(),
            ));
        }
        let mut created = vm.clone();
        created.id = Some(resource_id(resource_group, "Microsoft.Compute/virtualMachines", name));
        Ok(created)
    }

    async fn vm_instance_view(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<InstanceView, OpsError> {
        self.record(format!("view {} {}", resource_group, name));
        if name == "missing-vm" {
            return Err(OpsError::CloudError("ResourceNotFound: gone (404 Not Found)".to_string()));
        }
        Ok(InstanceView {
            statuses: vec![
                InstanceViewStatus {
                    code: "ProvisioningState/succeeded".to_string(),
                    level: None,
                    display_status: Some("Provisioning succeeded".to_string()),
                },
                InstanceViewStatus {
                    code: "PowerState/running".to_string(),
                    level: None,
                    display_status: Some("VM running".to_string()),
                },
            ],
        })
    }
}

fn request(name: &str) -> BuildRequest {
    BuildRequest {
        name: name.to_string(),
        admin_user: "ops".to_string(),
        admin_password: "Hunter2-Hunter2".to_string(),
        region: "westeurope".to_string(),
    }
}

// ================================ TESTS ================================== //

#[tokio::test]
async fn test_build_sanitizes_name_into_domain() {
    let api = Arc::new(FakeCompute::default());
    let provisioner = VmProvisioner::new(api.clone(), ProvisionOptions::default());

    let result = provisioner
        .build(&request("  Friday Night's Arena!! "), &Progress::silent())
        .await;

    assert!(result.success, "{:?}", result.detail);
    assert_eq!(
        result.domain_name.as_deref(),
        Some("friday-nights-arena.westeurope.cloudapp.azure.com")
    );

    let vm = result.vm.unwrap();
    assert_eq!(vm.resource_group, "friday-nights-arena-rg");
    assert_eq!(vm.vm_name, "friday-nights-arena-vm");
    assert!(vm.network_interface_id.ends_with("networkInterfaces/friday-nights-arena-nic"));

    assert_eq!(
        api.calls(),
        vec![
            "exists friday-nights-arena-rg",
            "group friday-nights-arena-rg westeurope",
            "vnet friday-nights-arena-vnet 10.0.0.0/16",
            "subnet friday-nights-arena-subnet 10.0.0.0/24",
            "ip friday-nights-arena-ip friday-nights-arena",
            "nic friday-nights-arena-nic accelerated=true",
            "vm friday-nights-arena-vm",
        ]
    );
}

#[tokio::test]
async fn test_build_requests_spot_vm_with_fixed_image() {
    let api = Arc::new(FakeCompute::default());
    let provisioner = VmProvisioner::new(api.clone(), ProvisionOptions::default());

    let result = provisioner.build(&request("arena"), &Progress::silent()).await;
    assert!(result.success);

    let vm = api.last_vm.lock().unwrap().clone().unwrap();
    let props = vm.properties;
    assert_eq!(props.hardware_profile.vm_size, "Standard_D2s_v3");
    assert_eq!(props.storage_profile.image_reference.publisher, "Canonical");
    assert_eq!(props.storage_profile.image_reference.sku, "22_04-lts-gen2");
    assert_eq!(props.priority.as_deref(), Some("Spot"));
    assert_eq!(props.eviction_policy.as_deref(), Some("Deallocate"));
    assert_eq!(props.billing_profile.unwrap().max_price, -1.0);

    let os = props.os_profile.unwrap();
    assert_eq!(os.admin_username, "ops");
    assert_eq!(os.admin_password.as_deref(), Some("Hunter2-Hunter2"));

    let nic = &props.network_profile.network_interfaces[0];
    assert!(nic.id.ends_with("/arena-nic"));
}

#[tokio::test]
async fn test_build_deletes_existing_group_first() {
    let api = Arc::new(FakeCompute {
        existing_group: true,
        ..Default::default()
    });
    let provisioner = VmProvisioner::new(api.clone(), ProvisionOptions::default());

    let result = provisioner.build(&request("arena"), &Progress::silent()).await;
    assert!(result.success);

    let calls = api.calls();
    assert_eq!(calls[0], "exists arena-rg");
    assert_eq!(calls[1], "delete arena-rg");
    assert_eq!(calls[2], "group arena-rg westeurope");
}

#[tokio::test]
async fn test_build_failure_returns_structured_result() {
    let api = Arc::new(FakeCompute {
        fail_vm: true,
        ..Default::default()
    });
    let provisioner = VmProvisioner::new(api.clone(), ProvisionOptions::default());
    let (progress, mut rx) = Progress::channel();

    let result = provisioner.build(&request("arena"), &progress).await;

    assert!(!result.success);
    assert!(result.vm.is_none());
    assert!(result.detail.unwrap().contains("SkuNotAvailable"));

    drop(progress);
    let mut last = None;
    while let Some(event) = rx.recv().await {
        last = Some(event.message);
    }
    assert!(last.unwrap().starts_with("Provisioning failed"));

    // Nothing is torn down after a failure
    assert!(!api.calls().iter().any(|c| c.starts_with("delete")));
}

#[tokio::test]
async fn test_build_rejects_unusable_name_before_any_call() {
    let api = Arc::new(FakeCompute::default());
    let provisioner = VmProvisioner::new(api.clone(), ProvisionOptions::default());

    let result = provisioner.build(&request("!!!"), &Progress::silent()).await;

    assert!(!result.success);
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_status_reports_power_state_or_explanation() {
    let api = Arc::new(FakeCompute::default());
    let provisioner = VmProvisioner::new(api.clone(), ProvisionOptions::default());

    assert_eq!(provisioner.status("Arena").await, "VM running");
    assert!(provisioner
        .status("missing")
        .await
        .starts_with("Status unavailable"));
    assert_eq!(api.calls()[0], "view arena-rg arena-vm");
}

#[tokio::test]
async fn test_destroy_deletes_resource_group() {
    let api = Arc::new(FakeCompute::default());
    let provisioner = VmProvisioner::new(api.clone(), ProvisionOptions::default());

    provisioner.destroy("Arena").await.unwrap();
    assert_eq!(api.calls(), vec!["delete arena-rg"]);
}
