//! VM provisioning
//!
//! Builds the full resource stack for one game server: resource group,
//! virtual network, subnet, public IP with a DNS label, network interface and
//! a Spot VM. A resource group left over from an earlier build under the same
//! name is deleted first, so `build` always starts from a clean slate.

use std::str::FromStr;
use std::sync::Arc;

use arm_models::models::{
    AddressSpace, BillingProfile, DnsSettings, HardwareProfile, ImageReference, IpConfiguration,
    IpConfigurationProperties, LinuxConfiguration, ManagedDisk, NetworkInterface,
    NetworkInterfaceProperties, NetworkInterfaceReference, NetworkInterfaceReferenceProperties,
    NetworkProfile, OsDisk, OsProfile, PublicIpAddress, PublicIpAddressProperties, Sku,
    StorageProfile, SubResource, Subnet, SubnetProperties, VirtualMachine,
    VirtualMachineProperties, VirtualNetwork, VirtualNetworkProperties,
};
use ipnet::Ipv4Net;
use tracing::{info, instrument};

use crate::cloud::arm::ComputeApi;
use crate::cloud::naming::ResourceNames;
use crate::errors::OpsError;
use crate::models::deployment::{DeploymentResult, VmHandle};
use crate::progress::Progress;

/// Ubuntu 22.04 LTS, generation 2
pub fn default_image() -> ImageReference {
    ImageReference {
        publisher: "Canonical".to_string(),
        offer: "0001-com-ubuntu-server-jammy".to_string(),
        sku: "22_04-lts-gen2".to_string(),
        version: "latest".to_string(),
    }
}

/// Provisioning options
#[derive(Debug, Clone)]
pub struct ProvisionOptions {
    pub vm_size: String,
    pub image: ImageReference,
    pub address_space: String,
    pub subnet_prefix: String,

    /// Spot price cap in USD/hour, `-1` for the on-demand price
    pub spot_max_price: f64,
}

impl Default for ProvisionOptions {
    fn default() -> Self {
        Self {
            vm_size: "Standard_D2s_v3".to_string(),
            image: default_image(),
            address_space: "10.0.0.0/16".to_string(),
            subnet_prefix: "10.0.0.0/24".to_string(),
            spot_max_price: -1.0,
        }
    }
}

impl ProvisionOptions {
    /// The subnet must parse and sit inside the network block
    pub fn validate(&self) -> Result<(), OpsError> {
        let network = Ipv4Net::from_str(&self.address_space).map_err(|e| {
            OpsError::InvalidArgument(format!("address space {}: {}", self.address_space, e))
        })?;
        let subnet = Ipv4Net::from_str(&self.subnet_prefix).map_err(|e| {
            OpsError::InvalidArgument(format!("subnet prefix {}: {}", self.subnet_prefix, e))
        })?;

        if !network.contains(&subnet) {
            return Err(OpsError::InvalidArgument(format!(
                "subnet {} is outside network {}",
                subnet, network
            )));
        }
        Ok(())
    }
}

/// Input to [`VmProvisioner::build`]
#[derive(Debug, Clone)]
pub struct BuildRequest {
    pub name: String,
    pub admin_user: String,
    pub admin_password: String,
    pub region: String,
}

pub struct VmProvisioner {
    api: Arc<dyn ComputeApi>,
    options: ProvisionOptions,
}

impl VmProvisioner {
    pub fn new(api: Arc<dyn ComputeApi>, options: ProvisionOptions) -> Self {
        Self { api, options }
    }

    /// Provision a VM and everything it needs. Failures are returned as a
    /// failed [`DeploymentResult`], never as an error.
    #[instrument(skip(self, request, progress), fields(name = %request.name))]
    pub async fn build(&self, request: &BuildRequest, progress: &Progress) -> DeploymentResult {
        match self.try_build(request, progress).await {
            Ok(vm) => {
                progress.info(format!("VM ready at {}", vm.domain_name));
                DeploymentResult::succeeded(format!("Provisioned {}", vm.vm_name), vm)
            }
            Err(e) => {
                progress.error(format!("Provisioning failed: {}", e));
                DeploymentResult::failed(format!("Provisioning of {} failed", request.name), e.to_string())
            }
        }
    }

    async fn try_build(&self, request: &BuildRequest, progress: &Progress) -> Result<VmHandle, OpsError> {
        self.options.validate()?;
        if request.admin_user.trim().is_empty() || request.admin_password.is_empty() {
            return Err(OpsError::InvalidArgument(
                "admin user and password are required".to_string(),
            ));
        }

        let names = ResourceNames::for_server(&request.name);
        if names.base.is_empty() {
            return Err(OpsError::InvalidArgument(format!(
                "server name {:?} has no usable characters",
                request.name
            )));
        }
        let region = request.region.as_str();

        if self.api.resource_group_exists(&names.resource_group).await? {
            progress.warn(format!(
                "Resource group {} already exists, deleting it",
                names.resource_group
            ));
            self.api.delete_resource_group(&names.resource_group).await?;
        }

        progress.info(format!("Creating resource group {}", names.resource_group));
        self.api
            .create_resource_group(&names.resource_group, region)
            .await?;

        progress.info(format!("Creating virtual network {}", names.virtual_network));
        let network = self
            .api
            .create_virtual_network(
                &names.resource_group,
                &names.virtual_network,
                &VirtualNetwork {
                    id: None,
                    location: region.to_string(),
                    properties: VirtualNetworkProperties {
                        address_space: AddressSpace {
                            address_prefixes: vec![self.options.address_space.clone()],
                        },
                        provisioning_state: None,
                    },
                },
            )
            .await?;

        progress.info(format!("Creating subnet {}", names.subnet));
        let subnet = self
            .api
            .create_subnet(
                &names.resource_group,
                &names.virtual_network,
                &names.subnet,
                &Subnet {
                    id: None,
                    properties: SubnetProperties {
                        address_prefix: self.options.subnet_prefix.clone(),
                        provisioning_state: None,
                    },
                },
            )
            .await?;
        let subnet_id = created_id(subnet.id, "subnet")?;

        progress.info(format!("Creating public IP {}", names.public_ip));
        let public_ip = self
            .api
            .create_public_ip(
                &names.resource_group,
                &names.public_ip,
                &PublicIpAddress {
                    id: None,
                    location: region.to_string(),
                    sku: Some(Sku {
                        name: "Standard".to_string(),
                    }),
                    properties: PublicIpAddressProperties {
                        public_ip_allocation_method: "Static".to_string(),
                        public_ip_address_version: "IPv4".to_string(),
                        dns_settings: Some(DnsSettings {
                            domain_name_label: names.base.clone(),
                            fqdn: None,
                        }),
                        ip_address: None,
                        provisioning_state: None,
                    },
                },
            )
            .await?;
        let domain_name = public_ip
            .properties
            .dns_settings
            .as_ref()
            .and_then(|dns| dns.fqdn.clone())
            .unwrap_or_else(|| names.domain_name(region));
        let public_ip_id = created_id(public_ip.id, "public IP")?;

        progress.info(format!("Creating network interface {}", names.network_interface));
        let nic = self
            .api
            .create_network_interface(
                &names.resource_group,
                &names.network_interface,
                &NetworkInterface {
                    id: None,
                    location: region.to_string(),
                    properties: NetworkInterfaceProperties {
                        enable_accelerated_networking: true,
                        ip_configurations: vec![IpConfiguration {
                            name: format!("{}-ipconfig", names.base),
                            properties: IpConfigurationProperties {
                                subnet: SubResource::new(subnet_id.clone()),
                                public_ip_address: Some(SubResource::new(public_ip_id.clone())),
                                private_ip_allocation_method: "Dynamic".to_string(),
                            },
                        }],
                        provisioning_state: None,
                    },
                },
            )
            .await?;
        let nic_id = created_id(nic.id, "network interface")?;

        progress.info(format!(
            "Creating {} Spot VM {}",
            self.options.vm_size, names.vm
        ));
        let vm = self
            .api
            .create_virtual_machine(
                &names.resource_group,
                &names.vm,
                &self.vm_definition(&names, request, &nic_id),
            )
            .await?;

        let handle = VmHandle {
            resource_group: names.resource_group.clone(),
            virtual_network_id: network.id.unwrap_or_default(),
            subnet_id,
            public_ip_id,
            network_interface_id: nic_id,
            vm_id: vm.id.unwrap_or_default(),
            vm_name: names.vm.clone(),
            domain_name,
        };
        info!(vm = %handle.vm_name, domain = %handle.domain_name, "VM provisioned");
        Ok(handle)
    }

    fn vm_definition(
        &self,
        names: &ResourceNames,
        request: &BuildRequest,
        nic_id: &str,
    ) -> VirtualMachine {
        VirtualMachine {
            id: None,
            location: request.region.clone(),
            properties: VirtualMachineProperties {
                hardware_profile: HardwareProfile {
                    vm_size: self.options.vm_size.clone(),
                },
                storage_profile: StorageProfile {
                    image_reference: self.options.image.clone(),
                    os_disk: OsDisk {
                        create_option: "FromImage".to_string(),
                        delete_option: Some("Delete".to_string()),
                        managed_disk: Some(ManagedDisk {
                            storage_account_type: "Standard_LRS".to_string(),
                        }),
                    },
                },
                os_profile: Some(OsProfile {
                    computer_name: names.base.clone(),
                    admin_username: request.admin_user.clone(),
                    admin_password: Some(request.admin_password.clone()),
                    linux_configuration: Some(LinuxConfiguration {
                        disable_password_authentication: false,
                    }),
                }),
                network_profile: NetworkProfile {
                    network_interfaces: vec![NetworkInterfaceReference {
                        id: nic_id.to_string(),
                        properties: Some(NetworkInterfaceReferenceProperties { primary: true }),
                    }],
                },
                priority: Some("Spot".to_string()),
                eviction_policy: Some("Deallocate".to_string()),
                billing_profile: Some(BillingProfile {
                    max_price: self.options.spot_max_price,
                }),
                provisioning_state: None,
            },
        }
    }

    /// Power state of the VM built for `name`, or a description of why it
    /// could not be read
    pub async fn status(&self, name: &str) -> String {
        let names = ResourceNames::for_server(name);
        match self
            .api
            .vm_instance_view(&names.resource_group, &names.vm)
            .await
        {
            Ok(view) => match view.power_state() {
                Some(state) => state
                    .display_status
                    .clone()
                    .unwrap_or_else(|| state.code.clone()),
                None => "Power state unavailable".to_string(),
            },
            Err(e) => format!("Status unavailable: {}", e),
        }
    }

    /// Delete everything built for `name`
    pub async fn destroy(&self, name: &str) -> Result<(), OpsError> {
        let names = ResourceNames::for_server(name);
        self.api.delete_resource_group(&names.resource_group).await
    }
}

fn created_id(id: Option<String>, kind: &str) -> Result<String, OpsError> {
    id.filter(|id| !id.is_empty())
        .ok_or_else(|| OpsError::ProvisionError(format!("{} was created without an id", kind)))
}
