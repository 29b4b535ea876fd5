//! Cloud control-plane client

use std::sync::Arc;
use std::time::Duration;

use arm_models::models::{
    AsyncOperation, InstanceView, NetworkInterface, PublicIpAddress, ResourceGroup, Subnet,
    VirtualMachine, VirtualNetwork,
};
use async_trait::async_trait;
use reqwest::{Method, Response, StatusCode};
use secrecy::ExposeSecret;
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, info};

use crate::authn::credential::TokenCredential;
use crate::errors::OpsError;
use crate::http::arm::{cloud_error, header_url, retry_after, ASYNC_OPERATION_HEADER};
use crate::http::client::HttpClient;

const RESOURCES_API_VERSION: &str = "2021-04-01";
const NETWORK_API_VERSION: &str = "2023-09-01";
const COMPUTE_API_VERSION: &str = "2024-03-01";

/// Resource operations used to provision a VM. Every create call returns
/// once the resource is fully provisioned.
#[async_trait]
pub trait ComputeApi: Send + Sync {
    async fn resource_group_exists(&self, name: &str) -> Result<bool, OpsError>;

    /// Delete a resource group and everything in it
    async fn delete_resource_group(&self, name: &str) -> Result<(), OpsError>;

    async fn create_resource_group(&self, name: &str, location: &str)
        -> Result<ResourceGroup, OpsError>;

    async fn create_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        network: &VirtualNetwork,
    ) -> Result<VirtualNetwork, OpsError>;

    async fn create_subnet(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
        subnet: &Subnet,
    ) -> Result<Subnet, OpsError>;

    async fn create_public_ip(
        &self,
        resource_group: &str,
        name: &str,
        address: &PublicIpAddress,
    ) -> Result<PublicIpAddress, OpsError>;

    async fn create_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<NetworkInterface, OpsError>;

    async fn create_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine, OpsError>;

    async fn vm_instance_view(&self, resource_group: &str, name: &str)
        -> Result<InstanceView, OpsError>;
}

/// Control-plane client options
#[derive(Debug, Clone)]
pub struct ArmOptions {
    pub endpoint: String,
    pub subscription_id: String,

    /// Long-running operation poll interval when the service gives no hint
    pub poll_interval: Duration,
}

impl Default for ArmOptions {
    fn default() -> Self {
        Self {
            endpoint: "https://management.azure.com".to_string(),
            subscription_id: String::new(),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Resource Manager REST client
pub struct ArmComputeClient {
    http: HttpClient,
    credential: Arc<dyn TokenCredential>,
    options: ArmOptions,
}

impl ArmComputeClient {
    pub fn new(options: ArmOptions, credential: Arc<dyn TokenCredential>) -> Result<Self, OpsError> {
        if options.subscription_id.is_empty() {
            return Err(OpsError::ConfigError(
                "cloud subscription_id must be set".to_string(),
            ));
        }

        Ok(Self {
            http: HttpClient::new(&options.endpoint)?,
            credential,
            options,
        })
    }

    async fn token(&self) -> Result<String, OpsError> {
        let token = self.credential.get_token().await?;
        Ok(token.secret.expose_secret().to_string())
    }

    fn group_path(&self, resource_group: &str) -> String {
        format!(
            "/subscriptions/{}/resourcegroups/{}",
            self.options.subscription_id, resource_group
        )
    }

    fn provider_path(&self, resource_group: &str, provider: &str, resource: &str) -> String {
        format!(
            "/subscriptions/{}/resourceGroups/{}/providers/{}/{}",
            self.options.subscription_id, resource_group, provider, resource
        )
    }

    fn with_version(path: &str, version: &str) -> String {
        format!("{}?api-version={}", path, version)
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, OpsError> {
        let token = self.token().await?;
        let response = self
            .http
            .arm_request::<()>(Method::GET, path, &token, None, &[])
            .await?;
        Ok(response.json().await?)
    }

    /// PUT a resource, wait for provisioning to finish and return its final
    /// representation
    async fn put_and_wait<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, OpsError> {
        let token = self.token().await?;
        let response = self
            .http
            .arm_request(Method::PUT, path, &token, Some(body), &[])
            .await?;
        self.wait_for_completion(response).await?;
        self.get(path).await
    }

    /// Follow a long-running operation to its end. Responses that are
    /// already final return immediately.
    async fn wait_for_completion(&self, response: Response) -> Result<(), OpsError> {
        let mut delay = retry_after(&response).unwrap_or(self.options.poll_interval);

        if let Some(url) = header_url(&response, ASYNC_OPERATION_HEADER) {
            loop {
                tokio::time::sleep(delay).await;
                let token = self.token().await?;
                let poll = self
                    .http
                    .arm_request::<()>(Method::GET, &url, &token, None, &[])
                    .await?;
                delay = retry_after(&poll).unwrap_or(self.options.poll_interval);

                let operation: AsyncOperation = poll.json().await?;
                debug!(status = %operation.status, "Polled async operation");
                if operation.is_terminal() {
                    if operation.is_success() {
                        return Ok(());
                    }
                    return Err(OpsError::CloudError(match operation.error {
                        Some(detail) => detail.to_string(),
                        None => format!("operation ended with status {}", operation.status),
                    }));
                }
            }
        }

        if response.status() == StatusCode::ACCEPTED {
            if let Some(url) = header_url(&response, reqwest::header::LOCATION.as_str()) {
                loop {
                    tokio::time::sleep(delay).await;
                    let token = self.token().await?;
                    let poll = self.http.send::<()>(Method::GET, &url, Some(&token), None).await?;
                    delay = retry_after(&poll).unwrap_or(self.options.poll_interval);

                    let status = poll.status();
                    if status == StatusCode::ACCEPTED {
                        continue;
                    }
                    if status.is_success() {
                        return Ok(());
                    }
                    let body = poll.text().await.unwrap_or_default();
                    return Err(cloud_error(status, &body));
                }
            }
        }

        Ok(())
    }
}

#[async_trait]
impl ComputeApi for ArmComputeClient {
    async fn resource_group_exists(&self, name: &str) -> Result<bool, OpsError> {
        let token = self.token().await?;
        let path = Self::with_version(&self.group_path(name), RESOURCES_API_VERSION);
        let response = self
            .http
            .arm_request::<()>(Method::HEAD, &path, &token, None, &[StatusCode::NOT_FOUND])
            .await?;
        Ok(response.status() != StatusCode::NOT_FOUND)
    }

    async fn delete_resource_group(&self, name: &str) -> Result<(), OpsError> {
        info!(resource_group = name, "Deleting resource group");
        let token = self.token().await?;
        let path = Self::with_version(&self.group_path(name), RESOURCES_API_VERSION);
        let response = self
            .http
            .arm_request::<()>(Method::DELETE, &path, &token, None, &[StatusCode::NOT_FOUND])
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(());
        }
        self.wait_for_completion(response).await?;
        info!(resource_group = name, "Resource group deleted");
        Ok(())
    }

    async fn create_resource_group(
        &self,
        name: &str,
        location: &str,
    ) -> Result<ResourceGroup, OpsError> {
        let path = Self::with_version(&self.group_path(name), RESOURCES_API_VERSION);
        let body = ResourceGroup {
            id: None,
            name: None,
            location: location.to_string(),
        };
        self.put_and_wait(&path, &body).await
    }

    async fn create_virtual_network(
        &self,
        resource_group: &str,
        name: &str,
        network: &VirtualNetwork,
    ) -> Result<VirtualNetwork, OpsError> {
        let path = self.provider_path(
            resource_group,
            "Microsoft.Network",
            &format!("virtualNetworks/{}", name),
        );
        self.put_and_wait(&Self::with_version(&path, NETWORK_API_VERSION), network)
            .await
    }

    async fn create_subnet(
        &self,
        resource_group: &str,
        network: &str,
        name: &str,
        subnet: &Subnet,
    ) -> Result<Subnet, OpsError> {
        let path = self.provider_path(
            resource_group,
            "Microsoft.Network",
            &format!("virtualNetworks/{}/subnets/{}", network, name),
        );
        self.put_and_wait(&Self::with_version(&path, NETWORK_API_VERSION), subnet)
            .await
    }

    async fn create_public_ip(
        &self,
        resource_group: &str,
        name: &str,
        address: &PublicIpAddress,
    ) -> Result<PublicIpAddress, OpsError> {
        let path = self.provider_path(
            resource_group,
            "Microsoft.Network",
            &format!("publicIPAddresses/{}", name),
        );
        self.put_and_wait(&Self::with_version(&path, NETWORK_API_VERSION), address)
            .await
    }

    async fn create_network_interface(
        &self,
        resource_group: &str,
        name: &str,
        nic: &NetworkInterface,
    ) -> Result<NetworkInterface, OpsError> {
        let path = self.provider_path(
            resource_group,
            "Microsoft.Network",
            &format!("networkInterfaces/{}", name),
        );
        self.put_and_wait(&Self::with_version(&path, NETWORK_API_VERSION), nic)
            .await
    }

    async fn create_virtual_machine(
        &self,
        resource_group: &str,
        name: &str,
        vm: &VirtualMachine,
    ) -> Result<VirtualMachine, OpsError> {
        let path = self.provider_path(
            resource_group,
            "Microsoft.Compute",
            &format!("virtualMachines/{}", name),
        );
        self.put_and_wait(&Self::with_version(&path, COMPUTE_API_VERSION), vm)
            .await
    }

    async fn vm_instance_view(
        &self,
        resource_group: &str,
        name: &str,
    ) -> Result<InstanceView, OpsError> {
        let path = self.provider_path(
            resource_group,
            "Microsoft.Compute",
            &format!("virtualMachines/{}/instanceView", name),
        );
        self.get(&Self::with_version(&path, COMPUTE_API_VERSION)).await
    }
}
