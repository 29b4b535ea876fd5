//! Deployment models

use serde::{Deserialize, Serialize};

/// Provider-assigned identifiers of everything created for one VM
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VmHandle {
    pub resource_group: String,
    pub virtual_network_id: String,
    pub subnet_id: String,
    pub public_ip_id: String,
    pub network_interface_id: String,
    pub vm_id: String,
    pub vm_name: String,

    /// Public domain name, `{name}.{region}.{provider domain}`
    pub domain_name: String,
}

/// Terminal outcome of provisioning or of a whole deployment run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentResult {
    pub success: bool,

    /// Human-readable summary
    pub message: String,

    /// Captured failure detail
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm: Option<VmHandle>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain_name: Option<String>,
}

impl DeploymentResult {
    pub fn succeeded(message: impl Into<String>, vm: VmHandle) -> Self {
        let domain_name = Some(vm.domain_name.clone());
        Self {
            success: true,
            message: message.into(),
            detail: None,
            vm: Some(vm),
            domain_name,
        }
    }

    pub fn failed(message: impl Into<String>, detail: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            detail: Some(detail.into()),
            vm: None,
            domain_name: None,
        }
    }

    /// Keep the VM reference of an earlier stage on a failed result
    pub fn with_vm(mut self, vm: Option<VmHandle>) -> Self {
        self.domain_name = vm.as_ref().map(|v| v.domain_name.clone());
        self.vm = vm;
        self
    }
}

/// Progress message level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressLevel {
    Info,
    Warn,
    Error,
}

/// A single human-readable progress/status line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub level: ProgressLevel,
    pub message: String,
}
