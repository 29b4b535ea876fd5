//! Resource naming

/// Normalize a user-supplied server name into a DNS-label-safe resource
/// prefix: trimmed, whitespace runs collapsed to `-`, anything other than
/// ASCII alphanumerics and `-` dropped, lowercased.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_whitespace = false;

    for c in raw.trim().chars() {
        if c.is_whitespace() {
            if !in_whitespace {
                out.push('-');
            }
            in_whitespace = true;
            continue;
        }
        in_whitespace = false;

        if c.is_ascii_alphanumeric() || c == '-' {
            out.push(c.to_ascii_lowercase());
        }
    }

    out
}

/// Names of every resource derived from one server name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceNames {
    pub base: String,
    pub resource_group: String,
    pub virtual_network: String,
    pub subnet: String,
    pub public_ip: String,
    pub network_interface: String,
    pub vm: String,
}

impl ResourceNames {
    pub fn for_server(name: &str) -> Self {
        let base = sanitize_name(name);
        Self {
            resource_group: format!("{}-rg", base),
            virtual_network: format!("{}-vnet", base),
            subnet: format!("{}-subnet", base),
            public_ip: format!("{}-ip", base),
            network_interface: format!("{}-nic", base),
            vm: format!("{}-vm", base),
            base,
        }
    }

    /// Public domain name assigned to the DNS label in `region`
    pub fn domain_name(&self, region: &str) -> String {
        format!("{}.{}.cloudapp.azure.com", self.base, region)
    }
}
