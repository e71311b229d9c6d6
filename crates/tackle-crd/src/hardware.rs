//! Hardware resource types
//!
//! These types are compatible with Tinkerbell's Hardware format
//! (tinkerbell.org/v1alpha1). The controller only needs `spec.id`, the
//! stable external id the remote service uses to target a worker; the
//! network description is carried for tooling and generated test data.

use crate::{CrdError, ObjectMeta, Result, TypeMeta};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::str::FromStr;

/// Hardware resource representing a physical or virtual machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Hardware {
    /// Type metadata (apiVersion, kind)
    #[serde(flatten)]
    pub type_meta: TypeMeta,

    /// Object metadata (name, namespace, labels, etc.)
    pub metadata: ObjectMeta,

    /// Hardware specification
    pub spec: HardwareSpec,
}

impl Hardware {
    /// Create a new Hardware resource
    pub fn new(name: impl Into<String>, spec: HardwareSpec) -> Self {
        Self {
            type_meta: TypeMeta::hardware(),
            metadata: ObjectMeta::new(name),
            spec,
        }
    }

    /// External id known to the remote service
    pub fn remote_id(&self) -> Option<&str> {
        Some(self.spec.id.as_str()).filter(|id| !id.is_empty())
    }

    /// Validate the hardware resource
    pub fn validate(&self) -> Result<()> {
        if self.metadata.name.is_empty() {
            return Err(CrdError::MissingField("metadata.name".to_string()));
        }

        if self.spec.id.is_empty() {
            return Err(CrdError::MissingField("spec.id".to_string()));
        }

        for (i, iface) in self.spec.interfaces.iter().enumerate() {
            if let Some(dhcp) = &iface.dhcp {
                dhcp.validate().map_err(|e| CrdError::InvalidFieldValue {
                    field: format!("spec.interfaces[{}].dhcp", i),
                    message: e.to_string(),
                })?;
            }
        }

        Ok(())
    }
}

/// Hardware specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct HardwareSpec {
    /// Stable external id used by the remote service
    #[serde(default)]
    pub id: String,

    /// Instance metadata (ID, hostname, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<InstanceMetadata>,

    /// Disk specifications
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub disks: Vec<DiskSpec>,

    /// Network interface specifications
    #[serde(default)]
    pub interfaces: Vec<InterfaceSpec>,
}

impl HardwareSpec {
    /// Create a new hardware spec with an external id and no interfaces
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Builder method to add an interface
    pub fn with_interface(mut self, iface: InterfaceSpec) -> Self {
        self.interfaces.push(iface);
        self
    }
}

/// Instance metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceMetadata {
    pub instance: Instance,
}

/// Instance identification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    /// Unique instance identifier
    pub id: String,

    /// Instance hostname
    pub hostname: String,
}

/// Disk specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiskSpec {
    /// Device path (e.g., "/dev/sda", "/dev/nvme0n1")
    pub device: String,
}

/// Network interface specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct InterfaceSpec {
    /// DHCP configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dhcp: Option<DhcpSpec>,

    /// Netboot configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netboot: Option<NetbootSpec>,
}

impl InterfaceSpec {
    /// Create an interface with a MAC address and workflows allowed
    pub fn new(dhcp: DhcpSpec) -> Self {
        Self {
            dhcp: Some(dhcp),
            netboot: Some(NetbootSpec {
                allow_pxe: Some(true),
                allow_workflow: Some(true),
            }),
        }
    }
}

/// DHCP configuration for an interface
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DhcpSpec {
    /// MAC address (required)
    pub mac: String,

    /// Architecture (e.g., "x86_64", "aarch64")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,

    /// Hostname to assign via DHCP
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,

    /// IP address configuration
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<IpSpec>,

    /// DNS name servers
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub name_servers: Vec<String>,
}

impl DhcpSpec {
    /// Create a new DHCP spec with just a MAC address
    pub fn new(mac: impl Into<String>) -> Self {
        Self {
            mac: mac.into(),
            arch: None,
            hostname: None,
            ip: None,
            name_servers: Vec::new(),
        }
    }

    /// Validate the DHCP spec
    pub fn validate(&self) -> Result<()> {
        if self.mac.is_empty() {
            return Err(CrdError::InvalidMacAddress("MAC address is empty".to_string()));
        }

        // 6 bytes in hex, separated by colons or dashes
        let mac_clean = self.mac.replace([':', '-'], "");
        if mac_clean.len() != 12 || !mac_clean.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CrdError::InvalidMacAddress(self.mac.clone()));
        }

        if let Some(ip) = &self.ip {
            for address in [Some(&ip.address), ip.gateway.as_ref(), ip.netmask.as_ref()]
                .into_iter()
                .flatten()
            {
                if IpAddr::from_str(address).is_err() {
                    return Err(CrdError::InvalidIpAddress(address.clone()));
                }
            }
        }

        Ok(())
    }

    /// Builder method to set the IP configuration
    pub fn with_ip(mut self, ip: IpSpec) -> Self {
        self.ip = Some(ip);
        self
    }
}

/// IP address specification
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IpSpec {
    /// IP address
    pub address: String,

    /// Gateway address
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,

    /// Network mask (e.g., "255.255.255.0")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub netmask: Option<String>,
}

/// Netboot configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct NetbootSpec {
    /// Allow PXE boot
    #[serde(rename = "allowPXE", skip_serializing_if = "Option::is_none")]
    pub allow_pxe: Option<bool>,

    /// Allow workflow execution
    #[serde(rename = "allowWorkflow", skip_serializing_if = "Option::is_none")]
    pub allow_workflow: Option<bool>,
}
