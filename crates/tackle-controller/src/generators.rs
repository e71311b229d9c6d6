//! Synthetic resources for tests and demos
//!
//! Addresses come from the documentation ranges of RFC 5737 so generated
//! hardware never collides with a real network.

use crate::error::{ControllerError, Result};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Mutex, OnceLock};
use tackle_crd::{DhcpSpec, Hardware, HardwareSpec, InterfaceSpec, IpSpec, Template};
use uuid::Uuid;

/// Minimal single-action template
pub const HELLO_WORLD_TEMPLATE: &str = r#"version: "0.1"
name: hello_world_workflow
global_timeout: 600
tasks:
  - name: "hello world"
    worker: "{{.device_1}}"
    actions:
      - name: "hello_world"
        image: hello-world
        timeout: 60"#;

/// Documentation networks handed out round-robin by `generate_hardware`
pub const TEST_CIDRS: [&str; 3] = ["192.0.2.0/24", "198.51.100.0/24", "203.0.113.0/24"];

/// An address with the netmask and gateway of its network
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Allocation {
    pub address: Ipv4Addr,
    pub netmask: Ipv4Addr,
    pub gateway: Ipv4Addr,
}

/// Hands out sequential host addresses per network
///
/// The first host of each network is its gateway; allocation starts
/// right after it.
#[derive(Debug, Default)]
pub struct IpAllocator {
    last: Mutex<HashMap<String, Ipv4Addr>>,
}

impl IpAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self, cidr: &str) -> Result<Allocation> {
        let (network, prefix) = parse_cidr(cidr)?;
        let mask = if prefix == 0 {
            0
        } else {
            u32::MAX << (32 - prefix)
        };
        let base = u32::from(network) & mask;
        let gateway = base + 1;
        let broadcast = base | !mask;

        let mut last = self
            .last
            .lock()
            .map_err(|_| ControllerError::Generator("ip allocator poisoned".into()))?;
        let previous = last
            .get(cidr)
            .map(|ip| u32::from(*ip))
            .unwrap_or(gateway);
        let next = previous + 1;
        if next >= broadcast {
            return Err(ControllerError::Generator(format!(
                "network {} is exhausted",
                cidr
            )));
        }
        last.insert(cidr.to_string(), Ipv4Addr::from(next));

        Ok(Allocation {
            address: Ipv4Addr::from(next),
            netmask: Ipv4Addr::from(mask),
            gateway: Ipv4Addr::from(gateway),
        })
    }
}

fn parse_cidr(cidr: &str) -> Result<(Ipv4Addr, u32)> {
    let invalid = || ControllerError::Generator(format!("invalid cidr: {}", cidr));
    let (address, prefix) = cidr.split_once('/').ok_or_else(invalid)?;
    let address: Ipv4Addr = address.parse().map_err(|_| invalid())?;
    let prefix: u32 = prefix.parse().map_err(|_| invalid())?;
    // Need room for a gateway and at least one host
    if prefix > 30 {
        return Err(invalid());
    }
    Ok((address, prefix))
}

/// Random MAC addresses, never repeated by one generator
///
/// Addresses are unicast and locally administered.
#[derive(Debug, Default)]
pub struct MacGenerator {
    issued: Mutex<HashSet<[u8; 6]>>,
}

impl MacGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next(&self) -> Result<String> {
        let mut issued = self
            .issued
            .lock()
            .map_err(|_| ControllerError::Generator("mac generator poisoned".into()))?;
        let mut rng = rand::thread_rng();
        loop {
            let mut mac = [0u8; 6];
            rng.fill(&mut mac);
            mac[0] &= !0x01;
            mac[0] |= 0x02;
            if issued.insert(mac) {
                return Ok(format_mac(&mac));
            }
        }
    }
}

fn format_mac(mac: &[u8; 6]) -> String {
    mac.iter()
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(":")
}

fn ip_allocator() -> &'static IpAllocator {
    static ALLOCATOR: OnceLock<IpAllocator> = OnceLock::new();
    ALLOCATOR.get_or_init(IpAllocator::new)
}

fn mac_generator() -> &'static MacGenerator {
    static GENERATOR: OnceLock<MacGenerator> = OnceLock::new();
    GENERATOR.get_or_init(MacGenerator::new)
}

/// Hardware with a fresh external id and `num_interfaces` DHCP interfaces
///
/// Interfaces cycle through `TEST_CIDRS`. Addresses and MACs are unique
/// for the lifetime of the process.
pub fn generate_hardware(name: &str, num_interfaces: usize) -> Result<Hardware> {
    let mut spec = HardwareSpec::new(Uuid::new_v4().to_string());
    for i in 0..num_interfaces {
        let cidr = TEST_CIDRS[i % TEST_CIDRS.len()];
        let allocation = ip_allocator().next(cidr)?;
        let dhcp = DhcpSpec::new(mac_generator().next()?).with_ip(IpSpec {
            address: allocation.address.to_string(),
            netmask: Some(allocation.netmask.to_string()),
            gateway: Some(allocation.gateway.to_string()),
        });
        spec = spec.with_interface(InterfaceSpec::new(dhcp));
    }
    Ok(Hardware::new(name, spec))
}

/// Template named `name` with body `data`
pub fn generate_template(name: &str, data: &str) -> Template {
    Template::new(name, data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocator_starts_after_gateway() {
        let allocator = IpAllocator::new();

        let first = allocator.next("192.0.2.0/24").unwrap();
        assert_eq!(first.address, Ipv4Addr::new(192, 0, 2, 2));
        assert_eq!(first.gateway, Ipv4Addr::new(192, 0, 2, 1));
        assert_eq!(first.netmask, Ipv4Addr::new(255, 255, 255, 0));

        let second = allocator.next("192.0.2.0/24").unwrap();
        assert_eq!(second.address, Ipv4Addr::new(192, 0, 2, 3));

        // Networks are tracked independently
        let other = allocator.next("198.51.100.0/24").unwrap();
        assert_eq!(other.address, Ipv4Addr::new(198, 51, 100, 2));
    }

    #[test]
    fn test_allocator_exhaustion_and_bad_input() {
        let allocator = IpAllocator::new();
        assert!(allocator.next("192.0.2.0/30").is_ok());
        assert!(allocator.next("192.0.2.0/30").is_err());

        assert!(allocator.next("not-a-cidr").is_err());
        assert!(allocator.next("192.0.2.0/31").is_err());
    }

    #[test]
    fn test_macs_are_unique_local_unicast() {
        let generator = MacGenerator::new();
        let mut seen = HashSet::new();
        for _ in 0..256 {
            let mac = generator.next().unwrap();
            let first = u8::from_str_radix(&mac[0..2], 16).unwrap();
            assert_eq!(first & 0x01, 0);
            assert_eq!(first & 0x02, 0x02);
            assert!(seen.insert(mac));
        }
    }

    #[test]
    fn test_generated_hardware_is_valid() {
        let hardware = generate_hardware("hw-1", 4).unwrap();
        assert_eq!(hardware.spec.interfaces.len(), 4);
        assert!(hardware.remote_id().is_some());
        hardware.validate().unwrap();

        let gateways: Vec<String> = hardware
            .spec
            .interfaces
            .iter()
            .filter_map(|iface| iface.dhcp.as_ref()?.ip.as_ref()?.gateway.clone())
            .collect();
        assert_eq!(gateways[0], "192.0.2.1");
        assert_eq!(gateways[1], "198.51.100.1");
        assert_eq!(gateways[2], "203.0.113.1");
        assert_eq!(gateways[3], "192.0.2.1");
    }

    #[test]
    fn test_hello_world_template() {
        let template = generate_template("tpl-1", HELLO_WORLD_TEMPLATE);
        template.validate().unwrap();

        let body: tackle_crd::TemplateBody = serde_yaml::from_str(&template.spec.data).unwrap();
        assert_eq!(body.name, "hello_world_workflow");
        assert_eq!(body.actions().count(), 1);
    }
}
