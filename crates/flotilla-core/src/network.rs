use crate::concurrency::ResourceLocks;
use crate::prompt::{ask_until, Prompt};
use crate::CoreError;
use flotilla_runtime::{
    ConnectOptions, HostInterface, HostInterfaces, NetworkCreateOptions, PortPublication,
    ProviderDriver,
};
use flotilla_schema::{
    canonical_subnet, subnet_contains, MachineConfig, NetworkSpec, PrivateNetwork, PublicNetwork,
};
use ipnetwork::IpNetwork;
use std::fmt::Write as _;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Resource guarding network creation and connection.
pub const NETWORK_LOCK: &str = "network-create";
/// Shared network used for DHCP attachments without addressing.
pub const DEFAULT_NETWORK: &str = "default";

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network '{0}' is not defined by the provider")]
    NameUndefined(String),
    #[error("address {ip} is not within subnet {subnet} of network '{network}'")]
    AddressInvalid {
        ip: IpAddr,
        network: String,
        subnet: IpNetwork,
    },
    #[error("subnet {subnet} is not within subnet {existing} of network '{network}'")]
    SubnetInvalid {
        subnet: IpNetwork,
        network: String,
        existing: IpNetwork,
    },
    #[error("machine '{machine}': private network requires an ip address or a subnet")]
    IpAddressRequired { machine: String },
    #[error("machine '{machine}': no usable host interface to bridge to (requested: {requested})")]
    NoBridgeInterface { machine: String, requested: String },
    #[error("gateway {gateway} is not within subnet {subnet}")]
    GatewayInvalid { gateway: IpAddr, subnet: IpNetwork },
    #[error("ip range {range} is not within subnet {subnet}")]
    IpRangeInvalid { range: IpNetwork, subnet: IpNetwork },
    #[error("{addr}/{prefix} is not a valid subnet")]
    PrefixInvalid { addr: IpAddr, prefix: u8 },
}

/// A network a machine will be attached to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedNetwork {
    pub name: String,
    /// Set when the network does not exist yet.
    pub create: Option<NetworkCreateOptions>,
    pub connect: ConnectOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkPlan {
    pub networks: Vec<PlannedNetwork>,
    pub ports: Vec<PortPublication>,
}

/// Derives concrete networks from declarations and realizes them through
/// the driver.
pub struct NetworkProvisioner<'a> {
    driver: &'a dyn ProviderDriver,
    prompt: &'a dyn Prompt,
    interfaces: &'a dyn HostInterfaces,
    locks: &'a ResourceLocks,
}

impl<'a> NetworkProvisioner<'a> {
    pub fn new(
        driver: &'a dyn ProviderDriver,
        prompt: &'a dyn Prompt,
        interfaces: &'a dyn HostInterfaces,
        locks: &'a ResourceLocks,
    ) -> Self {
        Self {
            driver,
            prompt,
            interfaces,
            locks,
        }
    }

    pub fn plan(&self, machine: &MachineConfig) -> Result<NetworkPlan, CoreError> {
        let mut plan = NetworkPlan::default();
        for spec in &machine.networks {
            match spec {
                NetworkSpec::Private(net) => {
                    plan.networks.push(self.plan_private(&machine.name, net)?);
                }
                NetworkSpec::Public(net) => {
                    plan.networks.push(self.plan_public(&machine.name, net)?);
                }
                NetworkSpec::ForwardedPort(port) => plan.ports.push(PortPublication {
                    host_ip: port.host_ip,
                    host: port.host,
                    guest: port.guest,
                    protocol: port.protocol,
                }),
            }
        }
        Ok(plan)
    }

    pub fn plan_private(
        &self,
        machine: &str,
        net: &PrivateNetwork,
    ) -> Result<PlannedNetwork, CoreError> {
        let connect = ConnectOptions {
            ip: net.ip,
            extra: net.extra.clone(),
        };

        if let Some(name) = &net.name {
            if !self.driver.existing_named_network(name)? {
                return Err(NetworkError::NameUndefined(name.clone()).into());
            }
            return self.reuse(name, net, connect);
        }

        if net.dhcp && net.ip.is_none() && net.subnet.is_none() {
            let exists = self.driver.existing_named_network(DEFAULT_NETWORK)?;
            return Ok(PlannedNetwork {
                name: DEFAULT_NETWORK.to_owned(),
                create: (!exists).then(NetworkCreateOptions::default),
                connect: ConnectOptions {
                    ip: None,
                    extra: net.extra.clone(),
                },
            });
        }

        let anchor = match (net.ip, net.subnet) {
            (Some(ip), _) => ip,
            (None, Some(subnet)) => subnet.network(),
            (None, None) => {
                return Err(NetworkError::IpAddressRequired {
                    machine: machine.to_owned(),
                }
                .into());
            }
        };
        let default_prefix = if anchor.is_ipv4() { 24 } else { 64 };

        let subnet = match net.declared_subnet() {
            Some(subnet) => subnet,
            None => {
                if let Some(existing) = self.driver.network_containing_address(anchor)? {
                    let managed = self
                        .driver
                        .inspect_network(&existing)?
                        .is_some_and(|info| info.managed);
                    if !managed {
                        warn!(
                            "machine '{machine}': reusing network '{existing}' for {anchor}, \
                             which was not created by flotilla"
                        );
                    }
                    return self.reuse(&existing, net, connect);
                }
                IpNetwork::new(anchor, default_prefix)
                    .map(canonical_subnet)
                    .map_err(|_| NetworkError::PrefixInvalid {
                        addr: anchor,
                        prefix: default_prefix,
                    })?
            }
        };
        let name = format!("network_{subnet}");
        if let Some(ip) = net.ip {
            if !subnet.contains(ip) {
                return Err(NetworkError::AddressInvalid {
                    ip,
                    network: name,
                    subnet,
                }
                .into());
            }
        }

        if let Some(existing) = self.driver.network_defined(subnet)? {
            debug!("subnet {subnet} already served by network '{existing}'");
            return self.reuse(&existing, net, connect);
        }
        if self.driver.existing_named_network(&name)? {
            return self.reuse(&name, net, connect);
        }
        Ok(PlannedNetwork {
            name,
            create: Some(NetworkCreateOptions {
                subnet: Some(subnet),
                ..NetworkCreateOptions::default()
            }),
            connect,
        })
    }

    /// Attach to an existing network, checking explicit addressing fits it.
    fn reuse(
        &self,
        name: &str,
        net: &PrivateNetwork,
        connect: ConnectOptions,
    ) -> Result<PlannedNetwork, CoreError> {
        let info = self
            .driver
            .inspect_network(name)?
            .ok_or_else(|| NetworkError::NameUndefined(name.to_owned()))?;
        if let Some(first) = info.subnets.first().copied() {
            if let Some(ip) = net.ip {
                if !info.subnets.iter().any(|s| s.contains(ip)) {
                    return Err(NetworkError::AddressInvalid {
                        ip,
                        network: name.to_owned(),
                        subnet: first,
                    }
                    .into());
                }
            }
            if let Some(subnet) = net.declared_subnet() {
                if !info.subnets.iter().any(|s| subnet_contains(*s, subnet)) {
                    return Err(NetworkError::SubnetInvalid {
                        subnet,
                        network: name.to_owned(),
                        existing: first,
                    }
                    .into());
                }
            }
        }
        Ok(PlannedNetwork {
            name: name.to_owned(),
            create: None,
            connect,
        })
    }

    pub fn plan_public(
        &self,
        machine: &str,
        net: &PublicNetwork,
    ) -> Result<PlannedNetwork, CoreError> {
        let candidates: Vec<HostInterface> = self
            .interfaces
            .interfaces()?
            .into_iter()
            .filter(|i| !i.is_loopback() && !i.is_link_local())
            .filter(|i| net.bridge.is_empty() || net.bridge.contains(&i.name))
            .filter(|i| net.ip.is_none_or(|ip| ip.is_ipv4() == i.addr.is_ipv4()))
            .collect();

        let iface = match candidates.as_slice() {
            [] => {
                let requested = if net.bridge.is_empty() {
                    "any".to_owned()
                } else {
                    net.bridge.join(", ")
                };
                return Err(NetworkError::NoBridgeInterface {
                    machine: machine.to_owned(),
                    requested,
                }
                .into());
            }
            [only] => only.clone(),
            many => self.choose_interface(machine, many)?,
        };
        let subnet = iface.network().ok_or(NetworkError::PrefixInvalid {
            addr: iface.addr,
            prefix: iface.prefix,
        })?;
        let name = net
            .name
            .clone()
            .unwrap_or_else(|| format!("network_public_{}", iface.name));
        let connect = ConnectOptions {
            ip: net.ip,
            extra: net.extra.clone(),
        };

        if let Some(ip) = net.ip {
            if !subnet.contains(ip) {
                return Err(NetworkError::AddressInvalid {
                    ip,
                    network: name,
                    subnet,
                }
                .into());
            }
        }

        if self.driver.existing_named_network(&name)? {
            debug!("public network '{name}' already exists");
            return Ok(PlannedNetwork {
                name,
                create: None,
                connect,
            });
        }

        let gateway = match net.gateway {
            Some(gateway) if subnet.contains(gateway) => gateway,
            Some(gateway) => return Err(NetworkError::GatewayInvalid { gateway, subnet }.into()),
            None => self.ask_gateway(&name, subnet)?,
        };
        let ip_range = match net.ip_range {
            Some(range) if subnet_contains(subnet, range) => range,
            Some(range) => return Err(NetworkError::IpRangeInvalid { range, subnet }.into()),
            None => self.ask_ip_range(&name, subnet)?,
        };

        info!("public network '{name}' bridges {} ({subnet})", iface.name);
        Ok(PlannedNetwork {
            name,
            create: Some(NetworkCreateOptions {
                subnet: Some(subnet),
                gateway: Some(gateway),
                ip_range: Some(ip_range),
                driver: Some("macvlan".to_owned()),
                options: [("parent".to_owned(), iface.name.clone())].into(),
            }),
            connect,
        })
    }

    fn choose_interface(
        &self,
        machine: &str,
        candidates: &[HostInterface],
    ) -> Result<HostInterface, CoreError> {
        let mut question = format!("machine '{machine}': available bridged network interfaces:\n");
        for (i, iface) in candidates.iter().enumerate() {
            let _ = writeln!(
                question,
                "{}) {} ({}/{})",
                i + 1,
                iface.name,
                iface.addr,
                iface.prefix
            );
        }
        question.push_str("Which interface should the network bridge to?");
        ask_until(self.prompt, &question, "1", |answer| {
            if let Ok(n) = answer.parse::<usize>() {
                if let Some(iface) = n.checked_sub(1).and_then(|i| candidates.get(i)) {
                    return Ok(iface.clone());
                }
            }
            candidates
                .iter()
                .find(|i| i.name == answer)
                .cloned()
                .ok_or_else(|| format!("'{answer}' is not one of the listed interfaces"))
        })
    }

    fn ask_gateway(&self, name: &str, subnet: IpNetwork) -> Result<IpAddr, CoreError> {
        let default = first_host(subnet).to_string();
        ask_until(
            self.prompt,
            &format!("Gateway address for network '{name}' ({subnet})?"),
            &default,
            |answer| {
                let gateway: IpAddr = answer
                    .parse()
                    .map_err(|_| format!("'{answer}' is not an IP address"))?;
                if subnet.contains(gateway) {
                    Ok(gateway)
                } else {
                    Err(format!("{gateway} is not within {subnet}"))
                }
            },
        )
    }

    fn ask_ip_range(&self, name: &str, subnet: IpNetwork) -> Result<IpNetwork, CoreError> {
        ask_until(
            self.prompt,
            &format!("Address range for machines on network '{name}' ({subnet})?"),
            &subnet.to_string(),
            |answer| {
                let range: IpNetwork = answer
                    .parse()
                    .map_err(|_| format!("'{answer}' is not a CIDR range"))?;
                let range = canonical_subnet(range);
                if subnet_contains(subnet, range) {
                    Ok(range)
                } else {
                    Err(format!("{range} is not within {subnet}"))
                }
            },
        )
    }

    /// Create missing networks and connect the machine, all under the
    /// network lock. Returns the connected network names.
    pub fn realize(&self, plan: &NetworkPlan, machine_id: &str) -> Result<Vec<String>, CoreError> {
        if plan.networks.is_empty() {
            return Ok(Vec::new());
        }
        self.locks.with_lock(NETWORK_LOCK, || {
            let mut connected = Vec::with_capacity(plan.networks.len());
            for network in &plan.networks {
                if let Some(options) = &network.create {
                    if self.driver.existing_named_network(&network.name)? {
                        debug!("network '{}' appeared since planning; reusing", network.name);
                    } else {
                        info!("creating network '{}'", network.name);
                        self.driver.create_network(&network.name, options)?;
                    }
                }
                debug!("connecting {machine_id} to '{}'", network.name);
                self.driver
                    .connect_network(&network.name, machine_id, &network.connect)?;
                connected.push(network.name.clone());
            }
            Ok(connected)
        })
    }

    /// Remove flotilla-created networks that no machine uses any more.
    pub fn teardown(&self, networks: &[String]) -> Result<Vec<String>, CoreError> {
        if networks.is_empty() {
            return Ok(Vec::new());
        }
        self.locks.with_lock(NETWORK_LOCK, || {
            let mut removed = Vec::new();
            for name in networks {
                let Some(info) = self.driver.inspect_network(name)? else {
                    continue;
                };
                if !info.managed || self.driver.network_used(name)? {
                    continue;
                }
                info!("removing network '{name}'");
                self.driver.remove_network(name)?;
                removed.push(name.clone());
            }
            Ok(removed)
        })
    }
}

/// First host address of `subnet`; the network address itself for /31, /32,
/// /127 and /128.
fn first_host(subnet: IpNetwork) -> IpAddr {
    match subnet {
        IpNetwork::V4(net) if net.prefix() < 31 => {
            IpAddr::V4(Ipv4Addr::from(u32::from(net.network()).saturating_add(1)))
        }
        IpNetwork::V6(net) if net.prefix() < 127 => {
            IpAddr::V6(Ipv6Addr::from(u128::from(net.network()).saturating_add(1)))
        }
        other => other.network(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::{DefaultPrompt, ScriptedPrompt};
    use flotilla_runtime::{CreateParams, MockDriver, StaticInterfaces};

    struct Fixture {
        _dir: tempfile::TempDir,
        driver: MockDriver,
        locks: ResourceLocks,
        interfaces: StaticInterfaces,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let locks = ResourceLocks::new(dir.path().join("locks"));
            Self {
                _dir: dir,
                driver: MockDriver::new(),
                locks,
                interfaces: StaticInterfaces(vec![
                    iface("lo", "127.0.0.1", 8),
                    iface("eth0", "192.168.1.10", 24),
                    iface("eth0", "fe80::1", 64),
                ]),
            }
        }

        fn provisioner<'a>(&'a self, prompt: &'a dyn Prompt) -> NetworkProvisioner<'a> {
            NetworkProvisioner::new(&self.driver, prompt, &self.interfaces, &self.locks)
        }

        fn machine_id(&self, name: &str) -> String {
            self.driver
                .create(&CreateParams {
                    name: name.to_owned(),
                    image: "alpine".to_owned(),
                    ..CreateParams::default()
                })
                .unwrap()
        }
    }

    fn iface(name: &str, addr: &str, prefix: u8) -> HostInterface {
        HostInterface {
            name: name.to_owned(),
            addr: addr.parse().unwrap(),
            prefix,
        }
    }

    fn private(ip: Option<&str>) -> PrivateNetwork {
        PrivateNetwork {
            ip: ip.map(|i| i.parse().unwrap()),
            ..PrivateNetwork::default()
        }
    }

    fn subnet(s: &str) -> IpNetwork {
        s.parse().unwrap()
    }

    #[test]
    fn derives_default_subnet_and_deterministic_name() {
        let fx = Fixture::new();
        let p = fx.provisioner(&DefaultPrompt);
        let planned = p.plan_private("web", &private(Some("192.168.50.4"))).unwrap();
        assert_eq!(planned.name, "network_192.168.50.0/24");
        assert_eq!(
            planned.create.unwrap().subnet,
            Some(subnet("192.168.50.0/24"))
        );
    }

    #[test]
    fn second_provision_reuses_network() {
        let fx = Fixture::new();
        let p = fx.provisioner(&DefaultPrompt);
        let net = private(Some("192.168.50.4"));

        let first = NetworkPlan {
            networks: vec![p.plan_private("web", &net).unwrap()],
            ports: Vec::new(),
        };
        let id = fx.machine_id("web");
        p.realize(&first, &id).unwrap();

        let second = p.plan_private("db", &private(Some("192.168.50.5"))).unwrap();
        assert_eq!(second.name, "network_192.168.50.0/24");
        assert!(second.create.is_none());

        let creates = fx
            .driver
            .calls()
            .iter()
            .filter(|c| c.starts_with("create_network"))
            .count();
        assert_eq!(creates, 1);
    }

    #[test]
    fn ipv6_defaults_to_64() {
        let fx = Fixture::new();
        let p = fx.provisioner(&DefaultPrompt);
        let planned = p.plan_private("web", &private(Some("fd00:1::5"))).unwrap();
        assert_eq!(planned.name, "network_fd00:1::/64");
    }

    #[test]
    fn explicit_netmask_skips_containment_search() {
        let fx = Fixture::new();
        fx.driver.add_external_network("wide", subnet("10.0.0.0/8"));
        let p = fx.provisioner(&DefaultPrompt);
        let mut net = private(Some("10.1.2.3"));
        net.prefix = Some(24);
        let planned = p.plan_private("web", &net).unwrap();
        assert_eq!(planned.name, "network_10.1.2.0/24");
    }

    #[test]
    fn reuses_containing_network_without_netmask() {
        let fx = Fixture::new();
        fx.driver.add_external_network("lan", subnet("172.20.0.0/16"));
        let p = fx.provisioner(&DefaultPrompt);
        let planned = p.plan_private("web", &private(Some("172.20.9.9"))).unwrap();
        assert_eq!(planned.name, "lan");
        assert!(planned.create.is_none());
    }

    #[test]
    fn address_outside_declared_subnet_is_invalid() {
        let fx = Fixture::new();
        let p = fx.provisioner(&DefaultPrompt);
        let mut net = private(Some("10.0.0.5"));
        net.subnet = Some(subnet("192.168.0.0/24"));
        let err = p.plan_private("web", &net).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Network(NetworkError::AddressInvalid { ref network, .. })
                if network == "network_192.168.0.0/24"
        ));
        assert!(!fx.driver.calls().iter().any(|c| c.starts_with("create_network")));
    }

    #[test]
    fn address_outside_named_network_is_invalid() {
        let fx = Fixture::new();
        fx.driver.add_external_network("office", subnet("192.168.0.0/24"));
        let p = fx.provisioner(&DefaultPrompt);
        let mut net = private(Some("10.0.0.5"));
        net.name = Some("office".to_owned());
        let err = p.plan_private("web", &net).unwrap_err();
        assert!(matches!(
            err,
            CoreError::Network(NetworkError::AddressInvalid { ref network, .. }) if network == "office"
        ));
    }

    #[test]
    fn subnet_outside_named_network_is_invalid() {
        let fx = Fixture::new();
        fx.driver.add_external_network("office", subnet("192.168.0.0/24"));
        let p = fx.provisioner(&DefaultPrompt);
        let mut net = private(Some("192.168.0.7"));
        net.name = Some("office".to_owned());
        net.prefix = Some(16);
        assert!(matches!(
            p.plan_private("web", &net),
            Err(CoreError::Network(NetworkError::SubnetInvalid { .. }))
        ));
    }

    #[test]
    fn undefined_name_fails() {
        let fx = Fixture::new();
        let p = fx.provisioner(&DefaultPrompt);
        let mut net = private(None);
        net.name = Some("ghost".to_owned());
        assert!(matches!(
            p.plan_private("web", &net),
            Err(CoreError::Network(NetworkError::NameUndefined(n))) if n == "ghost"
        ));
    }

    #[test]
    fn dhcp_without_addressing_uses_default_network() {
        let fx = Fixture::new();
        let p = fx.provisioner(&DefaultPrompt);
        let mut net = private(None);
        net.dhcp = true;
        let planned = p.plan_private("web", &net).unwrap();
        assert_eq!(planned.name, DEFAULT_NETWORK);
        assert!(planned.create.is_some());
    }

    #[test]
    fn missing_ip_fails() {
        let fx = Fixture::new();
        let p = fx.provisioner(&DefaultPrompt);
        assert!(matches!(
            p.plan_private("web", &private(None)),
            Err(CoreError::Network(NetworkError::IpAddressRequired { .. }))
        ));
    }

    #[test]
    fn subnet_alone_is_enough() {
        let fx = Fixture::new();
        let p = fx.provisioner(&DefaultPrompt);
        let mut net = private(None);
        net.subnet = Some(subnet("10.5.0.0/16"));
        let planned = p.plan_private("web", &net).unwrap();
        assert_eq!(planned.name, "network_10.5.0.0/16");
        assert_eq!(planned.connect.ip, None);
    }

    #[test]
    fn public_network_uses_single_interface_and_defaults() {
        let fx = Fixture::new();
        let p = fx.provisioner(&DefaultPrompt);
        let planned = p.plan_public("web", &PublicNetwork::default()).unwrap();
        assert_eq!(planned.name, "network_public_eth0");
        let create = planned.create.unwrap();
        assert_eq!(create.subnet, Some(subnet("192.168.1.0/24")));
        assert_eq!(create.gateway, Some("192.168.1.1".parse().unwrap()));
        assert_eq!(create.ip_range, Some(subnet("192.168.1.0/24")));
        assert_eq!(create.driver.as_deref(), Some("macvlan"));
        assert_eq!(create.options.get("parent").map(String::as_str), Some("eth0"));
    }

    #[test]
    fn public_network_prompts_between_interfaces_and_reasks() {
        let mut fx = Fixture::new();
        fx.interfaces.0.push(iface("wlan0", "10.0.0.20", 16));
        let prompt = ScriptedPrompt::new(["9", "wlan0", "8.8.8.8", "10.0.0.254", "", ""]);
        let p = fx.provisioner(&prompt);
        let planned = p.plan_public("web", &PublicNetwork::default()).unwrap();
        assert_eq!(planned.name, "network_public_wlan0");
        let create = planned.create.unwrap();
        assert_eq!(create.gateway, Some("10.0.0.254".parse().unwrap()));
        assert_eq!(create.ip_range, Some(subnet("10.0.0.0/16")));
        assert_eq!(prompt.questions().len(), 5);
    }

    #[test]
    fn public_network_honors_bridge_filter() {
        let fx = Fixture::new();
        let p = fx.provisioner(&DefaultPrompt);
        let net = PublicNetwork {
            bridge: vec!["eno9".to_owned()],
            ..PublicNetwork::default()
        };
        assert!(matches!(
            p.plan_public("web", &net),
            Err(CoreError::Network(NetworkError::NoBridgeInterface { .. }))
        ));
    }

    #[test]
    fn public_network_rejects_configured_gateway_outside_subnet() {
        let fx = Fixture::new();
        let p = fx.provisioner(&DefaultPrompt);
        let net = PublicNetwork {
            gateway: Some("10.9.9.9".parse().unwrap()),
            ..PublicNetwork::default()
        };
        assert!(matches!(
            p.plan_public("web", &net),
            Err(CoreError::Network(NetworkError::GatewayInvalid { .. }))
        ));
    }

    #[test]
    fn existing_public_network_skips_prompts() {
        let fx = Fixture::new();
        fx.driver
            .add_external_network("network_public_eth0", subnet("192.168.1.0/24"));
        let prompt = ScriptedPrompt::new(Vec::<String>::new());
        let p = fx.provisioner(&prompt);
        let planned = p.plan_public("web", &PublicNetwork::default()).unwrap();
        assert!(planned.create.is_none());
        assert!(prompt.questions().is_empty());
    }

    #[test]
    fn teardown_removes_only_unused_managed_networks() {
        let fx = Fixture::new();
        fx.driver.add_external_network("ext", subnet("10.0.0.0/16"));
        let p = fx.provisioner(&DefaultPrompt);
        let plan = NetworkPlan {
            networks: vec![p.plan_private("web", &private(Some("192.168.7.2"))).unwrap()],
            ports: Vec::new(),
        };
        let id = fx.machine_id("web");
        let connected = p.realize(&plan, &id).unwrap();
        assert_eq!(connected, vec!["network_192.168.7.0/24"]);

        let mut names = connected.clone();
        names.push("ext".to_owned());
        assert!(p.teardown(&names).unwrap().is_empty());

        fx.driver.destroy(&id).unwrap();
        assert_eq!(p.teardown(&names).unwrap(), vec!["network_192.168.7.0/24"]);
        assert!(fx.driver.existing_named_network("ext").unwrap());
    }

    #[test]
    fn first_host_addresses() {
        assert_eq!(first_host(subnet("10.0.0.0/8")).to_string(), "10.0.0.1");
        assert_eq!(first_host(subnet("10.0.0.7/32")).to_string(), "10.0.0.7");
        assert_eq!(first_host(subnet("fd00::/64")).to_string(), "fd00::1");
    }
}
