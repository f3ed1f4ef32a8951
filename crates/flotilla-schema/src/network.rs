use crate::config::{extra_to_string, ConfigError, NetmaskValue, NetworkSection, OneOrMany};
use ipnetwork::IpNetwork;
use std::collections::BTreeMap;
use std::fmt;
use std::net::IpAddr;

/// A validated network declaration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkSpec {
    Private(PrivateNetwork),
    Public(PublicNetwork),
    ForwardedPort(ForwardedPort),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrivateNetwork {
    pub ip: Option<IpAddr>,
    /// Explicit netmask, as a prefix length.
    pub prefix: Option<u8>,
    pub subnet: Option<IpNetwork>,
    pub dhcp: bool,
    pub name: Option<String>,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PublicNetwork {
    pub ip: Option<IpAddr>,
    /// Candidate host interfaces to bridge to; empty means any.
    pub bridge: Vec<String>,
    pub gateway: Option<IpAddr>,
    pub ip_range: Option<IpNetwork>,
    pub name: Option<String>,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardedPort {
    pub id: String,
    pub guest: u16,
    pub host: u16,
    pub host_ip: Option<IpAddr>,
    pub protocol: Protocol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Protocol {
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

impl PrivateNetwork {
    /// The subnet the user asked for: explicit `subnet`, or `ip` + `netmask`.
    pub fn declared_subnet(&self) -> Option<IpNetwork> {
        if let Some(subnet) = self.subnet {
            return Some(canonical_subnet(subnet));
        }
        let (ip, prefix) = (self.ip?, self.prefix?);
        IpNetwork::new(ip, prefix).ok().map(canonical_subnet)
    }
}

impl ForwardedPort {
    /// Key forwarded ports must be unique by.
    pub fn collision_key(&self) -> (Option<IpAddr>, Protocol, u16) {
        (self.host_ip, self.protocol, self.host)
    }
}

/// Normalize a network to its network address (`192.168.50.4/24` → `192.168.50.0/24`).
pub fn canonical_subnet(net: IpNetwork) -> IpNetwork {
    IpNetwork::new(net.network(), net.prefix()).unwrap_or(net)
}

/// Whether `inner` lies entirely within `outer`.
pub fn subnet_contains(outer: IpNetwork, inner: IpNetwork) -> bool {
    outer.is_ipv4() == inner.is_ipv4()
        && inner.prefix() >= outer.prefix()
        && outer.contains(inner.network())
}

impl NetworkSpec {
    pub(crate) fn from_section(
        machine: &str,
        index: usize,
        section: &NetworkSection,
    ) -> Result<Self, ConfigError> {
        let extra: BTreeMap<String, String> = section
            .extra
            .iter()
            .map(|(k, v)| (k.clone(), extra_to_string(v)))
            .collect();

        match section.kind.as_str() {
            "private_network" => {
                let ip = parse_ip(machine, "ip", section.ip.as_deref())?;
                let subnet = parse_cidr(machine, "subnet", section.subnet.as_deref())?;
                let prefix = match &section.netmask {
                    Some(mask) => Some(parse_netmask(machine, mask, ip)?),
                    None => None,
                };
                if let (Some(ip), Some(prefix)) = (ip, prefix) {
                    IpNetwork::new(ip, prefix).map_err(|e| {
                        invalid(machine, "netmask", &prefix.to_string(), &e.to_string())
                    })?;
                }
                Ok(NetworkSpec::Private(PrivateNetwork {
                    ip,
                    prefix,
                    subnet,
                    dhcp: section.dhcp,
                    name: section.name.clone(),
                    extra,
                }))
            }
            "public_network" => {
                let ip = parse_ip(machine, "ip", section.ip.as_deref())?;
                let gateway = parse_ip(machine, "gateway", section.gateway.as_deref())?;
                let ip_range = parse_cidr(machine, "ip_range", section.ip_range.as_deref())?;
                Ok(NetworkSpec::Public(PublicNetwork {
                    ip,
                    bridge: section
                        .bridge
                        .clone()
                        .map(OneOrMany::into_vec)
                        .unwrap_or_default(),
                    gateway,
                    ip_range,
                    name: section.name.clone(),
                    extra,
                }))
            }
            "forwarded_port" => {
                let guest = section.guest.ok_or_else(|| missing(machine, "guest"))?;
                let host = section.host.ok_or_else(|| missing(machine, "host"))?;
                let host_ip = parse_ip(machine, "host_ip", section.host_ip.as_deref())?;
                let protocol = match section.protocol.as_deref().unwrap_or("tcp") {
                    "tcp" => Protocol::Tcp,
                    "udp" => Protocol::Udp,
                    other => {
                        return Err(invalid(machine, "protocol", other, "expected tcp or udp"));
                    }
                };
                let id = section
                    .id
                    .clone()
                    .unwrap_or_else(|| format!("port-{index}-{guest}-{protocol}"));
                Ok(NetworkSpec::ForwardedPort(ForwardedPort {
                    id,
                    guest,
                    host,
                    host_ip,
                    protocol,
                }))
            }
            other => Err(ConfigError::UnknownNetworkType {
                machine: machine.to_owned(),
                kind: other.to_owned(),
            }),
        }
    }
}

fn parse_ip(
    machine: &str,
    field: &str,
    value: Option<&str>,
) -> Result<Option<IpAddr>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<IpAddr>()
                .map_err(|e| invalid(machine, field, v, &e.to_string()))
        })
        .transpose()
}

fn parse_cidr(
    machine: &str,
    field: &str,
    value: Option<&str>,
) -> Result<Option<IpNetwork>, ConfigError> {
    value
        .map(|v| {
            v.trim()
                .parse::<IpNetwork>()
                .map(canonical_subnet)
                .map_err(|e| invalid(machine, field, v, &e.to_string()))
        })
        .transpose()
}

fn parse_netmask(
    machine: &str,
    mask: &NetmaskValue,
    ip: Option<IpAddr>,
) -> Result<u8, ConfigError> {
    let text = match mask {
        NetmaskValue::Prefix(p) => return Ok(*p),
        NetmaskValue::Text(t) => t.trim(),
    };
    if let Ok(prefix) = text.parse::<u8>() {
        return Ok(prefix);
    }
    let addr: IpAddr = text.parse().map_err(|_| {
        invalid(machine, "netmask", text, "expected a prefix length or a dotted mask")
    })?;
    let prefix = match addr {
        IpAddr::V4(m) => ipnetwork::ipv4_mask_to_prefix(m),
        IpAddr::V6(m) => ipnetwork::ipv6_mask_to_prefix(m),
    }
    .map_err(|e| invalid(machine, "netmask", text, &e.to_string()))?;
    if let Some(ip) = ip {
        if ip.is_ipv4() != addr.is_ipv4() {
            return Err(invalid(machine, "netmask", text, "address family differs from ip"));
        }
    }
    Ok(prefix)
}

fn invalid(machine: &str, field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidField {
        machine: machine.to_owned(),
        field: field.to_owned(),
        value: value.to_owned(),
        reason: reason.to_owned(),
    }
}

fn missing(machine: &str, field: &str) -> ConfigError {
    ConfigError::MissingField {
        machine: machine.to_owned(),
        field: field.to_owned(),
        context: "forwarded_port".to_owned(),
    }
}
