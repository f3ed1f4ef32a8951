use crate::RuntimeError;
use ipnetwork::IpNetwork;
use std::net::IpAddr;
use std::process::Command;

/// One address assigned to a host network interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostInterface {
    pub name: String,
    pub addr: IpAddr,
    pub prefix: u8,
}

impl HostInterface {
    /// The subnet this address belongs to.
    pub fn network(&self) -> Option<IpNetwork> {
        let net = IpNetwork::new(self.addr, self.prefix).ok()?;
        IpNetwork::new(net.network(), net.prefix()).ok()
    }

    pub fn is_loopback(&self) -> bool {
        self.addr.is_loopback()
    }

    pub fn is_link_local(&self) -> bool {
        match self.addr {
            IpAddr::V4(v4) => v4.is_link_local(),
            IpAddr::V6(v6) => (v6.segments()[0] & 0xffc0) == 0xfe80,
        }
    }
}

/// Source of the host's interface addresses.
pub trait HostInterfaces: Send + Sync {
    fn interfaces(&self) -> Result<Vec<HostInterface>, RuntimeError>;
}

/// Reads addresses from `ip -o addr show`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemInterfaces;

impl HostInterfaces for SystemInterfaces {
    fn interfaces(&self) -> Result<Vec<HostInterface>, RuntimeError> {
        let output = Command::new("ip")
            .args(["-o", "addr", "show"])
            .output()
            .map_err(|e| RuntimeError::ExecFailed(format!("failed to run 'ip addr show': {e}")))?;
        if !output.status.success() {
            return Err(RuntimeError::ExecFailed(format!(
                "'ip addr show' failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_ip_addr_output(&String::from_utf8_lossy(&output.stdout)))
    }
}

/// A fixed interface list.
#[derive(Debug, Default, Clone)]
pub struct StaticInterfaces(pub Vec<HostInterface>);

impl HostInterfaces for StaticInterfaces {
    fn interfaces(&self) -> Result<Vec<HostInterface>, RuntimeError> {
        Ok(self.0.clone())
    }
}

/// Parse the one-line-per-address format:
/// `2: eth0    inet 192.168.1.10/24 brd 192.168.1.255 scope global eth0`.
pub fn parse_ip_addr_output(output: &str) -> Vec<HostInterface> {
    let mut interfaces = Vec::new();
    for line in output.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let [_, name, family, cidr, ..] = fields.as_slice() else {
            continue;
        };
        if *family != "inet" && *family != "inet6" {
            continue;
        }
        let Ok(net) = cidr.parse::<IpNetwork>() else {
            tracing::debug!("skipping unparsable address '{cidr}' on {name}");
            continue;
        };
        let name = name.trim_end_matches(':');
        let name = name.split('@').next().unwrap_or(name);
        interfaces.push(HostInterface {
            name: name.to_owned(),
            addr: net.ip(),
            prefix: net.prefix(),
        });
    }
    interfaces
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
1: lo    inet 127.0.0.1/8 scope host lo\\       valid_lft forever preferred_lft forever
1: lo    inet6 ::1/128 scope host \\       valid_lft forever preferred_lft forever
2: eth0    inet 192.168.1.10/24 brd 192.168.1.255 scope global dynamic eth0\\       valid_lft 86000sec
2: eth0    inet6 fe80::1/64 scope link \\       valid_lft forever preferred_lft forever
5: veth1@if4    inet 169.254.3.3/16 scope link veth1
";

    #[test]
    fn parses_addresses() {
        let ifaces = parse_ip_addr_output(SAMPLE);
        assert_eq!(ifaces.len(), 5);
        assert_eq!(ifaces[2].name, "eth0");
        assert_eq!(ifaces[2].addr, "192.168.1.10".parse::<IpAddr>().unwrap());
        assert_eq!(ifaces[2].prefix, 24);
        assert_eq!(ifaces[4].name, "veth1");
    }

    #[test]
    fn classifies_loopback_and_link_local() {
        let ifaces = parse_ip_addr_output(SAMPLE);
        assert!(ifaces[0].is_loopback());
        assert!(ifaces[1].is_loopback());
        assert!(!ifaces[2].is_loopback() && !ifaces[2].is_link_local());
        assert!(ifaces[3].is_link_local());
        assert!(ifaces[4].is_link_local());
    }

    #[test]
    fn network_is_canonical() {
        let iface = HostInterface {
            name: "eth0".to_owned(),
            addr: "192.168.1.10".parse().unwrap(),
            prefix: 24,
        };
        assert_eq!(iface.network().unwrap().to_string(), "192.168.1.0/24");
    }

    #[test]
    fn ignores_garbage_lines() {
        assert!(parse_ip_addr_output("garbage\n3: wlan0 link/ether aa:bb\n").is_empty());
    }
}
