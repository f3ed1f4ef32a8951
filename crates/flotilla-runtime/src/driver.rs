use crate::communicator::Communicator;
use crate::RuntimeError;
use flotilla_schema::Protocol;
use ipnetwork::IpNetwork;
use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// A host directory bound into the machine at create time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindMount {
    pub host_path: PathBuf,
    pub guest_path: String,
    pub read_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortPublication {
    pub host_ip: Option<IpAddr>,
    pub host: u16,
    pub guest: u16,
    pub protocol: Protocol,
}

/// Everything a driver needs to create a machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CreateParams {
    pub name: String,
    pub image: String,
    pub hostname: Option<String>,
    pub env: BTreeMap<String, String>,
    pub ports: Vec<PortPublication>,
    pub mounts: Vec<BindMount>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkCreateOptions {
    pub subnet: Option<IpNetwork>,
    pub gateway: Option<IpAddr>,
    pub ip_range: Option<IpNetwork>,
    /// Network driver, e.g. `macvlan` for public networks.
    pub driver: Option<String>,
    /// Driver options such as `parent=<interface>`.
    pub options: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectOptions {
    pub ip: Option<IpAddr>,
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: String,
    pub subnets: Vec<IpNetwork>,
    /// Whether flotilla created this network.
    pub managed: bool,
}

/// Lifecycle, network and image operations of one provider.
///
/// Every failure is reported as [`RuntimeError::Driver`] naming the
/// operation, so callers never need to parse provider output.
pub trait ProviderDriver: Send + Sync {
    fn name(&self) -> &str;

    fn create(&self, params: &CreateParams) -> Result<String, RuntimeError>;

    fn destroy(&self, id: &str) -> Result<(), RuntimeError>;

    fn start(&self, id: &str) -> Result<(), RuntimeError>;

    fn stop(&self, id: &str, timeout: Duration) -> Result<(), RuntimeError>;

    fn running(&self, id: &str) -> Result<bool, RuntimeError>;

    fn created(&self, id: &str) -> Result<bool, RuntimeError>;

    fn create_network(
        &self,
        name: &str,
        options: &NetworkCreateOptions,
    ) -> Result<(), RuntimeError>;

    fn connect_network(
        &self,
        name: &str,
        id: &str,
        options: &ConnectOptions,
    ) -> Result<(), RuntimeError>;

    fn remove_network(&self, name: &str) -> Result<(), RuntimeError>;

    /// Name of an existing network whose subnet contains `addr`.
    fn network_containing_address(&self, addr: IpAddr) -> Result<Option<String>, RuntimeError>;

    fn existing_named_network(&self, name: &str) -> Result<bool, RuntimeError>;

    /// Name of an existing network defined for exactly `subnet`.
    fn network_defined(&self, subnet: IpNetwork) -> Result<Option<String>, RuntimeError>;

    fn inspect_network(&self, name: &str) -> Result<Option<NetworkInfo>, RuntimeError>;

    /// Whether any machine is still connected to the network.
    fn network_used(&self, name: &str) -> Result<bool, RuntimeError>;

    fn build_image(&self, dir: &Path, args: &[String]) -> Result<String, RuntimeError>;

    fn image_exists(&self, id: &str) -> Result<bool, RuntimeError>;

    fn remove_image(&self, id: &str) -> Result<(), RuntimeError>;

    fn supports_bind_mounts(&self) -> bool {
        true
    }

    /// Channel into the running machine, if the provider has one.
    fn communicator(&self, id: &str) -> Option<Arc<dyn Communicator>>;
}

/// Instantiate the driver registered under `name`.
///
/// `state_path` is where drivers without an external daemon keep their
/// state between invocations.
pub fn select_driver(
    name: &str,
    state_path: &Path,
) -> Result<Arc<dyn ProviderDriver>, RuntimeError> {
    match name {
        "mock" => Ok(Arc::new(crate::mock::MockDriver::persistent(state_path)?)),
        other => Err(RuntimeError::DriverUnavailable(other.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_mock_driver() {
        let dir = tempfile::tempdir().unwrap();
        let driver = select_driver("mock", &dir.path().join("mock.json")).unwrap();
        assert_eq!(driver.name(), "mock");
        assert!(driver.supports_bind_mounts());
    }

    #[test]
    fn select_invalid_driver_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            select_driver("hyperv", &dir.path().join("x.json")),
            Err(RuntimeError::DriverUnavailable(n)) if n == "hyperv"
        ));
    }
}
