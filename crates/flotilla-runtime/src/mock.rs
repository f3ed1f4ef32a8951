use crate::communicator::{Communicator, ExecOptions, OutputStream};
use crate::driver::{ConnectOptions, CreateParams, NetworkCreateOptions, NetworkInfo, ProviderDriver};
use crate::RuntimeError;
use flotilla_schema::subnet_contains;
use ipnetwork::IpNetwork;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MockMachine {
    pub name: String,
    pub image: String,
    pub hostname: Option<String>,
    pub running: bool,
    /// Connected network name to assigned address.
    pub networks: BTreeMap<String, Option<IpAddr>>,
    /// `host_ip:host->guest/protocol` entries.
    pub ports: Vec<String>,
    /// `host_path:guest_path` entries.
    pub mounts: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MockNetwork {
    pub subnets: Vec<IpNetwork>,
    pub driver: Option<String>,
    pub options: BTreeMap<String, String>,
    pub managed: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct MockState {
    next_id: u64,
    machines: BTreeMap<String, MockMachine>,
    networks: BTreeMap<String, MockNetwork>,
    images: BTreeSet<String>,
}

/// In-process provider driver.
///
/// With a state file, every mutation is written back so separate processes
/// observe the same machines and networks.
pub struct MockDriver {
    state: Mutex<MockState>,
    state_path: Option<PathBuf>,
    bind_mounts: bool,
    calls: Mutex<Vec<String>>,
    failures: Mutex<HashSet<&'static str>>,
    communicator: Arc<MockCommunicator>,
}

impl Default for MockDriver {
    fn default() -> Self {
        Self {
            state: Mutex::new(MockState::default()),
            state_path: None,
            bind_mounts: true,
            calls: Mutex::new(Vec::new()),
            failures: Mutex::new(HashSet::new()),
            communicator: Arc::new(MockCommunicator::new()),
        }
    }
}

impl MockDriver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn persistent(path: &Path) -> Result<Self, RuntimeError> {
        let state = if path.exists() {
            serde_json::from_str(&std::fs::read_to_string(path)?)?
        } else {
            MockState::default()
        };
        Ok(Self {
            state: Mutex::new(state),
            state_path: Some(path.to_path_buf()),
            ..Self::default()
        })
    }

    #[must_use]
    pub fn with_bind_mounts(mut self, supported: bool) -> Self {
        self.bind_mounts = supported;
        self
    }

    /// Seed a network that exists outside flotilla's control.
    pub fn add_external_network(&self, name: &str, subnet: IpNetwork) {
        if let Ok(mut state) = self.state.lock() {
            state.networks.insert(
                name.to_owned(),
                MockNetwork {
                    subnets: vec![subnet],
                    ..MockNetwork::default()
                },
            );
        }
    }

    /// Make every later call of `op` fail.
    pub fn fail_on(&self, op: &'static str) {
        if let Ok(mut failures) = self.failures.lock() {
            failures.insert(op);
        }
    }

    /// Mutating operations in call order, as `op target`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn machine(&self, id: &str) -> Option<MockMachine> {
        self.state.lock().ok()?.machines.get(id).cloned()
    }

    pub fn network(&self, name: &str) -> Option<MockNetwork> {
        self.state.lock().ok()?.networks.get(name).cloned()
    }

    pub fn network_names(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.networks.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn mock_communicator(&self) -> Arc<MockCommunicator> {
        Arc::clone(&self.communicator)
    }

    fn lock(&self, op: &'static str) -> Result<MutexGuard<'_, MockState>, RuntimeError> {
        self.state
            .lock()
            .map_err(|e| RuntimeError::driver(op, format!("mutex poisoned: {e}")))
    }

    fn check_failure(&self, op: &'static str) -> Result<(), RuntimeError> {
        let injected = self.failures.lock().is_ok_and(|f| f.contains(op));
        if injected {
            return Err(RuntimeError::driver(op, "injected failure"));
        }
        Ok(())
    }

    fn read<R>(
        &self,
        op: &'static str,
        f: impl FnOnce(&MockState) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        self.check_failure(op)?;
        let state = self.lock(op)?;
        f(&state)
    }

    fn write<R>(
        &self,
        op: &'static str,
        target: &str,
        f: impl FnOnce(&mut MockState) -> Result<R, RuntimeError>,
    ) -> Result<R, RuntimeError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(format!("{op} {target}"));
        }
        self.check_failure(op)?;
        let mut state = self.lock(op)?;
        let result = f(&mut state)?;
        self.save(op, &state)?;
        Ok(result)
    }

    fn save(&self, op: &'static str, state: &MockState) -> Result<(), RuntimeError> {
        let Some(path) = &self.state_path else {
            return Ok(());
        };
        let dir = path
            .parent()
            .ok_or_else(|| RuntimeError::driver(op, "state file has no parent directory"))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(serde_json::to_string_pretty(state)?.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(path).map_err(|e| RuntimeError::Io(e.error))?;
        Ok(())
    }
}

fn machine_mut<'a>(
    state: &'a mut MockState,
    op: &'static str,
    id: &str,
) -> Result<&'a mut MockMachine, RuntimeError> {
    state
        .machines
        .get_mut(id)
        .ok_or_else(|| RuntimeError::driver(op, format!("no such machine: {id}")))
}

impl ProviderDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn create(&self, params: &CreateParams) -> Result<String, RuntimeError> {
        self.write("create", &params.name, |state| {
            if state.machines.values().any(|m| m.name == params.name) {
                return Err(RuntimeError::driver(
                    "create",
                    format!("name '{}' is already in use", params.name),
                ));
            }
            state.next_id += 1;
            let id = blake3::hash(format!("{}:{}", params.name, state.next_id).as_bytes())
                .to_hex()[..12]
                .to_owned();
            let machine = MockMachine {
                name: params.name.clone(),
                image: params.image.clone(),
                hostname: params.hostname.clone(),
                running: false,
                networks: BTreeMap::new(),
                ports: params
                    .ports
                    .iter()
                    .map(|p| {
                        let host_ip = p.host_ip.map(|ip| ip.to_string()).unwrap_or_default();
                        format!("{host_ip}:{}->{}/{}", p.host, p.guest, p.protocol)
                    })
                    .collect(),
                mounts: params
                    .mounts
                    .iter()
                    .map(|m| format!("{}:{}", m.host_path.display(), m.guest_path))
                    .collect(),
            };
            state.machines.insert(id.clone(), machine);
            Ok(id)
        })
    }

    fn destroy(&self, id: &str) -> Result<(), RuntimeError> {
        self.write("destroy", id, |state| {
            let machine = machine_mut(state, "destroy", id)?;
            if machine.running {
                return Err(RuntimeError::driver("destroy", "machine is running"));
            }
            state.machines.remove(id);
            Ok(())
        })
    }

    fn start(&self, id: &str) -> Result<(), RuntimeError> {
        self.write("start", id, |state| {
            machine_mut(state, "start", id)?.running = true;
            Ok(())
        })
    }

    fn stop(&self, id: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.write("stop", id, |state| {
            machine_mut(state, "stop", id)?.running = false;
            Ok(())
        })
    }

    fn running(&self, id: &str) -> Result<bool, RuntimeError> {
        self.read("running", |state| {
            Ok(state.machines.get(id).is_some_and(|m| m.running))
        })
    }

    fn created(&self, id: &str) -> Result<bool, RuntimeError> {
        self.read("created", |state| Ok(state.machines.contains_key(id)))
    }

    fn create_network(
        &self,
        name: &str,
        options: &NetworkCreateOptions,
    ) -> Result<(), RuntimeError> {
        self.write("create_network", name, |state| {
            if state.networks.contains_key(name) {
                return Err(RuntimeError::driver(
                    "create_network",
                    format!("network '{name}' already exists"),
                ));
            }
            if let Some(subnet) = options.subnet {
                let overlapping = state.networks.iter().find(|(_, n)| {
                    n.subnets
                        .iter()
                        .any(|s| subnet_contains(*s, subnet) || subnet_contains(subnet, *s))
                });
                if let Some((other, _)) = overlapping {
                    return Err(RuntimeError::driver(
                        "create_network",
                        format!("subnet {subnet} overlaps network '{other}'"),
                    ));
                }
            }
            state.networks.insert(
                name.to_owned(),
                MockNetwork {
                    subnets: options.subnet.into_iter().collect(),
                    driver: options.driver.clone(),
                    options: options.options.clone(),
                    managed: true,
                },
            );
            Ok(())
        })
    }

    fn connect_network(
        &self,
        name: &str,
        id: &str,
        options: &ConnectOptions,
    ) -> Result<(), RuntimeError> {
        self.write("connect_network", &format!("{name} {id}"), |state| {
            let network = state
                .networks
                .get(name)
                .ok_or_else(|| RuntimeError::driver("connect_network", format!("no such network: {name}")))?;
            if let Some(ip) = options.ip {
                if !network.subnets.is_empty() && !network.subnets.iter().any(|s| s.contains(ip)) {
                    return Err(RuntimeError::driver(
                        "connect_network",
                        format!("address {ip} is outside network '{name}'"),
                    ));
                }
                let taken = state
                    .machines
                    .values()
                    .any(|m| m.networks.get(name) == Some(&Some(ip)));
                if taken {
                    return Err(RuntimeError::driver(
                        "connect_network",
                        format!("address {ip} is already in use on '{name}'"),
                    ));
                }
            }
            machine_mut(state, "connect_network", id)?
                .networks
                .insert(name.to_owned(), options.ip);
            Ok(())
        })
    }

    fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        self.write("remove_network", name, |state| {
            if state.machines.values().any(|m| m.networks.contains_key(name)) {
                return Err(RuntimeError::driver(
                    "remove_network",
                    format!("network '{name}' has active endpoints"),
                ));
            }
            state.networks.remove(name);
            Ok(())
        })
    }

    fn network_containing_address(&self, addr: IpAddr) -> Result<Option<String>, RuntimeError> {
        self.read("network_containing_address", |state| {
            Ok(state
                .networks
                .iter()
                .find(|(_, n)| n.subnets.iter().any(|s| s.contains(addr)))
                .map(|(name, _)| name.clone()))
        })
    }

    fn existing_named_network(&self, name: &str) -> Result<bool, RuntimeError> {
        self.read("existing_named_network", |state| {
            Ok(state.networks.contains_key(name))
        })
    }

    fn network_defined(&self, subnet: IpNetwork) -> Result<Option<String>, RuntimeError> {
        self.read("network_defined", |state| {
            Ok(state
                .networks
                .iter()
                .find(|(_, n)| n.subnets.contains(&subnet))
                .map(|(name, _)| name.clone()))
        })
    }

    fn inspect_network(&self, name: &str) -> Result<Option<NetworkInfo>, RuntimeError> {
        self.read("inspect_network", |state| {
            Ok(state.networks.get(name).map(|n| NetworkInfo {
                name: name.to_owned(),
                subnets: n.subnets.clone(),
                managed: n.managed,
            }))
        })
    }

    fn network_used(&self, name: &str) -> Result<bool, RuntimeError> {
        self.read("network_used", |state| {
            Ok(state.machines.values().any(|m| m.networks.contains_key(name)))
        })
    }

    fn build_image(&self, dir: &Path, args: &[String]) -> Result<String, RuntimeError> {
        self.write("build_image", &dir.display().to_string(), |state| {
            if !dir.is_dir() {
                return Err(RuntimeError::driver(
                    "build_image",
                    format!("build directory {} does not exist", dir.display()),
                ));
            }
            let mut hasher = blake3::Hasher::new();
            hasher.update(dir.to_string_lossy().as_bytes());
            for arg in args {
                hasher.update(b"\0");
                hasher.update(arg.as_bytes());
            }
            let id = format!("sha256:{}", &hasher.finalize().to_hex()[..12]);
            state.images.insert(id.clone());
            Ok(id)
        })
    }

    fn image_exists(&self, id: &str) -> Result<bool, RuntimeError> {
        self.read("image_exists", |state| Ok(state.images.contains(id)))
    }

    fn remove_image(&self, id: &str) -> Result<(), RuntimeError> {
        self.write("remove_image", id, |state| {
            state.images.remove(id);
            Ok(())
        })
    }

    fn supports_bind_mounts(&self) -> bool {
        self.bind_mounts
    }

    fn communicator(&self, id: &str) -> Option<Arc<dyn Communicator>> {
        let exists = self.state.lock().ok()?.machines.contains_key(id);
        exists.then(|| Arc::clone(&self.communicator) as Arc<dyn Communicator>)
    }
}

/// Communicator that records commands instead of running them.
pub struct MockCommunicator {
    ready: AtomicBool,
    executed: Mutex<Vec<String>>,
    uploads: Mutex<Vec<(PathBuf, String)>>,
    exit_codes: Mutex<Vec<(String, i32)>>,
    output: Mutex<Vec<(String, String)>>,
}

impl Default for MockCommunicator {
    fn default() -> Self {
        Self {
            ready: AtomicBool::new(true),
            executed: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            exit_codes: Mutex::new(Vec::new()),
            output: Mutex::new(Vec::new()),
        }
    }
}

impl MockCommunicator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Commands containing `pattern` exit with `code`.
    pub fn set_exit_code(&self, pattern: &str, code: i32) {
        if let Ok(mut codes) = self.exit_codes.lock() {
            codes.push((pattern.to_owned(), code));
        }
    }

    /// Commands containing `pattern` print `line` on stdout.
    pub fn set_output(&self, pattern: &str, line: &str) {
        if let Ok(mut output) = self.output.lock() {
            output.push((pattern.to_owned(), line.to_owned()));
        }
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn uploads(&self) -> Vec<(PathBuf, String)> {
        self.uploads.lock().map(|u| u.clone()).unwrap_or_default()
    }
}

impl Communicator for MockCommunicator {
    fn ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    fn execute(
        &self,
        command: &str,
        _options: &ExecOptions,
        on_line: &mut dyn FnMut(OutputStream, &str),
    ) -> Result<i32, RuntimeError> {
        self.executed
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .push(command.to_owned());
        if let Ok(output) = self.output.lock() {
            for (pattern, line) in output.iter() {
                if command.contains(pattern.as_str()) {
                    on_line(OutputStream::Stdout, line);
                }
            }
        }
        let code = self
            .exit_codes
            .lock()
            .ok()
            .and_then(|codes| {
                codes
                    .iter()
                    .find(|(pattern, _)| command.contains(pattern.as_str()))
                    .map(|(_, code)| *code)
            })
            .unwrap_or(0);
        Ok(code)
    }

    fn upload(&self, from: &Path, to: &str) -> Result<(), RuntimeError> {
        if !from.exists() {
            return Err(RuntimeError::ExecFailed(format!(
                "upload source {} does not exist",
                from.display()
            )));
        }
        self.uploads
            .lock()
            .map_err(|e| RuntimeError::ExecFailed(format!("mutex poisoned: {e}")))?
            .push((from.to_path_buf(), to.to_owned()));
        Ok(())
    }

    fn download(&self, from: &str, to: &Path) -> Result<(), RuntimeError> {
        std::fs::write(to, format!("mock-download:{from}"))?;
        Ok(())
    }
}
