use crate::config::{parse_project_file, ConfigError, MachineSection, ProjectFile};
use crate::folders::{absolutize, SyncedFolderSpec};
use crate::network::{ForwardedPort, NetworkSpec};
use crate::trigger::{Trigger, TriggerSet};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

/// A finalized project: every declaration validated and typed.
#[derive(Debug, Clone)]
pub struct Project {
    /// Directory holding the project file; relative paths resolve against it.
    pub root: PathBuf,
    pub machines: Vec<MachineConfig>,
}

/// Image build instructions for providers that build from a directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildSpec {
    pub dir: PathBuf,
    pub args: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub name: String,
    pub provider: String,
    pub guest: String,
    pub image: Option<String>,
    pub build: Option<BuildSpec>,
    pub hostname: Option<String>,
    pub host_vm: Option<String>,
    pub stop_timeout: u64,
    pub synced_folder_types: Option<Vec<String>>,
    pub env: BTreeMap<String, String>,
    pub networks: Vec<NetworkSpec>,
    pub synced_folders: Vec<SyncedFolderSpec>,
    pub triggers: TriggerSet,
}

impl Project {
    /// Parse and finalize the project file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file = parse_project_file(path)?;
        let root = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let root = if root.is_absolute() {
            root
        } else {
            absolutize(&std::env::current_dir()?, &root)
        };
        file.finalize(&root)
    }

    pub fn machine(&self, name: &str) -> Option<&MachineConfig> {
        self.machines.iter().find(|m| m.name == name)
    }

    pub fn machine_names(&self) -> Vec<&str> {
        self.machines.iter().map(|m| m.name.as_str()).collect()
    }
}

impl ProjectFile {
    /// Validate every section and produce typed declarations.
    pub fn finalize(&self, root: &Path) -> Result<Project, ConfigError> {
        if self.config_version != 1 {
            return Err(ConfigError::UnsupportedVersion(self.config_version));
        }

        let project_triggers = self
            .triggers
            .iter()
            .enumerate()
            .map(|(i, t)| Trigger::from_section("project", i, root, t))
            .collect::<Result<Vec<_>, _>>()?;

        let mut seen = HashSet::new();
        let mut machines = Vec::with_capacity(self.machines.len());
        for section in &self.machines {
            let name = section.name.trim().to_owned();
            if name.is_empty() {
                return Err(ConfigError::EmptyMachineName);
            }
            if !seen.insert(name.clone()) {
                return Err(ConfigError::DuplicateMachine(name));
            }
            machines.push(finalize_machine(&name, root, section, &project_triggers)?);
        }

        for machine in &machines {
            let Some(host_vm) = &machine.host_vm else {
                continue;
            };
            let Some(host) = machines.iter().find(|m| &m.name == host_vm) else {
                return Err(ConfigError::UnknownHostVm {
                    machine: machine.name.clone(),
                    host_vm: host_vm.clone(),
                });
            };
            if host.host_vm.is_some() || host.name == machine.name {
                return Err(ConfigError::NestedHostVm {
                    machine: machine.name.clone(),
                    host_vm: host_vm.clone(),
                });
            }
        }

        Ok(Project {
            root: root.to_path_buf(),
            machines,
        })
    }
}

fn finalize_machine(
    name: &str,
    root: &Path,
    section: &MachineSection,
    project_triggers: &[Trigger],
) -> Result<MachineConfig, ConfigError> {
    let networks = section
        .networks
        .iter()
        .enumerate()
        .map(|(i, n)| NetworkSpec::from_section(name, i, n))
        .collect::<Result<Vec<_>, _>>()?;

    let mut ports = HashSet::new();
    for net in &networks {
        if let NetworkSpec::ForwardedPort(port) = net {
            if !ports.insert(port.collision_key()) {
                return Err(ConfigError::ForwardedPortCollision {
                    machine: name.to_owned(),
                    host_ip: port
                        .host_ip
                        .map_or_else(|| "*".to_owned(), |ip| ip.to_string()),
                    protocol: port.protocol.to_string(),
                    host_port: port.host,
                });
            }
        }
    }

    let synced_folders = section
        .synced_folders
        .iter()
        .map(|f| SyncedFolderSpec::from_section(name, root, f))
        .collect::<Result<Vec<_>, _>>()?;

    let mut guest_paths = HashSet::new();
    for folder in synced_folders.iter().filter(|f| !f.disabled) {
        if !guest_paths.insert(folder.guest_path.as_str()) {
            return Err(ConfigError::DuplicateGuestPath {
                machine: name.to_owned(),
                guest_path: folder.guest_path.clone(),
            });
        }
    }

    let mut triggers = TriggerSet::default();
    for trigger in project_triggers {
        triggers.push(trigger.clone());
    }
    for (i, t) in section.triggers.iter().enumerate() {
        triggers.push(Trigger::from_section(name, i, root, t)?);
    }

    let build = section.build_dir.as_ref().map(|dir| BuildSpec {
        dir: absolutize(root, Path::new(dir)),
        args: section.build_args.clone(),
    });

    Ok(MachineConfig {
        name: name.to_owned(),
        provider: section.provider.trim().to_lowercase(),
        guest: section.guest.trim().to_lowercase(),
        image: section.image.clone(),
        build,
        hostname: section.hostname.clone(),
        host_vm: section.host_vm.clone(),
        stop_timeout: section.stop_timeout,
        synced_folder_types: section.synced_folder_types.clone(),
        env: section.env.clone(),
        networks,
        synced_folders,
        triggers,
    })
}

impl MachineConfig {
    pub fn forwarded_ports(&self) -> impl Iterator<Item = &ForwardedPort> {
        self.networks.iter().filter_map(|n| match n {
            NetworkSpec::ForwardedPort(p) => Some(p),
            _ => None,
        })
    }

    pub fn enabled_folders(&self) -> impl Iterator<Item = &SyncedFolderSpec> {
        self.synced_folders.iter().filter(|f| !f.disabled)
    }
}
