//! Plugins shipped with flotilla: guest capabilities for Linux guests, the
//! provider's `forwarded_ports` report, and the `bind` and `guest` synced
//! folder implementations.

use crate::capability::{PluginRegistry, SubjectKind};
use crate::machine::Machine;
use crate::synced_folders::SyncedFolder;
use crate::CoreError;
use flotilla_runtime::{BindMount, ExecOptions};
use flotilla_schema::{FolderId, NetworkSpec};
use flotilla_store::CachedFolder;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

const PLUGIN: &str = "builtin";

pub const CHANGE_HOST_NAME: &str = "change_host_name";
pub const MOUNT_SHARED_FOLDER: &str = "mount_shared_folder";
pub const UNMOUNT_SHARED_FOLDER: &str = "unmount_shared_folder";
pub const FORWARDED_PORTS: &str = "forwarded_ports";

pub fn register(registry: &mut PluginRegistry) {
    registry.register_capability(
        SubjectKind::Guest,
        CHANGE_HOST_NAME,
        Arc::new(change_host_name),
        0,
        PLUGIN,
    );
    registry.register_capability(
        SubjectKind::Guest,
        MOUNT_SHARED_FOLDER,
        Arc::new(mount_shared_folder),
        0,
        PLUGIN,
    );
    registry.register_capability(
        SubjectKind::Guest,
        UNMOUNT_SHARED_FOLDER,
        Arc::new(unmount_shared_folder),
        0,
        PLUGIN,
    );
    registry.register_capability(
        SubjectKind::Provider,
        FORWARDED_PORTS,
        Arc::new(forwarded_ports),
        0,
        PLUGIN,
    );
    registry.register_synced_folder("bind", Arc::new(BindFolders), 10, PLUGIN);
    registry.register_synced_folder("guest", Arc::new(GuestMountFolders), 5, PLUGIN);
}

fn string_arg<'a>(capability: &str, args: &'a [Value], index: usize) -> Result<&'a str, CoreError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::CapabilityFailed {
            name: capability.to_owned(),
            message: format!("argument {index} must be a string"),
        })
}

fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Run `command` as root in the guest; a non-zero exit fails `capability`.
fn sudo(machine: &Machine, capability: &str, command: &str) -> Result<(), CoreError> {
    let communicator = machine
        .communicator()?
        .filter(|c| c.ready())
        .ok_or_else(|| CoreError::CapabilityFailed {
            name: capability.to_owned(),
            message: format!("machine '{}' has no ready communicator", machine.name),
        })?;
    let options = ExecOptions {
        sudo: true,
        ..ExecOptions::default()
    };
    let mut last = String::new();
    let code = communicator.execute(command, &options, &mut |_, line| {
        debug!("{}: {line}", machine.name);
        last = line.to_owned();
    })?;
    if code != 0 {
        return Err(CoreError::CapabilityFailed {
            name: capability.to_owned(),
            message: format!("`{command}` exited with {code}: {last}"),
        });
    }
    Ok(())
}

fn change_host_name(machine: &Machine, args: &[Value]) -> Result<Value, CoreError> {
    let name = string_arg(CHANGE_HOST_NAME, args, 0)?;
    sudo(
        machine,
        CHANGE_HOST_NAME,
        &format!("hostname {0} && echo {0} > /etc/hostname", quote(name)),
    )?;
    Ok(Value::Null)
}

/// Args: guest path, host path.
fn mount_shared_folder(machine: &Machine, args: &[Value]) -> Result<Value, CoreError> {
    let guest = quote(string_arg(MOUNT_SHARED_FOLDER, args, 0)?);
    let host = quote(string_arg(MOUNT_SHARED_FOLDER, args, 1)?);
    sudo(
        machine,
        MOUNT_SHARED_FOLDER,
        &format!("mkdir -p {guest} && mount --bind {host} {guest}"),
    )?;
    Ok(Value::Null)
}

fn unmount_shared_folder(machine: &Machine, args: &[Value]) -> Result<Value, CoreError> {
    let guest = quote(string_arg(UNMOUNT_SHARED_FOLDER, args, 0)?);
    sudo(
        machine,
        UNMOUNT_SHARED_FOLDER,
        &format!("umount {guest} || true"),
    )?;
    Ok(Value::Null)
}

/// Ports published for the machine, as `{host_ip, host, guest, protocol}`
/// objects.
fn forwarded_ports(machine: &Machine, _args: &[Value]) -> Result<Value, CoreError> {
    let ports = machine
        .config
        .networks
        .iter()
        .filter_map(|spec| match spec {
            NetworkSpec::ForwardedPort(port) => Some(serde_json::json!({
                "host_ip": port.host_ip.map(|ip| ip.to_string()),
                "host": port.host,
                "guest": port.guest,
                "protocol": port.protocol.to_string(),
            })),
            _ => None,
        })
        .collect();
    Ok(Value::Array(ports))
}

/// Folders mounted by the provider when the machine is created.
pub struct BindFolders;

impl SyncedFolder for BindFolders {
    fn usable(&self, machine: &Machine) -> Result<bool, CoreError> {
        Ok(machine.driver.supports_bind_mounts())
    }

    fn mounts_after_create(&self) -> bool {
        false
    }

    fn enable(
        &self,
        machine: &Machine,
        folders: &BTreeMap<FolderId, CachedFolder>,
    ) -> Result<(), CoreError> {
        debug!("{}: {} bind folder(s) mounted at create", machine.name, folders.len());
        Ok(())
    }

    fn create_mounts(
        &self,
        _machine: &Machine,
        folders: &BTreeMap<FolderId, CachedFolder>,
    ) -> Vec<BindMount> {
        folders
            .values()
            .map(|f| BindMount {
                host_path: PathBuf::from(&f.host_path),
                guest_path: f.guest_path.clone(),
                read_only: f.extra.get("read_only").is_some_and(|v| v == "true"),
            })
            .collect()
    }
}

/// Folders mounted from inside the running guest through guest capabilities.
pub struct GuestMountFolders;

impl SyncedFolder for GuestMountFolders {
    fn usable(&self, machine: &Machine) -> Result<bool, CoreError> {
        Ok(machine.guest().has(MOUNT_SHARED_FOLDER))
    }

    fn enable(
        &self,
        machine: &Machine,
        folders: &BTreeMap<FolderId, CachedFolder>,
    ) -> Result<(), CoreError> {
        for folder in folders.values() {
            machine.guest().call(
                MOUNT_SHARED_FOLDER,
                machine,
                &[
                    Value::from(folder.guest_path.as_str()),
                    Value::from(folder.host_path.as_str()),
                ],
            )?;
        }
        Ok(())
    }

    fn disable(
        &self,
        machine: &Machine,
        folders: &BTreeMap<FolderId, CachedFolder>,
    ) -> Result<(), CoreError> {
        if machine.communicator()?.is_none() {
            debug!("{}: not created, nothing to unmount", machine.name);
            return Ok(());
        }
        for folder in folders.values() {
            machine.guest().call(
                UNMOUNT_SHARED_FOLDER,
                machine,
                &[Value::from(folder.guest_path.as_str())],
            )?;
        }
        Ok(())
    }
}
