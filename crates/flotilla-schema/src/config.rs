use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// File name looked up in the project directory.
pub const CONFIG_FILE_NAME: &str = "flotilla.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("unsupported config_version: {0}, expected 1")]
    UnsupportedVersion(u32),
    #[error("machine name must not be empty")]
    EmptyMachineName,
    #[error("machine '{0}' is defined more than once")]
    DuplicateMachine(String),
    #[error("machine '{machine}': unknown network type '{kind}' (expected private_network, public_network or forwarded_port)")]
    UnknownNetworkType { machine: String, kind: String },
    #[error("machine '{machine}': invalid {field} '{value}': {reason}")]
    InvalidField {
        machine: String,
        field: String,
        value: String,
        reason: String,
    },
    #[error("machine '{machine}': {field} is required for {context}")]
    MissingField {
        machine: String,
        field: String,
        context: String,
    },
    #[error("machine '{machine}': guest path '{guest_path}' is used by more than one enabled synced folder")]
    DuplicateGuestPath { machine: String, guest_path: String },
    #[error("machine '{machine}': forwarded port collision on {host_ip}:{host_port}/{protocol}")]
    ForwardedPortCollision {
        machine: String,
        host_ip: String,
        protocol: String,
        host_port: u16,
    },
    #[error("machine '{machine}': host_vm '{host_vm}' is not a defined machine")]
    UnknownHostVm { machine: String, host_vm: String },
    #[error("machine '{machine}': host_vm '{host_vm}' itself runs on a host VM")]
    NestedHostVm { machine: String, host_vm: String },
    #[error("invalid trigger stage '{0}' (expected before or after)")]
    InvalidTriggerStage(String),
    #[error("invalid trigger on_error '{0}' (expected halt or continue)")]
    InvalidOnError(String),
    #[error("invalid only_on pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },
    #[error("trigger '{trigger}': {reason}")]
    InvalidScript { trigger: String, reason: String },
}

/// Raw project file as written by the user.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProjectFile {
    pub config_version: u32,
    #[serde(default, rename = "machine")]
    pub machines: Vec<MachineSection>,
    #[serde(default, rename = "trigger")]
    pub triggers: Vec<TriggerSection>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct MachineSection {
    pub name: String,
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_guest")]
    pub guest: String,
    #[serde(default)]
    pub image: Option<String>,
    #[serde(default)]
    pub build_dir: Option<String>,
    #[serde(default)]
    pub build_args: Vec<String>,
    #[serde(default)]
    pub hostname: Option<String>,
    /// Name of another machine that hosts this machine's runtime.
    #[serde(default)]
    pub host_vm: Option<String>,
    #[serde(default = "default_stop_timeout")]
    pub stop_timeout: u64,
    /// Ordered allow-list of synced folder implementations.
    #[serde(default)]
    pub synced_folder_types: Option<Vec<String>>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default, rename = "network")]
    pub networks: Vec<NetworkSection>,
    #[serde(default, rename = "synced_folder")]
    pub synced_folders: Vec<SyncedFolderSection>,
    #[serde(default, rename = "trigger")]
    pub triggers: Vec<TriggerSection>,
}

/// A network declaration. Keys the core does not interpret are collected in
/// `extra` and passed through to the provider.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct NetworkSection {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub netmask: Option<NetmaskValue>,
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default)]
    pub gateway: Option<String>,
    #[serde(default)]
    pub ip_range: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub dhcp: bool,
    #[serde(default)]
    pub bridge: Option<OneOrMany>,
    #[serde(default)]
    pub guest: Option<u16>,
    #[serde(default)]
    pub host: Option<u16>,
    #[serde(default)]
    pub host_ip: Option<String>,
    #[serde(default)]
    pub protocol: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

/// `netmask = 24` or `netmask = "255.255.255.0"`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum NetmaskValue {
    Prefix(u8),
    Text(String),
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn into_vec(self) -> Vec<String> {
        match self {
            OneOrMany::One(s) => vec![s],
            OneOrMany::Many(v) => v,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SyncedFolderSection {
    pub host: String,
    pub guest: String,
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, toml::Value>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct TriggerSection {
    #[serde(default)]
    pub name: Option<String>,
    pub stage: String,
    pub on: OneOrMany,
    #[serde(default)]
    pub ignore: Vec<String>,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub warn: Option<String>,
    #[serde(default = "default_on_error")]
    pub on_error: String,
    #[serde(default)]
    pub only_on: Option<OneOrMany>,
    #[serde(default)]
    pub run: Option<ScriptSection>,
    #[serde(default)]
    pub run_remote: Option<ScriptSection>,
    #[serde(default)]
    pub exit_codes: Option<Vec<i32>>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct ScriptSection {
    #[serde(default)]
    pub inline: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

fn default_provider() -> String {
    "mock".to_owned()
}

fn default_guest() -> String {
    "linux".to_owned()
}

fn default_stop_timeout() -> u64 {
    10
}

fn default_on_error() -> String {
    "halt".to_owned()
}

pub fn parse_project_str(input: &str) -> Result<ProjectFile, ConfigError> {
    Ok(toml::from_str(input)?)
}

pub fn parse_project_file(path: impl AsRef<Path>) -> Result<ProjectFile, ConfigError> {
    let content = fs::read_to_string(path)?;
    parse_project_str(&content)
}

/// Render a passthrough TOML value the way a provider CLI flag expects it.
pub(crate) fn extra_to_string(value: &toml::Value) -> String {
    match value {
        toml::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
