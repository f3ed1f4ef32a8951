//! Project configuration for flotilla.
//!
//! This crate defines the declaration layer: TOML project file parsing
//! (`ProjectFile`), finalization into validated typed values (`Project`,
//! `MachineConfig`, `NetworkSpec`, `SyncedFolderSpec`, `Trigger`), and the
//! content-derived identifiers used to recognize folders and triggers across
//! runs.

pub mod config;
pub mod finalize;
pub mod folders;
pub mod identity;
pub mod network;
pub mod trigger;
pub mod types;

pub use config::{
    parse_project_file, parse_project_str, ConfigError, MachineSection, NetworkSection,
    ProjectFile, ScriptSection, SyncedFolderSection, TriggerSection, CONFIG_FILE_NAME,
};
pub use finalize::{BuildSpec, MachineConfig, Project};
pub use folders::SyncedFolderSpec;
pub use identity::{folder_id, proxy_folder_id, short_hash, trigger_id};
pub use network::{
    canonical_subnet, subnet_contains, ForwardedPort, NetworkSpec, PrivateNetwork, Protocol,
    PublicNetwork,
};
pub use trigger::{GuestPattern, OnError, ScriptSource, ScriptSpec, Stage, Trigger, TriggerSet};
pub use types::{FolderId, MachineId, TriggerId};
