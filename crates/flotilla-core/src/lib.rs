//! Orchestration core for flotilla machines.
//!
//! This crate ties configuration, the store, and provider drivers together
//! into the `Engine`: capability resolution through an explicit
//! `PluginRegistry`, lifecycle commands as composable action pipelines,
//! network provisioning, synced folder reconciliation, host resource locks,
//! and before/after trigger sequencing.

pub mod builtin;
pub mod capability;
pub mod concurrency;
pub mod engine;
pub mod lifecycle;
pub mod machine;
pub mod network;
pub mod pipeline;
pub mod prompt;
pub mod synced_folders;
pub mod triggers;
pub mod ui;

pub use capability::{
    CapabilityFn, CapabilityHost, CapabilityRegistry, PluginRegistry, Registration, SubjectKind,
};
pub use concurrency::{install_signal_handler, shutdown_requested, ResourceGuard, ResourceLocks};
pub use engine::{Engine, EngineBuilder, MachineReport, Services};
pub use lifecycle::{validate_transition, ActionEnv, Command};
pub use machine::Machine;
pub use network::{NetworkError, NetworkPlan, NetworkProvisioner, PlannedNetwork};
pub use pipeline::{Action, Branch, Builder, Next, Pipeline};
pub use prompt::{DefaultPrompt, Prompt, ScriptedPrompt};
pub use synced_folders::{FolderDiff, SyncedFolder};
pub use triggers::{TriggerEngine, TriggerOutcome, TriggerReport};
pub use ui::{LogUi, RecordingUi, Ui, UiLevel};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {0}")]
    Config(#[from] flotilla_schema::ConfigError),
    #[error("store error: {0}")]
    Store(#[from] flotilla_store::StoreError),
    #[error("{0}")]
    Runtime(#[from] flotilla_runtime::RuntimeError),
    #[error("network configuration invalid: {0}")]
    Network(#[from] NetworkError),
    #[error("no plugin provides {kind} capability '{name}'")]
    CapabilityNotFound { kind: SubjectKind, name: String },
    #[error("capability '{name}' failed: {message}")]
    CapabilityFailed { name: String, message: String },
    #[error("resource '{resource}' is locked by another process")]
    ResourceLocked { resource: String },
    #[error("trigger '{trigger}' failed: {message}")]
    TriggerScriptFailed { trigger: String, message: String },
    #[error("trigger '{trigger}': run_remote requires machine '{machine}' to be running with a ready communicator")]
    RemoteTriggerUnavailable { trigger: String, machine: String },
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },
    #[error("machine not found: {0}")]
    MachineNotFound(String),
    #[error("machine '{machine}': synced folder type '{kind}' is not usable")]
    SyncedFolderUnusable { machine: String, kind: String },
    #[error("machine '{machine}': unknown synced folder type '{kind}'")]
    SyncedFolderTypeUnknown { machine: String, kind: String },
    #[error("machine '{machine}': '{kind}' synced folders changed but are only mounted at create; destroy and recreate the machine")]
    SyncedFolderNeedsRecreate { machine: String, kind: String },
    #[error("machine '{0}' declares neither image nor build_dir")]
    NoImage(String),
    #[error("no action named '{0}' in pipeline")]
    UnknownAction(String),
    #[error("prompt failed: {0}")]
    Prompt(String),
    #[error("interrupted")]
    Interrupted,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl CoreError {
    /// Stable process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CoreError::Config(_)
            | CoreError::Network(_)
            | CoreError::MachineNotFound(_)
            | CoreError::SyncedFolderUnusable { .. }
            | CoreError::SyncedFolderTypeUnknown { .. }
            | CoreError::SyncedFolderNeedsRecreate { .. }
            | CoreError::NoImage(_) => 2,
            CoreError::Store(_) => 3,
            CoreError::CapabilityNotFound { .. } => 4,
            CoreError::TriggerScriptFailed { .. } | CoreError::RemoteTriggerUnavailable { .. } => 5,
            CoreError::Interrupted => 130,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_are_stable() {
        assert_eq!(CoreError::MachineNotFound("x".to_owned()).exit_code(), 2);
        assert_eq!(
            CoreError::Network(NetworkError::NameUndefined("n".to_owned())).exit_code(),
            2
        );
        assert_eq!(
            CoreError::Store(flotilla_store::StoreError::MachineNotFound("x".to_owned()))
                .exit_code(),
            3
        );
        assert_eq!(
            CoreError::CapabilityNotFound {
                kind: SubjectKind::Guest,
                name: "mount".to_owned()
            }
            .exit_code(),
            4
        );
        assert_eq!(
            CoreError::TriggerScriptFailed {
                trigger: "t".to_owned(),
                message: "exit 1".to_owned()
            }
            .exit_code(),
            5
        );
        assert_eq!(CoreError::Interrupted.exit_code(), 130);
        assert_eq!(
            CoreError::Runtime(flotilla_runtime::RuntimeError::driver("start", "boom")).exit_code(),
            1
        );
    }

    #[test]
    fn capability_not_found_names_kind_and_capability() {
        let e = CoreError::CapabilityNotFound {
            kind: SubjectKind::Guest,
            name: "change_host_name".to_owned(),
        };
        let msg = e.to_string();
        assert!(msg.contains("guest"));
        assert!(msg.contains("change_host_name"));
    }
}
