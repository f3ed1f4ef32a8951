use crate::capability::{CapabilityHost, PluginRegistry, SubjectKind};
use crate::CoreError;
use flotilla_runtime::{Communicator, ProviderDriver};
use flotilla_schema::{short_hash, MachineConfig};
use flotilla_store::{
    validate_machine_name, FolderCacheStore, Marker, MarkerFiles, MachineState, StoreLayout,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One managed machine: its configuration, data directory, and the driver
/// and capability hosts that act on it.
#[derive(Clone)]
pub struct Machine {
    pub name: String,
    pub config: MachineConfig,
    pub data_dir: PathBuf,
    pub project_root: PathBuf,
    pub driver: Arc<dyn ProviderDriver>,
    markers: MarkerFiles,
    guest: CapabilityHost,
    provider: CapabilityHost,
}

impl Machine {
    pub fn new(
        config: MachineConfig,
        layout: &StoreLayout,
        project_root: &Path,
        driver: Arc<dyn ProviderDriver>,
        registry: &Arc<PluginRegistry>,
    ) -> Result<Self, CoreError> {
        validate_machine_name(&config.name)?;
        let data_dir = layout.machine_dir(&config.name);
        Ok(Self {
            name: config.name.clone(),
            markers: MarkerFiles::new(&data_dir),
            data_dir,
            project_root: project_root.to_path_buf(),
            driver,
            guest: CapabilityHost::new(SubjectKind::Guest, Arc::clone(registry)),
            provider: CapabilityHost::new(SubjectKind::Provider, Arc::clone(registry)),
            config,
        })
    }

    /// Provider id, `None` when not created.
    pub fn id(&self) -> Result<Option<String>, CoreError> {
        Ok(self.markers.read(Marker::Id)?)
    }

    pub fn set_id(&self, id: Option<&str>) -> Result<(), CoreError> {
        match id {
            Some(id) => self.markers.write(Marker::Id, id)?,
            None => self.markers.clear(Marker::Id)?,
        }
        Ok(())
    }

    pub fn markers(&self) -> &MarkerFiles {
        &self.markers
    }

    /// Current state as reported by the driver.
    pub fn state(&self) -> Result<MachineState, CoreError> {
        let Some(id) = self.id()? else {
            return Ok(MachineState::NotCreated);
        };
        if !self.driver.created(&id)? {
            return Ok(MachineState::NotCreated);
        }
        if self.driver.running(&id)? {
            Ok(MachineState::Running)
        } else {
            Ok(MachineState::Stopped)
        }
    }

    pub fn guest(&self) -> &CapabilityHost {
        &self.guest
    }

    pub fn provider(&self) -> &CapabilityHost {
        &self.provider
    }

    pub fn communicator(&self) -> Result<Option<Arc<dyn Communicator>>, CoreError> {
        Ok(self.id()?.and_then(|id| self.driver.communicator(&id)))
    }

    pub fn folder_cache(&self) -> FolderCacheStore {
        FolderCacheStore::new(&self.data_dir)
    }

    /// Stable id naming this machine's folders on its host VM. Generated and
    /// persisted on first use.
    pub fn host_vm_sync_id(&self) -> Result<String, CoreError> {
        if let Some(id) = self.markers.read(Marker::HostVmSyncId)? {
            return Ok(id);
        }
        let now = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Nanos, true);
        let id = short_hash(&[&self.name, &self.data_dir.to_string_lossy(), &now]);
        self.markers.write(Marker::HostVmSyncId, &id)?;
        Ok(id)
    }
}
