use crate::capability::{PluginRegistry, SubjectKind};
use crate::machine::Machine;
use crate::ui::Ui;
use crate::CoreError;
use flotilla_runtime::BindMount;
use flotilla_schema::{proxy_folder_id, FolderId, MachineConfig};
use flotilla_store::{CachedFolder, FolderMap};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, warn};

/// Root of proxied folders inside a host VM.
pub const HOST_VM_FOLDER_ROOT: &str = "/var/lib/flotilla";
/// `extra` key naming the machine a proxied folder belongs to.
pub const OWNER_KEY: &str = "owner";

/// A synced folder implementation, selected per folder by type key.
///
/// `folders` is the set of folders assigned to this implementation, keyed by
/// folder id.
pub trait SyncedFolder: Send + Sync {
    fn usable(&self, machine: &Machine) -> Result<bool, CoreError>;

    /// Whether `enable` can mount folders on a machine that already exists.
    /// Implementations that only mount through `create_mounts` return false.
    fn mounts_after_create(&self) -> bool {
        true
    }

    fn prepare(
        &self,
        _machine: &Machine,
        _folders: &BTreeMap<FolderId, CachedFolder>,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    fn enable(
        &self,
        machine: &Machine,
        folders: &BTreeMap<FolderId, CachedFolder>,
    ) -> Result<(), CoreError>;

    fn disable(
        &self,
        _machine: &Machine,
        _folders: &BTreeMap<FolderId, CachedFolder>,
    ) -> Result<(), CoreError> {
        Ok(())
    }

    fn cleanup(&self, _machine: &Machine) -> Result<(), CoreError> {
        Ok(())
    }

    /// Mounts the provider must set up when creating the machine.
    fn create_mounts(
        &self,
        _machine: &Machine,
        _folders: &BTreeMap<FolderId, CachedFolder>,
    ) -> Vec<BindMount> {
        Vec::new()
    }
}

/// What changed between the cached and the desired folder sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FolderDiff {
    /// Desired folders that are new or changed.
    pub invalid: FolderMap,
    /// Cached folders that are gone or changed.
    pub orphaned: FolderMap,
}

impl FolderDiff {
    pub fn changed(&self) -> bool {
        !self.invalid.is_empty() || !self.orphaned.is_empty()
    }
}

pub fn diff(cached: &FolderMap, desired: &FolderMap) -> FolderDiff {
    let mut remaining: HashMap<&str, (&str, &FolderId, &CachedFolder)> = cached
        .iter()
        .flat_map(|(kind, folders)| {
            folders
                .iter()
                .map(move |(id, f)| (f.guest_path.as_str(), (kind.as_str(), id, f)))
        })
        .collect();

    let mut result = FolderDiff::default();
    for (kind, folders) in desired {
        for (id, folder) in folders {
            let unchanged = remaining
                .get(folder.guest_path.as_str())
                .is_some_and(|(_, _, c)| c.host_path == folder.host_path);
            if unchanged {
                remaining.remove(folder.guest_path.as_str());
            } else {
                insert(&mut result.invalid, kind, id, folder);
            }
        }
    }
    for (kind, id, folder) in remaining.into_values() {
        insert(&mut result.orphaned, kind, id, folder);
    }
    result
}

fn insert(map: &mut FolderMap, kind: &str, id: &FolderId, folder: &CachedFolder) {
    map.entry(kind.to_owned())
        .or_default()
        .insert(id.clone(), folder.clone());
}

/// Assign every enabled folder of `machine` to an implementation.
///
/// Explicit types must be registered and usable. Untyped folders share the
/// machine's default; when none is usable they are skipped with a warning.
pub fn desired_folders(
    machine: &Machine,
    registry: &PluginRegistry,
    ui: &dyn Ui,
) -> Result<FolderMap, CoreError> {
    let mut usable: HashMap<String, bool> = HashMap::new();
    let mut default: Option<Option<String>> = None;
    let mut map = FolderMap::new();

    for folder in machine.config.enabled_folders() {
        let kind = match &folder.kind {
            Some(kind) => {
                let implementation = registry
                    .synced_folders
                    .resolve(SubjectKind::SyncedFolder, kind)
                    .map_err(|_| CoreError::SyncedFolderTypeUnknown {
                        machine: machine.name.clone(),
                        kind: kind.clone(),
                    })?;
                let ok = match usable.get(kind) {
                    Some(ok) => *ok,
                    None => {
                        let ok = implementation.usable(machine)?;
                        usable.insert(kind.clone(), ok);
                        ok
                    }
                };
                if !ok {
                    return Err(CoreError::SyncedFolderUnusable {
                        machine: machine.name.clone(),
                        kind: kind.clone(),
                    });
                }
                kind.clone()
            }
            None => {
                let chosen = default.get_or_insert_with(|| default_type(machine, registry, false));
                let Some(kind) = chosen.clone() else {
                    ui.warn(&format!(
                        "{}: no usable synced folder type, skipping {}",
                        machine.name, folder.guest_path
                    ));
                    continue;
                };
                kind
            }
        };
        map.entry(kind).or_default().insert(
            folder.id.clone(),
            CachedFolder {
                guest_path: folder.guest_path.clone(),
                host_path: folder.host_path.to_string_lossy().into_owned(),
                extra: folder.extra.clone(),
            },
        );
    }
    Ok(map)
}

/// The default implementation for `machine`; `running` restricts the choice
/// to implementations that can mount on an existing machine.
fn default_type(machine: &Machine, registry: &PluginRegistry, running: bool) -> Option<String> {
    registry.synced_folders.select_default(
        SubjectKind::SyncedFolder,
        machine.config.synced_folder_types.as_deref(),
        |name, implementation| {
            if running && !implementation.mounts_after_create() {
                return false;
            }
            match implementation.usable(machine) {
                Ok(ok) => ok,
                Err(e) => {
                    warn!("{}: synced folder type '{name}' check failed: {e}", machine.name);
                    false
                }
            }
        },
    )
}

fn implementation(
    registry: &PluginRegistry,
    machine: &Machine,
    kind: &str,
) -> Result<Arc<dyn SyncedFolder>, CoreError> {
    registry
        .synced_folders
        .resolve(SubjectKind::SyncedFolder, kind)
        .cloned()
        .map_err(|_| CoreError::SyncedFolderTypeUnknown {
            machine: machine.name.clone(),
            kind: kind.to_owned(),
        })
}

/// Compute the desired folders and the mounts the provider must set up at
/// create time.
pub fn create_mounts(
    machine: &Machine,
    registry: &PluginRegistry,
    ui: &dyn Ui,
) -> Result<(FolderMap, Vec<BindMount>), CoreError> {
    let desired = desired_folders(machine, registry, ui)?;
    let mut mounts = Vec::new();
    for (kind, folders) in &desired {
        let implementation = implementation(registry, machine, kind)?;
        implementation.prepare(machine, folders)?;
        mounts.extend(implementation.create_mounts(machine, folders));
    }
    Ok((desired, mounts))
}

fn load_cache(machine: &Machine) -> FolderMap {
    machine.folder_cache().load().unwrap_or_else(|e| {
        warn!("{}: ignoring unreadable synced folder cache: {e}", machine.name);
        FolderMap::new()
    })
}

/// Split a cache into folders proxied for other machines (carrying
/// [`OWNER_KEY`]) and the machine's own folders.
fn split_proxied(map: FolderMap) -> (FolderMap, FolderMap) {
    let mut proxied = FolderMap::new();
    let mut own = FolderMap::new();
    for (kind, folders) in map {
        for (id, folder) in folders {
            let target = if folder.extra.contains_key(OWNER_KEY) {
                &mut proxied
            } else {
                &mut own
            };
            target.entry(kind.clone()).or_default().insert(id, folder);
        }
    }
    (proxied, own)
}

fn merge(into: &mut FolderMap, from: FolderMap) {
    for (kind, folders) in from {
        into.entry(kind).or_default().extend(folders);
    }
}

/// Record `folders` as applied, keeping folders proxied for other machines.
/// Called once the provider created the machine with its create-time mounts.
pub fn remember(machine: &Machine, folders: &FolderMap) -> Result<(), CoreError> {
    let (mut applied, _) = split_proxied(load_cache(machine));
    merge(&mut applied, folders.clone());
    machine.folder_cache().save(&applied)?;
    Ok(())
}

/// Bring the machine's folders in line with configuration and remember the
/// applied set. Folders proxied for other machines are mounted again and
/// kept.
pub fn enable(
    machine: &Machine,
    registry: &PluginRegistry,
    ui: &dyn Ui,
) -> Result<FolderMap, CoreError> {
    let (proxied, cached) = split_proxied(load_cache(machine));
    let desired = desired_folders(machine, registry, ui)?;

    let changes = diff(&cached, &desired);
    for (kind, _) in changes.invalid.iter().chain(&changes.orphaned) {
        let create_only = implementation(registry, machine, kind)
            .is_ok_and(|implementation| !implementation.mounts_after_create());
        if create_only {
            return Err(CoreError::SyncedFolderNeedsRecreate {
                machine: machine.name.clone(),
                kind: kind.clone(),
            });
        }
    }
    if changes.changed() && !cached.is_empty() {
        ui.warn(&format!(
            "{}: synced folder configuration changed since the last run; updating mounts",
            machine.name
        ));
    }

    for (kind, folders) in &changes.orphaned {
        match implementation(registry, machine, kind) {
            Ok(implementation) => implementation.disable(machine, folders)?,
            Err(e) => warn!("{}: cannot disable orphaned folders: {e}", machine.name),
        }
    }
    for (kind, folders) in &desired {
        let implementation = implementation(registry, machine, kind)?;
        debug!("{}: enabling {} folder(s) with '{kind}'", machine.name, folders.len());
        implementation.prepare(machine, folders)?;
        implementation.enable(machine, folders)?;
    }
    for (kind, folders) in &proxied {
        debug!("{}: re-sharing {} proxied folder(s)", machine.name, folders.len());
        implementation(registry, machine, kind)?.enable(machine, folders)?;
    }

    let mut applied = desired.clone();
    merge(&mut applied, proxied);
    machine.folder_cache().save(&applied)?;
    Ok(desired)
}

/// Run every used implementation's cleanup and forget the applied set.
pub fn cleanup(machine: &Machine, registry: &PluginRegistry) -> Result<(), CoreError> {
    let cache = machine.folder_cache();
    let cached = cache.load().unwrap_or_default();
    for kind in cached.keys() {
        match implementation(registry, machine, kind) {
            Ok(implementation) => implementation.cleanup(machine)?,
            Err(e) => warn!("{}: skipping cleanup: {e}", machine.name),
        }
    }
    cache.clear()?;
    Ok(())
}

/// Path on the host VM where a proxied folder is exposed.
pub fn host_vm_path(sync_id: &str, id: &FolderId) -> String {
    format!("{HOST_VM_FOLDER_ROOT}/{sync_id}/{id}")
}

/// Share the machine's folders on `host`, reusing folders the host already
/// has, and return the machine's config with folders rewritten to bind the
/// host-VM paths.
pub fn sync_host_vm_folders(
    machine: &Machine,
    host: &Machine,
    registry: &PluginRegistry,
    ui: &dyn Ui,
) -> Result<MachineConfig, CoreError> {
    let sync_id = machine.host_vm_sync_id()?;
    let root = machine.project_root.to_string_lossy();
    let host_cache = host.folder_cache();
    let mut shared = host_cache.load()?;
    let known: Vec<FolderId> = shared.values().flat_map(|f| f.keys().cloned()).collect();

    let mut rewritten = machine.config.clone();
    let mut fresh: BTreeMap<FolderId, CachedFolder> = BTreeMap::new();
    for folder in rewritten.synced_folders.iter_mut().filter(|f| !f.disabled) {
        let host_path = folder.host_path.to_string_lossy().into_owned();
        let id = proxy_folder_id(&root, &host_path, &folder.guest_path, &machine.name);
        let proxied = host_vm_path(&sync_id, &id);
        if known.contains(&id) {
            debug!("{}: reusing host VM folder {proxied}", machine.name);
        } else {
            fresh.insert(
                id,
                CachedFolder {
                    guest_path: proxied.clone(),
                    host_path,
                    extra: [(OWNER_KEY.to_owned(), machine.name.clone())].into(),
                },
            );
        }
        folder.host_path = proxied.into();
    }

    if !fresh.is_empty() {
        let Some(kind) = default_type(host, registry, true) else {
            return Err(CoreError::SyncedFolderUnusable {
                machine: host.name.clone(),
                kind: "any".to_owned(),
            });
        };
        let implementation = implementation(registry, host, &kind)?;
        ui.info(&format!(
            "{}: sharing {} folder(s) through host VM '{}'",
            machine.name,
            fresh.len(),
            host.name
        ));
        implementation.prepare(host, &fresh)?;
        implementation.enable(host, &fresh)?;
        shared.entry(kind).or_default().extend(fresh);
        host_cache.save(&shared)?;
    }
    Ok(rewritten)
}

/// Remove the machine's proxied folders from `host`.
pub fn disable_host_vm_folders(
    machine: &Machine,
    host: &Machine,
    registry: &PluginRegistry,
) -> Result<(), CoreError> {
    let host_cache = host.folder_cache();
    let mut shared = host_cache.load()?;
    let mut touched = false;
    for (kind, folders) in &mut shared {
        let owned: BTreeMap<FolderId, CachedFolder> = folders
            .iter()
            .filter(|(_, f)| f.extra.get(OWNER_KEY) == Some(&machine.name))
            .map(|(id, f)| (id.clone(), f.clone()))
            .collect();
        if owned.is_empty() {
            continue;
        }
        implementation(registry, host, kind)?.disable(host, &owned)?;
        folders.retain(|id, _| !owned.contains_key(id));
        touched = true;
    }
    if touched {
        shared.retain(|_, folders| !folders.is_empty());
        host_cache.save(&shared)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::tests::machine_config;
    use crate::ui::{RecordingUi, UiLevel};
    use flotilla_runtime::{MockDriver, ProviderDriver};
    use flotilla_store::StoreLayout;
    use std::path::Path;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        unusable: bool,
        create_only: bool,
        calls: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn log(&self, op: &str, folders: &BTreeMap<FolderId, CachedFolder>) {
            let mut paths: Vec<_> = folders.values().map(|f| f.guest_path.clone()).collect();
            paths.sort();
            self.calls
                .lock()
                .unwrap()
                .push(format!("{op} {}", paths.join(",")));
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl SyncedFolder for Recorder {
        fn usable(&self, _machine: &Machine) -> Result<bool, CoreError> {
            Ok(!self.unusable)
        }

        fn mounts_after_create(&self) -> bool {
            !self.create_only
        }

        fn enable(
            &self,
            _machine: &Machine,
            folders: &BTreeMap<FolderId, CachedFolder>,
        ) -> Result<(), CoreError> {
            self.log("enable", folders);
            Ok(())
        }

        fn disable(
            &self,
            _machine: &Machine,
            folders: &BTreeMap<FolderId, CachedFolder>,
        ) -> Result<(), CoreError> {
            self.log("disable", folders);
            Ok(())
        }

        fn cleanup(&self, _machine: &Machine) -> Result<(), CoreError> {
            self.calls.lock().unwrap().push("cleanup".to_owned());
            Ok(())
        }
    }

    fn registry_with(recorder: &Arc<Recorder>, unusable: Option<Arc<Recorder>>) -> PluginRegistry {
        let mut registry = PluginRegistry::new();
        registry.register_synced_folder("rec", recorder.clone(), 5, "test");
        if let Some(other) = unusable {
            registry.register_synced_folder("broken", other, 10, "test");
        }
        registry
    }

    fn machine(dir: &Path, toml: &str, name: &str, registry: &Arc<PluginRegistry>) -> Machine {
        let layout = StoreLayout::new(dir);
        layout.initialize().unwrap();
        let driver: Arc<dyn ProviderDriver> = Arc::new(MockDriver::new());
        Machine::new(
            machine_config(toml, name),
            &layout,
            Path::new("/projects/demo"),
            driver,
            registry,
        )
        .unwrap()
    }

    fn folder(guest: &str, host: &str) -> CachedFolder {
        CachedFolder {
            guest_path: guest.to_owned(),
            host_path: host.to_owned(),
            extra: BTreeMap::new(),
        }
    }

    fn map(entries: &[(&str, &str, &str, &str)]) -> FolderMap {
        let mut map = FolderMap::new();
        for (kind, id, guest, host) in entries {
            map.entry((*kind).to_owned())
                .or_default()
                .insert(FolderId::new(*id), folder(guest, host));
        }
        map
    }

    #[test]
    fn identical_sets_have_no_diff() {
        let set = map(&[("bind", "a", "/srv", "/p")]);
        assert!(!diff(&set, &set).changed());
    }

    #[test]
    fn changed_host_path_is_invalid_and_orphaned() {
        let cached = map(&[("bind", "a", "/srv", "/old")]);
        let desired = map(&[("bind", "a", "/srv", "/new")]);
        let d = diff(&cached, &desired);
        assert_eq!(d.invalid, desired);
        assert_eq!(d.orphaned, cached);
    }

    #[test]
    fn new_and_removed_folders() {
        let cached = map(&[("bind", "a", "/a", "/pa"), ("bind", "b", "/b", "/pb")]);
        let desired = map(&[("bind", "a", "/a", "/pa"), ("guest", "c", "/c", "/pc")]);
        let d = diff(&cached, &desired);
        assert_eq!(d.invalid, map(&[("guest", "c", "/c", "/pc")]));
        assert_eq!(d.orphaned, map(&[("bind", "b", "/b", "/pb")]));
    }

    #[test]
    fn moving_between_implementations_counts_as_unchanged() {
        let cached = map(&[("bind", "a", "/a", "/pa")]);
        let desired = map(&[("guest", "a", "/a", "/pa")]);
        assert!(!diff(&cached, &desired).changed());
    }

    const TWO_FOLDERS: &str = r#"
config_version = 1
[[machine]]
name = "web"
image = "alpine"
[[machine.synced_folder]]
host = "src"
guest = "/srv/src"
[[machine.synced_folder]]
host = "data"
guest = "/srv/data"
"#;

    #[test]
    fn enable_warns_only_when_cached_set_changes() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let registry = Arc::new(registry_with(&recorder, None));
        let ui = RecordingUi::new();

        let web = machine(dir.path(), TWO_FOLDERS, "web", &registry);
        enable(&web, &registry, &ui).unwrap();
        assert!(ui.at(UiLevel::Warn).is_empty());
        enable(&web, &registry, &ui).unwrap();
        assert!(ui.at(UiLevel::Warn).is_empty());

        let changed = TWO_FOLDERS.replace("host = \"data\"", "host = \"other\"");
        let web = machine(dir.path(), &changed, "web", &registry);
        enable(&web, &registry, &ui).unwrap();
        assert_eq!(ui.at(UiLevel::Warn).len(), 1);
        assert!(recorder.calls().contains(&"disable /srv/data".to_owned()));

        let cached = web.folder_cache().load().unwrap();
        let host = &cached["rec"]
            .values()
            .find(|f| f.guest_path == "/srv/data")
            .unwrap()
            .host_path;
        assert_eq!(host, "/projects/demo/other");
    }

    #[test]
    fn default_skips_unusable_implementations() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let broken = Arc::new(Recorder {
            unusable: true,
            ..Recorder::default()
        });
        let registry = Arc::new(registry_with(&recorder, Some(broken.clone())));
        let web = machine(dir.path(), TWO_FOLDERS, "web", &registry);
        let desired = desired_folders(&web, &registry, &RecordingUi::new()).unwrap();
        assert_eq!(desired.keys().collect::<Vec<_>>(), vec!["rec"]);
        assert!(broken.calls().is_empty());
    }

    #[test]
    fn nothing_usable_skips_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let broken = Arc::new(Recorder {
            unusable: true,
            ..Recorder::default()
        });
        let mut registry = PluginRegistry::new();
        registry.register_synced_folder("broken", broken, 1, "test");
        let registry = Arc::new(registry);
        let ui = RecordingUi::new();
        let web = machine(dir.path(), TWO_FOLDERS, "web", &registry);
        assert!(desired_folders(&web, &registry, &ui).unwrap().is_empty());
        assert_eq!(ui.at(UiLevel::Warn).len(), 2);
    }

    #[test]
    fn explicit_type_must_exist_and_be_usable() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let broken = Arc::new(Recorder {
            unusable: true,
            ..Recorder::default()
        });
        let registry = Arc::new(registry_with(&recorder, Some(broken)));

        let typed = |kind: &str| {
            format!(
                "config_version = 1\n[[machine]]\nname = \"web\"\n[[machine.synced_folder]]\nhost = \".\"\nguest = \"/v\"\ntype = \"{kind}\"\n"
            )
        };
        let web = machine(dir.path(), &typed("nfs"), "web", &registry);
        assert!(matches!(
            desired_folders(&web, &registry, &RecordingUi::new()),
            Err(CoreError::SyncedFolderTypeUnknown { kind, .. }) if kind == "nfs"
        ));
        let web = machine(dir.path(), &typed("broken"), "web", &registry);
        assert!(matches!(
            desired_folders(&web, &registry, &RecordingUi::new()),
            Err(CoreError::SyncedFolderUnusable { .. })
        ));
    }

    #[test]
    fn cleanup_calls_used_implementations_and_clears_cache() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let registry = Arc::new(registry_with(&recorder, None));
        let web = machine(dir.path(), TWO_FOLDERS, "web", &registry);
        enable(&web, &registry, &RecordingUi::new()).unwrap();
        cleanup(&web, &registry).unwrap();
        assert!(recorder.calls().contains(&"cleanup".to_owned()));
        assert!(web.folder_cache().load().unwrap().is_empty());
    }

    const NESTED: &str = r#"
config_version = 1
[[machine]]
name = "app"
image = "alpine"
host_vm = "dockerhost"
[[machine.synced_folder]]
host = "src"
guest = "/srv/src"
[[machine]]
name = "dockerhost"
image = "vm"
"#;

    #[test]
    fn host_vm_folders_are_shared_once_and_removed_on_disable() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let registry = Arc::new(registry_with(&recorder, None));
        let ui = RecordingUi::new();
        let app = machine(dir.path(), NESTED, "app", &registry);
        let host = machine(dir.path(), NESTED, "dockerhost", &registry);

        let rewritten = sync_host_vm_folders(&app, &host, &registry, &ui).unwrap();
        let sync_id = app.host_vm_sync_id().unwrap();
        let proxied = rewritten.synced_folders[0].host_path.to_string_lossy().into_owned();
        assert!(proxied.starts_with(&format!("/var/lib/flotilla/{sync_id}/")));
        assert_eq!(recorder.calls().len(), 1);

        let again = sync_host_vm_folders(&app, &host, &registry, &ui).unwrap();
        assert_eq!(again.synced_folders[0].host_path, rewritten.synced_folders[0].host_path);
        assert_eq!(recorder.calls().len(), 1);

        let shared = host.folder_cache().load().unwrap();
        let entry = shared["rec"].values().next().unwrap();
        assert_eq!(entry.guest_path, proxied);
        assert_eq!(entry.host_path, "/projects/demo/src");
        assert_eq!(entry.extra.get(OWNER_KEY).map(String::as_str), Some("app"));

        disable_host_vm_folders(&app, &host, &registry).unwrap();
        assert_eq!(recorder.calls().last().unwrap(), &format!("disable {proxied}"));
        assert!(host.folder_cache().load().unwrap().is_empty());
    }

    #[test]
    fn host_enable_keeps_and_remounts_proxied_folders() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let registry = Arc::new(registry_with(&recorder, None));
        let ui = RecordingUi::new();
        let app = machine(dir.path(), NESTED, "app", &registry);
        let host = machine(dir.path(), NESTED, "dockerhost", &registry);

        let rewritten = sync_host_vm_folders(&app, &host, &registry, &ui).unwrap();
        let proxied = rewritten.synced_folders[0].host_path.to_string_lossy().into_owned();
        let shared = host.folder_cache().load().unwrap();

        enable(&host, &registry, &ui).unwrap();
        assert_eq!(host.folder_cache().load().unwrap(), shared);
        assert_eq!(recorder.calls().last().unwrap(), &format!("enable {proxied}"));
        assert!(ui.at(UiLevel::Warn).is_empty());
    }

    #[test]
    fn host_vm_sharing_skips_create_only_implementations() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Arc::new(Recorder::default());
        let create_only = Arc::new(Recorder {
            create_only: true,
            ..Recorder::default()
        });
        let mut registry = PluginRegistry::new();
        registry.register_synced_folder("rec", recorder.clone(), 5, "test");
        registry.register_synced_folder("at_create", create_only.clone(), 10, "test");
        let registry = Arc::new(registry);
        let app = machine(dir.path(), NESTED, "app", &registry);
        let host = machine(dir.path(), NESTED, "dockerhost", &registry);

        sync_host_vm_folders(&app, &host, &registry, &RecordingUi::new()).unwrap();
        assert!(create_only.calls().is_empty());
        assert_eq!(recorder.calls().len(), 1);
        let shared = host.folder_cache().load().unwrap();
        assert_eq!(shared.keys().collect::<Vec<_>>(), vec!["rec"]);
    }

    #[test]
    fn changed_create_only_folders_need_recreate() {
        let dir = tempfile::tempdir().unwrap();
        let create_only = Arc::new(Recorder {
            create_only: true,
            ..Recorder::default()
        });
        let mut registry = PluginRegistry::new();
        registry.register_synced_folder("at_create", create_only.clone(), 10, "test");
        let registry = Arc::new(registry);
        let ui = RecordingUi::new();

        let web = machine(dir.path(), TWO_FOLDERS, "web", &registry);
        let (desired, _) = create_mounts(&web, &registry, &ui).unwrap();
        remember(&web, &desired).unwrap();
        enable(&web, &registry, &ui).unwrap();

        let changed = TWO_FOLDERS.replace("host = \"data\"", "host = \"other\"");
        let web = machine(dir.path(), &changed, "web", &registry);
        assert!(matches!(
            enable(&web, &registry, &ui),
            Err(CoreError::SyncedFolderNeedsRecreate { kind, .. }) if kind == "at_create"
        ));
        assert!(!create_only.calls().iter().any(|c| c.starts_with("disable")));
    }
}
