use crate::capability::PluginRegistry;
use crate::concurrency::ResourceLocks;
use crate::lifecycle::{self, validate_transition, Command};
use crate::machine::Machine;
use crate::prompt::{DefaultPrompt, Prompt};
use crate::triggers::{TriggerEngine, TriggerReport};
use crate::ui::{LogUi, Ui};
use crate::CoreError;
use flotilla_runtime::{
    select_driver, HostInterfaces, ProviderDriver, RuntimeError, SystemInterfaces,
};
use flotilla_schema::{Project, Stage};
use flotilla_store::{MachineRecord, MachineState, MetadataStore, StoreLayout};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

/// Directory under the project root holding flotilla's store.
pub const STORE_DIR: &str = ".flotilla";

type DriverFactory =
    Box<dyn Fn(&str, &Path) -> Result<Arc<dyn ProviderDriver>, RuntimeError> + Send + Sync>;

/// Everything lifecycle steps share: the project, the store, plugins, and
/// the host-side collaborators.
pub struct Services {
    pub project: Project,
    pub layout: StoreLayout,
    pub registry: Arc<PluginRegistry>,
    pub ui: Arc<dyn Ui>,
    pub prompt: Arc<dyn Prompt>,
    pub interfaces: Arc<dyn HostInterfaces>,
    pub locks: ResourceLocks,
    drivers: Mutex<HashMap<String, Arc<dyn ProviderDriver>>>,
    factory: DriverFactory,
}

impl Services {
    /// The driver for `provider`, created on first use.
    pub fn driver(&self, provider: &str) -> Result<Arc<dyn ProviderDriver>, CoreError> {
        let mut drivers = self
            .drivers
            .lock()
            .map_err(|e| RuntimeError::driver("select", format!("driver cache poisoned: {e}")))?;
        if let Some(driver) = drivers.get(provider) {
            return Ok(Arc::clone(driver));
        }
        let state = self
            .layout
            .root()
            .join("providers")
            .join(format!("{provider}.json"));
        let driver = (self.factory)(provider, &state)?;
        debug!("initialized provider '{provider}'");
        drivers.insert(provider.to_owned(), Arc::clone(&driver));
        Ok(driver)
    }

    pub fn machine(&self, name: &str) -> Result<Machine, CoreError> {
        let config = self
            .project
            .machine(name)
            .ok_or_else(|| CoreError::MachineNotFound(name.to_owned()))?
            .clone();
        let driver = self.driver(&config.provider)?;
        Machine::new(config, &self.layout, &self.project.root, driver, &self.registry)
    }

    pub fn metadata(&self) -> MetadataStore {
        MetadataStore::new(self.layout.clone())
    }

    fn record(&self, machine: &Machine) -> Result<MachineRecord, CoreError> {
        Ok(self
            .metadata()
            .find(&machine.name)?
            .unwrap_or_else(|| MachineRecord::new(&machine.name, &machine.config.provider)))
    }

    fn save(&self, mut record: MachineRecord) -> Result<(), CoreError> {
        record.updated_at = chrono::Utc::now().to_rfc3339();
        self.metadata().put(&record)?;
        Ok(())
    }

    /// Record a state reported by the driver.
    pub fn observe(&self, machine: &Machine, state: MachineState) -> Result<(), CoreError> {
        let mut record = self.record(machine)?;
        if record.state == state {
            return Ok(());
        }
        debug!("{}: observed {} (was {})", machine.name, state, record.state);
        record.state = state;
        self.save(record)
    }

    /// Record a state change made by a lifecycle step.
    pub fn transition(&self, machine: &Machine, to: MachineState) -> Result<(), CoreError> {
        let mut record = self.record(machine)?;
        validate_transition(record.state, to)?;
        info!("{}: {} -> {}", machine.name, record.state, to);
        record.state = to;
        self.save(record)
    }

    pub fn networks(&self, machine: &Machine) -> Result<Vec<String>, CoreError> {
        Ok(self.record(machine)?.networks)
    }

    pub fn record_networks(&self, machine: &Machine, networks: Vec<String>) -> Result<(), CoreError> {
        let mut record = self.record(machine)?;
        record.networks = networks;
        self.save(record)
    }
}

pub struct EngineBuilder {
    project: Project,
    store_root: Option<PathBuf>,
    registry: Option<Arc<PluginRegistry>>,
    ui: Arc<dyn Ui>,
    prompt: Arc<dyn Prompt>,
    interfaces: Arc<dyn HostInterfaces>,
    lock_retry_delay: Option<Duration>,
    drivers: HashMap<String, Arc<dyn ProviderDriver>>,
}

impl EngineBuilder {
    pub fn new(project: Project) -> Self {
        Self {
            project,
            store_root: None,
            registry: None,
            ui: Arc::new(LogUi),
            prompt: Arc::new(DefaultPrompt),
            interfaces: Arc::new(SystemInterfaces),
            lock_retry_delay: None,
            drivers: HashMap::new(),
        }
    }

    /// Defaults to `<project root>/.flotilla`.
    pub fn store_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.store_root = Some(root.into());
        self
    }

    /// Defaults to the built-in plugins.
    pub fn registry(mut self, registry: PluginRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    pub fn ui(mut self, ui: Arc<dyn Ui>) -> Self {
        self.ui = ui;
        self
    }

    pub fn prompt(mut self, prompt: Arc<dyn Prompt>) -> Self {
        self.prompt = prompt;
        self
    }

    pub fn host_interfaces(mut self, interfaces: Arc<dyn HostInterfaces>) -> Self {
        self.interfaces = interfaces;
        self
    }

    pub fn lock_retry_delay(mut self, delay: Duration) -> Self {
        self.lock_retry_delay = Some(delay);
        self
    }

    /// Use `driver` for machines whose provider is `name`.
    pub fn driver(mut self, name: &str, driver: Arc<dyn ProviderDriver>) -> Self {
        self.drivers.insert(name.to_owned(), driver);
        self
    }

    pub fn build(self) -> Result<Engine, CoreError> {
        let root = self
            .store_root
            .unwrap_or_else(|| self.project.root.join(STORE_DIR));
        let layout = StoreLayout::new(&root);
        layout.initialize()?;

        let mut locks = ResourceLocks::new(layout.locks_dir());
        if let Some(delay) = self.lock_retry_delay {
            locks = locks.with_retry_delay(delay);
        }

        let services = Arc::new(Services {
            project: self.project,
            layout,
            registry: self
                .registry
                .unwrap_or_else(|| Arc::new(PluginRegistry::with_builtins())),
            ui: Arc::clone(&self.ui),
            prompt: self.prompt,
            interfaces: self.interfaces,
            locks,
            drivers: Mutex::new(self.drivers),
            factory: Box::new(select_driver),
        });

        Ok(Engine {
            triggers: TriggerEngine::new(self.ui),
            services,
        })
    }
}

/// What one command did to one machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MachineReport {
    pub name: String,
    pub state: MachineState,
    pub before: TriggerReport,
    pub after: TriggerReport,
}

/// Runs lifecycle commands for the machines of a project.
pub struct Engine {
    services: Arc<Services>,
    triggers: TriggerEngine,
}

impl Engine {
    pub fn services(&self) -> &Arc<Services> {
        &self.services
    }

    pub fn machine(&self, name: &str) -> Result<Machine, CoreError> {
        self.services.machine(name)
    }

    /// Machines named in `names`, in declaration order; all machines when
    /// `names` is empty.
    fn select(&self, names: &[String]) -> Result<Vec<Machine>, CoreError> {
        let project = &self.services.project;
        if let Some(missing) = names.iter().find(|n| project.machine(n).is_none()) {
            return Err(CoreError::MachineNotFound(missing.clone()));
        }
        project
            .machines
            .iter()
            .filter(|m| names.is_empty() || names.contains(&m.name))
            .map(|m| self.services.machine(&m.name))
            .collect()
    }

    /// Run `command` on each selected machine: before triggers, the
    /// lifecycle pipeline, then after triggers. The first error stops the
    /// run.
    pub fn run(&self, command: Command, names: &[String]) -> Result<Vec<MachineReport>, CoreError> {
        let mut reports = Vec::new();
        for machine in self.select(names)? {
            let before = self.triggers.fire(Stage::Before, command, &machine)?;
            let env = lifecycle::run(command, machine.clone(), &self.services)?;
            let after = self.triggers.fire(Stage::After, command, &machine)?;
            reports.push(MachineReport {
                name: machine.name.clone(),
                state: env.state,
                before,
                after,
            });
        }
        Ok(reports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::RecordingUi;
    use flotilla_runtime::MockDriver;
    use flotilla_schema::parse_project_str;

    fn project(dir: &Path, toml: &str) -> Project {
        parse_project_str(toml).unwrap().finalize(dir).unwrap()
    }

    const TWO: &str = r#"
config_version = 1
[[machine]]
name = "web"
image = "nginx"
[[machine]]
name = "db"
image = "postgres"
"#;

    fn engine(dir: &Path, driver: Arc<MockDriver>) -> (Engine, Arc<RecordingUi>) {
        let ui = Arc::new(RecordingUi::new());
        let engine = EngineBuilder::new(project(dir, TWO))
            .ui(ui.clone())
            .driver("mock", driver)
            .build()
            .unwrap();
        (engine, ui)
    }

    #[test]
    fn store_defaults_under_project_root() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path(), Arc::new(MockDriver::new()));
        assert_eq!(engine.services().layout.root(), dir.path().join(STORE_DIR));
        assert!(dir.path().join(STORE_DIR).join("locks").is_dir());
    }

    #[test]
    fn unknown_machine_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path(), Arc::new(MockDriver::new()));
        let err = engine
            .run(Command::Status, &["cache".to_owned()])
            .unwrap_err();
        assert!(matches!(err, CoreError::MachineNotFound(n) if n == "cache"));
    }

    #[test]
    fn runs_in_declaration_order() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path(), Arc::new(MockDriver::new()));
        let reports = engine
            .run(Command::Status, &["db".to_owned(), "web".to_owned()])
            .unwrap();
        let names: Vec<_> = reports.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["web", "db"]);
        assert!(reports.iter().all(|r| r.state == MachineState::NotCreated));
    }

    #[test]
    fn transitions_are_validated_and_observations_are_not() {
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = engine(dir.path(), Arc::new(MockDriver::new()));
        let services = engine.services();
        let web = engine.machine("web").unwrap();

        assert!(matches!(
            services.transition(&web, MachineState::Running),
            Err(CoreError::InvalidTransition { .. })
        ));
        services.observe(&web, MachineState::Running).unwrap();
        assert_eq!(
            services.metadata().get("web").unwrap().state,
            MachineState::Running
        );
        services.transition(&web, MachineState::Stopped).unwrap();
    }

    #[test]
    fn status_failure_records_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let driver = Arc::new(MockDriver::new());
        let (engine, _) = engine(dir.path(), driver.clone());
        engine.run(Command::Up, &["web".to_owned()]).unwrap();

        driver.fail_on("running");
        assert!(engine.run(Command::Status, &["web".to_owned()]).is_err());
        assert_eq!(
            engine.services().metadata().get("web").unwrap().state,
            MachineState::Unknown
        );
    }

    #[test]
    fn unknown_provider_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let toml = "config_version = 1\n[[machine]]\nname = \"vm\"\nprovider = \"libvirt\"\nimage = \"x\"\n";
        let engine = EngineBuilder::new(project(dir.path(), toml))
            .ui(Arc::new(RecordingUi::new()))
            .build()
            .unwrap();
        assert!(matches!(
            engine.machine("vm"),
            Err(CoreError::Runtime(RuntimeError::DriverUnavailable(p))) if p == "libvirt"
        ));
    }
}
