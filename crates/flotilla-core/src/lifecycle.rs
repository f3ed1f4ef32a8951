use crate::builtin::{CHANGE_HOST_NAME, FORWARDED_PORTS};
use crate::engine::Services;
use crate::machine::Machine;
use crate::network::{NetworkPlan, NetworkProvisioner};
use crate::pipeline::{Action, Branch, Builder, Next, Pipeline};
use crate::synced_folders;
use crate::CoreError;
use flotilla_runtime::{BindMount, CreateParams, RuntimeError};
use flotilla_store::{FolderMap, Marker, MachineState};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Recording `to` after `from` is allowed. Every state may be recorded
/// again, and any state may move to or from `Unknown`.
pub fn validate_transition(from: MachineState, to: MachineState) -> Result<(), CoreError> {
    let valid = from == to
        || matches!(
            (from, to),
            (MachineState::NotCreated, MachineState::Preparing)
                | (
                    MachineState::Preparing,
                    MachineState::Stopped | MachineState::Running | MachineState::NotCreated
                )
                | (
                    MachineState::Stopped,
                    MachineState::Running | MachineState::NotCreated
                )
                | (
                    MachineState::Running,
                    MachineState::Stopped | MachineState::NotCreated
                )
                | (MachineState::Unknown, _)
                | (_, MachineState::Unknown)
        );

    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Up,
    Halt,
    Destroy,
    Reload,
    Build,
    Status,
}

impl Command {
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Up => "up",
            Command::Halt => "halt",
            Command::Destroy => "destroy",
            Command::Reload => "reload",
            Command::Build => "build",
            Command::Status => "status",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// Step names, usable as anchors by action hooks.
pub const VALIDATE: &str = "validate";
pub const REFRESH: &str = "refresh";
pub const ALREADY_RUNNING: &str = "already_running";
pub const CREATE_MACHINE: &str = "create_machine";
pub const HOST_VM: &str = "host_vm";
pub const BUILD_IMAGE: &str = "build_image";
pub const HOST_VM_FOLDERS: &str = "host_vm_folders";
pub const PREPARE: &str = "prepare";
pub const PREPARE_NETWORKS: &str = "prepare_networks";
pub const PREPARE_FOLDERS: &str = "prepare_folders";
pub const CREATE: &str = "create";
pub const CONNECT_NETWORKS: &str = "connect_networks";
pub const START: &str = "start";
pub const WAIT_FOR_COMMUNICATOR: &str = "wait_for_communicator";
pub const HOSTNAME: &str = "hostname";
pub const SYNCED_FOLDERS: &str = "synced_folders";
pub const STOP: &str = "stop";
pub const NOT_CREATED: &str = "not_created";
pub const DESTROY: &str = "destroy";
pub const TEARDOWN_NETWORKS: &str = "teardown_networks";
pub const REMOVE_IMAGE: &str = "remove_image";
pub const FOLDER_CLEANUP: &str = "folder_cleanup";
pub const HOST_VM_FOLDERS_DISABLE: &str = "host_vm_folders_disable";
pub const CLEAR_ID: &str = "clear_id";
pub const REPORT: &str = "report";

/// Context threaded through a lifecycle pipeline.
pub struct ActionEnv {
    pub machine: Machine,
    pub services: Arc<Services>,
    pub command: Command,
    pub state: MachineState,
    pub image: Option<String>,
    pub networks: Option<NetworkPlan>,
    pub folders: Option<FolderMap>,
    pub mounts: Vec<BindMount>,
    /// Steps an earlier step decided must not run.
    pub skip: HashSet<&'static str>,
}

impl ActionEnv {
    pub fn new(machine: Machine, services: Arc<Services>, command: Command) -> Self {
        Self {
            machine,
            services,
            command,
            state: MachineState::Unknown,
            image: None,
            networks: None,
            folders: None,
            mounts: Vec::new(),
            skip: HashSet::new(),
        }
    }

    fn id(&self) -> Result<String, CoreError> {
        self.machine
            .id()?
            .ok_or_else(|| RuntimeError::NotCreated(self.machine.name.clone()).into())
    }

    fn provisioner(&self) -> NetworkProvisioner<'_> {
        NetworkProvisioner::new(
            self.machine.driver.as_ref(),
            self.services.prompt.as_ref(),
            self.services.interfaces.as_ref(),
            &self.services.locks,
        )
    }
}

/// The default step list for `command`, before plugin hooks.
pub fn builder(command: Command) -> Builder<ActionEnv> {
    let mut b = Builder::new();
    match command {
        Command::Up => add_up(&mut b),
        Command::Halt => add_halt(&mut b),
        Command::Destroy => {
            b.use_fn(REFRESH, refresh)
                .use_fn(NOT_CREATED, not_created)
                .use_fn(STOP, stop)
                .use_fn(DESTROY, destroy)
                .use_fn(TEARDOWN_NETWORKS, teardown_networks)
                .use_fn(REMOVE_IMAGE, remove_image)
                .use_fn(FOLDER_CLEANUP, folder_cleanup)
                .use_fn(HOST_VM_FOLDERS_DISABLE, host_vm_folders_disable)
                .use_fn(CLEAR_ID, clear_id);
        }
        Command::Reload => {
            add_halt(&mut b);
            add_up(&mut b);
        }
        Command::Build => {
            b.use_fn(BUILD_IMAGE, build_image).use_fn(REPORT, report_image);
        }
        Command::Status => {
            b.use_fn(REFRESH, refresh).use_fn(REPORT, report_state);
        }
    }
    b
}

fn add_up(b: &mut Builder<ActionEnv>) {
    b.use_fn(VALIDATE, validate)
        .use_fn(ALREADY_RUNNING, already_running)
        .use_fn(HOST_VM, host_vm)
        .use_fn(HOST_VM_FOLDERS, host_vm_folders)
        .use_factory(CREATE_MACHINE, |initial| {
            let mut create = Builder::new();
            create
                .use_fn(BUILD_IMAGE, build_image)
                .use_fn(PREPARE, prepare)
                .use_fn(PREPARE_NETWORKS, prepare_networks)
                .use_fn(PREPARE_FOLDERS, prepare_folders)
                .use_fn(CREATE, create_machine)
                .use_fn(CONNECT_NETWORKS, connect_networks);
            let branch: Box<dyn Action<ActionEnv>> = Box::new(Branch::new(
                CREATE_MACHINE,
                |env: &ActionEnv| env.state == MachineState::NotCreated,
                create.build(initial),
                Builder::new().build(initial),
            ));
            branch
        })
        .use_fn(START, start)
        .use_fn(WAIT_FOR_COMMUNICATOR, wait_for_communicator)
        .use_fn(HOSTNAME, hostname)
        .use_fn(SYNCED_FOLDERS, enable_folders);
}

fn add_halt(b: &mut Builder<ActionEnv>) {
    b.use_fn(REFRESH, refresh).use_fn(STOP, stop);
}

/// Build the pipeline for `command` with plugin hooks applied.
pub fn pipeline(command: Command, initial: &ActionEnv) -> Result<Pipeline<ActionEnv>, CoreError> {
    let mut b = builder(command);
    initial.services.registry.apply_hooks(command, &mut b)?;
    Ok(b.build(initial))
}

/// Run `command` on `machine` and return the final context.
pub fn run(
    command: Command,
    machine: Machine,
    services: &Arc<Services>,
) -> Result<ActionEnv, CoreError> {
    let mut env = ActionEnv::new(machine, Arc::clone(services), command);
    let pipeline = pipeline(command, &env)?;
    pipeline.run(&mut env)?;
    Ok(env)
}

type StepResult = Result<(), CoreError>;

/// Query the driver and record what it reports. A failed query is recorded
/// as `Unknown`.
fn refresh(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    let state = match env.machine.state() {
        Ok(state) => state,
        Err(e) => {
            env.services.observe(&env.machine, MachineState::Unknown)?;
            return Err(e);
        }
    };
    env.services.observe(&env.machine, state)?;
    env.state = state;
    next.run(env)
}

fn validate(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    let config = &env.machine.config;
    if config.image.is_none() && config.build.is_none() {
        return Err(CoreError::NoImage(env.machine.name.clone()));
    }
    refresh(env, next)
}

fn already_running(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    if env.state == MachineState::Running {
        env.services
            .ui
            .info(&format!("{}: machine is already running.", env.machine.name));
        return Ok(());
    }
    next.run(env)
}

/// Bring the host VM up, serialized across processes.
fn host_vm(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    if let Some(host_name) = env.machine.config.host_vm.clone() {
        let services = Arc::clone(&env.services);
        let host = services.machine(&host_name)?;
        services
            .locks
            .with_lock(&format!("host-vm-{host_name}"), || {
                if host.state()? == MachineState::Running {
                    debug!("host VM '{host_name}' already running");
                    return Ok(());
                }
                services
                    .ui
                    .info(&format!("{}: booting host VM '{host_name}'", env.machine.name));
                run(Command::Up, host, &services).map(|_| ())
            })?;
    }
    next.run(env)
}

fn build_image(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    let machine = &env.machine;
    let image = match (&machine.config.build, &machine.config.image) {
        (Some(build), _) => {
            let cached = match machine.markers().read(Marker::Image)? {
                Some(id) if machine.driver.image_exists(&id)? => Some(id),
                _ => None,
            };
            match cached {
                Some(id) => {
                    debug!("{}: using cached image {id}", machine.name);
                    id
                }
                None => {
                    env.services.ui.info(&format!(
                        "{}: building image from {}",
                        machine.name,
                        build.dir.display()
                    ));
                    let id = machine.driver.build_image(&build.dir, &build.args)?;
                    machine.markers().write(Marker::Image, &id)?;
                    id
                }
            }
        }
        (None, Some(image)) => image.clone(),
        (None, None) => return Err(CoreError::NoImage(machine.name.clone())),
    };
    env.image = Some(image);
    next.run(env)
}

fn host_vm_folders(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    if let Some(host_name) = env.machine.config.host_vm.clone() {
        let host = env.services.machine(&host_name)?;
        env.machine.config = synced_folders::sync_host_vm_folders(
            &env.machine,
            &host,
            &env.services.registry,
            env.services.ui.as_ref(),
        )?;
    }
    next.run(env)
}

/// Mark the machine as being prepared; fall back to `NotCreated` when
/// creation fails before the provider assigned an id.
fn prepare(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    env.services
        .transition(&env.machine, MachineState::Preparing)?;
    env.state = MachineState::Preparing;
    let result = next.run(env);
    if result.is_err() && matches!(env.machine.id(), Ok(None)) {
        if let Err(e) = env
            .services
            .observe(&env.machine, MachineState::NotCreated)
        {
            warn!("{}: could not reset state: {e}", env.machine.name);
        }
    }
    result
}

fn prepare_networks(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    let plan = env.provisioner().plan(&env.machine.config)?;
    env.networks = Some(plan);
    next.run(env)
}

fn prepare_folders(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    let (folders, mounts) = synced_folders::create_mounts(
        &env.machine,
        &env.services.registry,
        env.services.ui.as_ref(),
    )?;
    env.folders = Some(folders);
    env.mounts = mounts;
    next.run(env)
}

fn create_machine(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    let config = &env.machine.config;
    let image = env
        .image
        .clone()
        .ok_or_else(|| CoreError::NoImage(env.machine.name.clone()))?;
    let params = CreateParams {
        name: env.machine.name.clone(),
        image,
        hostname: config.hostname.clone(),
        env: config.env.clone(),
        ports: env
            .networks
            .as_ref()
            .map(|plan| plan.ports.clone())
            .unwrap_or_default(),
        mounts: env.mounts.clone(),
    };
    info!("{}: creating machine", env.machine.name);
    let id = env.machine.driver.create(&params)?;
    env.machine.set_id(Some(&id))?;
    if let Some(folders) = &env.folders {
        synced_folders::remember(&env.machine, folders)?;
    }
    env.services
        .transition(&env.machine, MachineState::Stopped)?;
    env.state = MachineState::Stopped;
    next.run(env)
}

fn connect_networks(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    if let Some(plan) = env.networks.clone() {
        let id = env.id()?;
        let connected = env.provisioner().realize(&plan, &id)?;
        env.services.record_networks(&env.machine, connected)?;
    }
    next.run(env)
}

fn start(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    if env.state != MachineState::Running {
        let id = env.id()?;
        env.services
            .ui
            .info(&format!("{}: starting machine", env.machine.name));
        env.machine.driver.start(&id)?;
        env.services
            .transition(&env.machine, MachineState::Running)?;
        env.state = MachineState::Running;
        report_forwarded_ports(env)?;
    }
    next.run(env)
}

fn report_forwarded_ports(env: &ActionEnv) -> StepResult {
    let provider = env.machine.provider();
    if !provider.has(FORWARDED_PORTS) {
        return Ok(());
    }
    let ports = provider.call(FORWARDED_PORTS, &env.machine, &[])?;
    for port in ports.as_array().into_iter().flatten() {
        env.services.ui.info(&format!(
            "{}: forwarding {}/{} (guest) => {} (host)",
            env.machine.name,
            port["guest"],
            port["protocol"].as_str().unwrap_or("tcp"),
            port["host"],
        ));
    }
    Ok(())
}

fn wait_for_communicator(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    let ready = env.machine.communicator()?.is_some_and(|c| c.ready());
    if !ready {
        env.services.ui.warn(&format!(
            "{}: no communicator available, skipping guest configuration",
            env.machine.name
        ));
        env.skip.insert(HOSTNAME);
        env.skip.insert(SYNCED_FOLDERS);
    }
    next.run(env)
}

fn hostname(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    if !env.skip.contains(HOSTNAME) {
        if let Some(name) = env.machine.config.hostname.clone() {
            env.machine
                .guest()
                .call(CHANGE_HOST_NAME, &env.machine, &[Value::from(name)])?;
        }
    }
    next.run(env)
}

fn enable_folders(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    if !env.skip.contains(SYNCED_FOLDERS) {
        let folders = synced_folders::enable(
            &env.machine,
            &env.services.registry,
            env.services.ui.as_ref(),
        )?;
        env.folders = Some(folders);
    }
    next.run(env)
}

fn stop(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    if env.state == MachineState::Running {
        let id = env.id()?;
        env.services
            .ui
            .info(&format!("{}: stopping machine", env.machine.name));
        let timeout = Duration::from_secs(env.machine.config.stop_timeout);
        env.machine.driver.stop(&id, timeout)?;
        env.services
            .transition(&env.machine, MachineState::Stopped)?;
        env.state = MachineState::Stopped;
    } else if env.command == Command::Halt {
        env.services
            .ui
            .info(&format!("{}: machine is not running.", env.machine.name));
    }
    next.run(env)
}

fn not_created(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    if env.state == MachineState::NotCreated {
        env.services
            .ui
            .info(&format!("{}: machine is not created.", env.machine.name));
        return Ok(());
    }
    next.run(env)
}

fn destroy(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    let id = env.id()?;
    env.services
        .ui
        .info(&format!("{}: destroying machine", env.machine.name));
    env.machine.driver.destroy(&id)?;
    next.run(env)
}

fn teardown_networks(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    let networks = env.services.networks(&env.machine)?;
    let removed = env.provisioner().teardown(&networks)?;
    debug!("{}: removed networks {removed:?}", env.machine.name);
    env.services.record_networks(&env.machine, Vec::new())?;
    next.run(env)
}

fn remove_image(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    let markers = env.machine.markers();
    if let Some(image) = markers.read(Marker::Image)? {
        if env.machine.driver.image_exists(&image)? {
            env.machine.driver.remove_image(&image)?;
        }
        markers.clear(Marker::Image)?;
    }
    next.run(env)
}

fn folder_cleanup(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    synced_folders::cleanup(&env.machine, &env.services.registry)?;
    next.run(env)
}

fn host_vm_folders_disable(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    if let Some(host_name) = env.machine.config.host_vm.clone() {
        let host = env.services.machine(&host_name)?;
        synced_folders::disable_host_vm_folders(&env.machine, &host, &env.services.registry)?;
    }
    next.run(env)
}

fn clear_id(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    env.machine.set_id(None)?;
    env.services
        .transition(&env.machine, MachineState::NotCreated)?;
    env.state = MachineState::NotCreated;
    next.run(env)
}

fn report_image(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    if let Some(image) = &env.image {
        env.services
            .ui
            .info(&format!("{}: image {image}", env.machine.name));
    }
    next.run(env)
}

fn report_state(env: &mut ActionEnv, next: Next<'_, ActionEnv>) -> StepResult {
    env.services
        .ui
        .info(&format!("{}: {}", env.machine.name, env.state));
    next.run(env)
}
