use crate::lifecycle::{ActionEnv, Command};
use crate::machine::Machine;
use crate::pipeline::Builder;
use crate::synced_folders::SyncedFolder;
use crate::CoreError;
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Category of thing a capability applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SubjectKind {
    Provider,
    Guest,
    Host,
    SyncedFolder,
}

impl fmt::Display for SubjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubjectKind::Provider => write!(f, "provider"),
            SubjectKind::Guest => write!(f, "guest"),
            SubjectKind::Host => write!(f, "host"),
            SubjectKind::SyncedFolder => write!(f, "synced_folder"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Registration<T> {
    pub implementation: T,
    pub priority: i32,
    pub plugin: String,
    order: u64,
}

/// Candidate implementations keyed by `(subject kind, name)`.
///
/// Resolution picks the highest priority; equal priorities resolve to the
/// earliest registration.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry<T> {
    entries: HashMap<(SubjectKind, String), Vec<Registration<T>>>,
    next_order: u64,
}

impl<T> Default for CapabilityRegistry<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            next_order: 0,
        }
    }
}

impl<T> CapabilityRegistry<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-registering the same `(kind, name, plugin)` replaces the entry and
    /// keeps its original registration position.
    pub fn register(
        &mut self,
        kind: SubjectKind,
        name: &str,
        implementation: T,
        priority: i32,
        plugin: &str,
    ) {
        let list = self.entries.entry((kind, name.to_owned())).or_default();
        if let Some(existing) = list.iter_mut().find(|r| r.plugin == plugin) {
            existing.implementation = implementation;
            existing.priority = priority;
            return;
        }
        list.push(Registration {
            implementation,
            priority,
            plugin: plugin.to_owned(),
            order: self.next_order,
        });
        self.next_order += 1;
    }

    /// All registrations for `(kind, name)` in resolution order.
    pub fn candidates(&self, kind: SubjectKind, name: &str) -> Vec<&Registration<T>> {
        let mut list: Vec<&Registration<T>> = self
            .entries
            .get(&(kind, name.to_owned()))
            .map(|l| l.iter().collect())
            .unwrap_or_default();
        list.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.order.cmp(&b.order)));
        list
    }

    pub fn resolve(&self, kind: SubjectKind, name: &str) -> Result<&T, CoreError> {
        self.candidates(kind, name)
            .first()
            .map(|r| &r.implementation)
            .ok_or_else(|| CoreError::CapabilityNotFound {
                kind,
                name: name.to_owned(),
            })
    }

    pub fn has(&self, kind: SubjectKind, name: &str) -> bool {
        self.entries
            .get(&(kind, name.to_owned()))
            .is_some_and(|l| !l.is_empty())
    }

    /// Registered names of `kind`, ordered by their best registration.
    pub fn names(&self, kind: SubjectKind) -> Vec<&str> {
        let mut names: Vec<(&str, i32, u64)> = self
            .entries
            .iter()
            .filter(|((k, _), list)| *k == kind && !list.is_empty())
            .filter_map(|((_, name), _)| {
                let best = *self.candidates(kind, name).first()?;
                Some((name.as_str(), best.priority, best.order))
            })
            .collect();
        names.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
        names.into_iter().map(|(n, _, _)| n).collect()
    }

    /// First usable name of `kind`.
    ///
    /// Candidates are ordered by priority, or by `allow_list` when given (names
    /// missing from the registry are ignored). Returns `None` when nothing is
    /// usable.
    pub fn select_default(
        &self,
        kind: SubjectKind,
        allow_list: Option<&[String]>,
        mut usable: impl FnMut(&str, &T) -> bool,
    ) -> Option<String> {
        let ordered: Vec<&str> = match allow_list {
            Some(allowed) => allowed
                .iter()
                .map(String::as_str)
                .filter(|n| self.has(kind, n))
                .collect(),
            None => self.names(kind),
        };
        for name in ordered {
            let Ok(implementation) = self.resolve(kind, name) else {
                continue;
            };
            if usable(name, implementation) {
                debug!("selected {kind} implementation '{name}'");
                return Some(name.to_owned());
            }
            debug!("{kind} implementation '{name}' is not usable");
        }
        None
    }
}

/// A capability implementation. Receives the calling machine and arguments.
pub type CapabilityFn =
    Arc<dyn Fn(&Machine, &[Value]) -> Result<Value, CoreError> + Send + Sync>;

/// Edits a lifecycle pipeline before it is built.
pub type ActionHook =
    Arc<dyn Fn(Command, &mut Builder<ActionEnv>) -> Result<(), CoreError> + Send + Sync>;

/// Everything plugins contribute, built once at startup and then shared
/// read-only.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    pub capabilities: CapabilityRegistry<CapabilityFn>,
    pub synced_folders: CapabilityRegistry<Arc<dyn SyncedFolder>>,
    hooks: Vec<ActionHook>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in plugins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::builtin::register(&mut registry);
        registry
    }

    pub fn register_capability(
        &mut self,
        kind: SubjectKind,
        name: &str,
        implementation: CapabilityFn,
        priority: i32,
        plugin: &str,
    ) {
        self.capabilities
            .register(kind, name, implementation, priority, plugin);
    }

    pub fn register_synced_folder(
        &mut self,
        name: &str,
        implementation: Arc<dyn SyncedFolder>,
        priority: i32,
        plugin: &str,
    ) {
        self.synced_folders.register(
            SubjectKind::SyncedFolder,
            name,
            implementation,
            priority,
            plugin,
        );
    }

    pub fn add_action_hook(&mut self, hook: ActionHook) {
        self.hooks.push(hook);
    }

    pub(crate) fn apply_hooks(
        &self,
        command: Command,
        builder: &mut Builder<ActionEnv>,
    ) -> Result<(), CoreError> {
        for hook in &self.hooks {
            hook(command, builder)?;
        }
        Ok(())
    }
}

/// Resolves and invokes capabilities of one subject kind.
#[derive(Clone)]
pub struct CapabilityHost {
    kind: SubjectKind,
    registry: Arc<PluginRegistry>,
}

impl CapabilityHost {
    pub fn new(kind: SubjectKind, registry: Arc<PluginRegistry>) -> Self {
        Self { kind, registry }
    }

    pub fn kind(&self) -> SubjectKind {
        self.kind
    }

    pub fn has(&self, name: &str) -> bool {
        self.registry.capabilities.has(self.kind, name)
    }

    /// Errors from the implementation propagate unchanged.
    pub fn call(&self, name: &str, machine: &Machine, args: &[Value]) -> Result<Value, CoreError> {
        let capability = self.registry.capabilities.resolve(self.kind, name)?;
        debug!("calling {} capability '{name}' for {}", self.kind, machine.name);
        capability(machine, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_priority_then_registration_order() {
        let mut reg = CapabilityRegistry::new();
        reg.register(SubjectKind::Guest, "mount", "low", 1, "a");
        reg.register(SubjectKind::Guest, "mount", "first-high", 5, "b");
        reg.register(SubjectKind::Guest, "mount", "second-high", 5, "c");
        for _ in 0..3 {
            assert_eq!(*reg.resolve(SubjectKind::Guest, "mount").unwrap(), "first-high");
        }
        let order: Vec<_> = reg
            .candidates(SubjectKind::Guest, "mount")
            .iter()
            .map(|r| r.implementation)
            .collect();
        assert_eq!(order, vec!["first-high", "second-high", "low"]);
    }

    #[test]
    fn reregistration_replaces_in_place() {
        let mut reg = CapabilityRegistry::new();
        reg.register(SubjectKind::Host, "nfs", "v1", 5, "a");
        reg.register(SubjectKind::Host, "nfs", "other", 5, "b");
        reg.register(SubjectKind::Host, "nfs", "v2", 5, "a");
        assert_eq!(reg.candidates(SubjectKind::Host, "nfs").len(), 2);
        assert_eq!(*reg.resolve(SubjectKind::Host, "nfs").unwrap(), "v2");
    }

    #[test]
    fn resolve_is_scoped_by_kind() {
        let mut reg = CapabilityRegistry::new();
        reg.register(SubjectKind::Guest, "halt", 1, 0, "a");
        assert!(reg.has(SubjectKind::Guest, "halt"));
        assert!(!reg.has(SubjectKind::Provider, "halt"));
        assert!(matches!(
            reg.resolve(SubjectKind::Provider, "halt"),
            Err(CoreError::CapabilityNotFound { kind: SubjectKind::Provider, .. })
        ));
    }

    #[test]
    fn select_default_orders_by_priority() {
        let mut reg = CapabilityRegistry::new();
        reg.register(SubjectKind::SyncedFolder, "rsync", 0, 3, "a");
        reg.register(SubjectKind::SyncedFolder, "nfs", 0, 8, "b");
        reg.register(SubjectKind::SyncedFolder, "smb", 0, 8, "c");
        assert_eq!(
            reg.names(SubjectKind::SyncedFolder),
            vec!["nfs", "smb", "rsync"]
        );
        let picked = reg.select_default(SubjectKind::SyncedFolder, None, |n, _| n != "nfs");
        assert_eq!(picked.as_deref(), Some("smb"));
    }

    #[test]
    fn select_default_honors_allow_list() {
        let mut reg = CapabilityRegistry::new();
        reg.register(SubjectKind::SyncedFolder, "nfs", 0, 8, "a");
        reg.register(SubjectKind::SyncedFolder, "rsync", 0, 3, "b");
        let allow = vec!["missing".to_owned(), "rsync".to_owned(), "nfs".to_owned()];
        let picked = reg.select_default(SubjectKind::SyncedFolder, Some(&allow), |_, _| true);
        assert_eq!(picked.as_deref(), Some("rsync"));
    }

    #[test]
    fn select_default_never_returns_unusable() {
        let mut reg = CapabilityRegistry::new();
        reg.register(SubjectKind::SyncedFolder, "nfs", 0, 8, "a");
        reg.register(SubjectKind::SyncedFolder, "rsync", 0, 3, "b");
        let mut seen = Vec::new();
        let picked = reg.select_default(SubjectKind::SyncedFolder, None, |n, _| {
            seen.push(n.to_owned());
            false
        });
        assert_eq!(picked, None);
        assert_eq!(seen, vec!["nfs", "rsync"]);
    }
}
