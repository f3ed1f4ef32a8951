use crate::RuntimeError;
use std::collections::BTreeMap;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOptions {
    pub sudo: bool,
    pub env: BTreeMap<String, String>,
}

/// Command channel into a running guest.
pub trait Communicator: Send + Sync {
    fn ready(&self) -> bool;

    /// Run `command` in the guest, streaming each output line to `on_line`.
    /// Returns the command's exit code.
    fn execute(
        &self,
        command: &str,
        options: &ExecOptions,
        on_line: &mut dyn FnMut(OutputStream, &str),
    ) -> Result<i32, RuntimeError>;

    fn upload(&self, from: &Path, to: &str) -> Result<(), RuntimeError>;

    fn download(&self, from: &str, to: &Path) -> Result<(), RuntimeError>;
}
