//! External collaborators of the flotilla core.
//!
//! This crate defines the seams the orchestration core drives: the
//! `ProviderDriver` trait (container/VM lifecycle, networks, images), the
//! `Communicator` trait (command execution inside a running guest), host
//! network interface discovery, and local trigger script execution. The
//! `mock` driver is a complete in-process implementation used by tests and
//! by the `mock` provider.

pub mod communicator;
pub mod driver;
pub mod host;
pub mod mock;
pub mod script;

pub use communicator::{Communicator, ExecOptions, OutputStream};
pub use driver::{
    select_driver, BindMount, ConnectOptions, CreateParams, NetworkCreateOptions, NetworkInfo,
    PortPublication, ProviderDriver,
};
pub use host::{HostInterface, HostInterfaces, StaticInterfaces, SystemInterfaces};
pub use mock::{MockCommunicator, MockDriver};
pub use script::run_local;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("provider '{0}' is not available")]
    DriverUnavailable(String),
    #[error("provider operation '{op}' failed: {message}")]
    Driver { op: &'static str, message: String },
    #[error("machine '{0}' does not exist in the provider")]
    NotCreated(String),
    #[error("command execution failed: {0}")]
    ExecFailed(String),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl RuntimeError {
    pub fn driver(op: &'static str, message: impl Into<String>) -> Self {
        RuntimeError::Driver {
            op,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn driver_error_names_operation() {
        let e = RuntimeError::driver("create_network", "subnet overlaps");
        let msg = e.to_string();
        assert!(msg.contains("create_network"));
        assert!(msg.contains("subnet overlaps"));
    }
}
