//! Server session: lifecycle control over one display server under test.

use std::os::fd::OwnedFd;
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::shim::ServerModule;

/// The capability interface a display server backend exposes to the
/// harness. `ServerModule` implements it over the C ABI shim; tests can
/// implement it in-process.
///
/// `start`/`stop` carry no result: a backend that cannot start is
/// expected to fail loudly on its own. Socket creation is fallible and
/// optional: [`Error::NotSupported`](crate::Error::NotSupported) from
/// `create_client_socket` means the backend has no private-socket
/// support, which callers must treat as "use the ambient display", not
/// as a failure.
pub trait DisplayServer {
    fn start(&mut self);

    fn stop(&mut self);

    /// Return a connected client socket, ready to be handed to a
    /// Wayland connection.
    fn create_client_socket(&mut self) -> Result<OwnedFd>;
}

/// One server under test. Owns exactly one backend instance; the backend
/// is destroyed when the session is dropped, whichever way the test
/// exits.
pub struct Server {
    backend: Box<dyn DisplayServer>,
}

impl Server {
    /// Load a display server module from `path` and construct it with
    /// `args`. Fails if the module is missing any mandatory entry point.
    pub fn load(path: &Path, args: &[String]) -> Result<Self> {
        Ok(Self::with_backend(Box::new(ServerModule::load(path, args)?)))
    }

    /// Wrap an already-constructed backend.
    pub fn with_backend(backend: Box<dyn DisplayServer>) -> Self {
        Self { backend }
    }

    pub fn start(&mut self) {
        info!("starting display server");
        self.backend.start();
    }

    pub fn stop(&mut self) {
        info!("stopping display server");
        self.backend.stop();
    }

    /// Ask the backend for a private client socket. See
    /// [`DisplayServer::create_client_socket`] for the error contract.
    pub fn create_client_socket(&mut self) -> Result<OwnedFd> {
        self.backend.create_client_socket()
    }
}
