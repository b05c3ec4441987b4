//! Per-test fixture around a [`Server`].

use std::env;
use std::path::Path;

use tracing::info;

use crate::error::Result;
use crate::server::Server;

/// Environment variable naming the display server module to test.
pub const SERVER_MODULE_ENV: &str = "WAYCHECK_SERVER_MODULE";
/// Environment variable with whitespace-separated arguments for it.
pub const SERVER_ARGS_ENV: &str = "WAYCHECK_SERVER_ARGS";

/// Starts the server under test before a test body and stops it after,
/// including when the test body panics.
pub struct Fixture {
    server: Server,
    started: bool,
}

impl Fixture {
    /// Load the server module at `path` with `args`. The server is not
    /// started yet; call [`Fixture::set_up`].
    pub fn new(path: &Path, args: &[String]) -> Result<Self> {
        Ok(Self {
            server: Server::load(path, args)?,
            started: false,
        })
    }

    /// Build a fixture from `WAYCHECK_SERVER_MODULE` /
    /// `WAYCHECK_SERVER_ARGS`. Returns `Ok(None)` when no module is
    /// configured, so conformance tests can skip themselves instead of
    /// failing on machines without a server module.
    pub fn from_env() -> Result<Option<Self>> {
        let Some(module) = env::var_os(SERVER_MODULE_ENV) else {
            info!("{SERVER_MODULE_ENV} not set, no server module to test");
            return Ok(None);
        };
        let args: Vec<String> = env::var(SERVER_ARGS_ENV)
            .map(|args| args.split_whitespace().map(String::from).collect())
            .unwrap_or_default();
        Self::new(Path::new(&module), &args).map(Some)
    }

    pub fn set_up(&mut self) {
        self.server.start();
        self.started = true;
    }

    pub fn tear_down(&mut self) {
        if self.started {
            self.started = false;
            self.server.stop();
        }
    }

    pub fn the_server(&mut self) -> &mut Server {
        &mut self.server
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        // Runs on the unwind path too, so a failed test still stops its
        // server and the module handle is destroyed.
        self.tear_down();
    }
}
