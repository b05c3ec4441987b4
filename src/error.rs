//! Error taxonomy for the harness.
//!
//! Conformance tests care about exactly one distinction above all others:
//! a structured [`ProtocolError`] reported by the server under test versus
//! everything else. A negative test asserts on the former; any other
//! variant fails the test.

use std::io;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// A mandatory shim entry point is missing from the server module.
    /// Raised at construction, before any backend call is made.
    #[error("missing required symbol `{symbol}` in display server module")]
    MissingCapability { symbol: &'static str },

    /// The server module could not be loaded at all.
    #[error("failed to load display server module: {0}")]
    Module(#[from] libloading::Error),

    /// An optional shim capability is absent. Recoverable: callers are
    /// expected to have an explicit fallback path.
    #[error("capability not implemented by display server module")]
    NotSupported,

    /// No Wayland connection could be established by any path.
    #[error("failed to connect to Wayland socket: {0}")]
    Connect(#[from] wayland_client::ConnectError),

    /// Transport-level failure: bad descriptor, dispatch I/O error,
    /// backend socket-creation failure. Carries the OS error code.
    #[error("error while talking to the display server: {0}")]
    Io(#[from] io::Error),

    /// The server reported a protocol violation. The *expected* failure
    /// mode of negative conformance tests.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A required global was never advertised by the server.
    #[error("server did not advertise the `{0}` global")]
    MissingGlobal(&'static str),
}

/// A structured protocol error: which interface was violated, and the
/// interface-scoped numeric error code the server attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("protocol error on {interface}: error code {code}")]
pub struct ProtocolError {
    pub interface: String,
    pub code: u32,
}

impl ProtocolError {
    pub fn interface(&self) -> &str {
        &self.interface
    }

    pub fn error_code(&self) -> u32 {
        self.code
    }
}

impl Error {
    /// The protocol error, if that is what this is.
    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        match self {
            Error::Protocol(err) => Some(err),
            _ => None,
        }
    }
}
