//! Display server shim: the C ABI a server module must export to be
//! testable, and the loader that resolves it at runtime.
//!
//! A backend ships as a shared object exporting the entry points below.
//! Nothing here links against any particular server; the module path is
//! supplied by whoever drives the harness.
//!
//! Required symbols:
//!
//! - `waycheck_create_server(argc, argv) -> *mut WaycheckDisplayServer`
//! - `waycheck_destroy_server(*mut WaycheckDisplayServer)`
//! - `waycheck_server_start(*mut WaycheckDisplayServer)`
//! - `waycheck_server_stop(*mut WaycheckDisplayServer)`
//!
//! Optional symbols:
//!
//! - `waycheck_server_create_client_socket(*mut WaycheckDisplayServer) -> c_int`
//!   Returns a connected client socket fd, or a negative value with errno
//!   set on failure.

use std::ffi::CString;
use std::io;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::Path;

use libc::{c_char, c_int};
use libloading::Library;
use tracing::debug;

use crate::error::{Error, Result};
use crate::server::DisplayServer;

/// Opaque server handle owned by the module.
#[repr(C)]
pub struct WaycheckDisplayServer {
    _private: [u8; 0],
}

type CreateServerFn =
    unsafe extern "C" fn(c_int, *const *const c_char) -> *mut WaycheckDisplayServer;
type DestroyServerFn = unsafe extern "C" fn(*mut WaycheckDisplayServer);
type ServerStartFn = unsafe extern "C" fn(*mut WaycheckDisplayServer);
type ServerStopFn = unsafe extern "C" fn(*mut WaycheckDisplayServer);
type CreateClientSocketFn = unsafe extern "C" fn(*mut WaycheckDisplayServer) -> c_int;

/// Resolved entry points of a server module.
///
/// All mandatory slots are filled before the first backend call; the
/// optional socket slot is an `Option` checked at each use.
#[derive(Debug)]
struct Vtable {
    destroy_server: DestroyServerFn,
    server_start: ServerStartFn,
    server_stop: ServerStopFn,
    create_client_socket: Option<CreateClientSocketFn>,
}

/// A display server implementation loaded from a shared object.
///
/// Owns the module, the resolved entry points, and exactly one backend
/// handle, which is destroyed through the module's paired destroy entry
/// point when the `ServerModule` is dropped.
#[derive(Debug)]
pub struct ServerModule {
    handle: *mut WaycheckDisplayServer,
    vtable: Vtable,
    // argv storage handed to create; some backends keep the pointer.
    _args: Vec<CString>,
    _argv: Vec<*const c_char>,
    _library: Library,
}

impl ServerModule {
    /// Load `path` and construct a backend instance with `args`.
    ///
    /// Every mandatory symbol is resolved before `waycheck_create_server`
    /// is invoked, so a misconfigured module fails without any backend
    /// code having run.
    pub fn load(path: &Path, args: &[String]) -> Result<Self> {
        let library = unsafe { Library::new(path)? };

        let create_server = *Self::mandatory::<CreateServerFn>(
            &library,
            b"waycheck_create_server\0",
            "waycheck_create_server",
        )?;
        let destroy_server = *Self::mandatory::<DestroyServerFn>(
            &library,
            b"waycheck_destroy_server\0",
            "waycheck_destroy_server",
        )?;
        let server_start = *Self::mandatory::<ServerStartFn>(
            &library,
            b"waycheck_server_start\0",
            "waycheck_server_start",
        )?;
        let server_stop = *Self::mandatory::<ServerStopFn>(
            &library,
            b"waycheck_server_stop\0",
            "waycheck_server_stop",
        )?;
        let create_client_socket = unsafe {
            library
                .get::<CreateClientSocketFn>(b"waycheck_server_create_client_socket\0")
                .ok()
                .map(|symbol| *symbol)
        };

        if create_client_socket.is_none() {
            debug!(
                module = %path.display(),
                "module does not export waycheck_server_create_client_socket"
            );
        }

        let args: Vec<CString> = args
            .iter()
            .map(|arg| CString::new(arg.as_str()))
            .collect::<std::result::Result<_, _>>()
            .map_err(|err| Error::Io(io::Error::new(io::ErrorKind::InvalidInput, err)))?;
        let mut argv: Vec<*const c_char> = args.iter().map(|arg| arg.as_ptr()).collect();
        argv.push(std::ptr::null());

        let handle = unsafe { create_server(args.len() as c_int, argv.as_ptr()) };
        debug!(module = %path.display(), "loaded display server module");

        Ok(Self {
            handle,
            vtable: Vtable {
                destroy_server,
                server_start,
                server_stop,
                create_client_socket,
            },
            _args: args,
            _argv: argv,
            _library: library,
        })
    }

    fn mandatory<'lib, T>(
        library: &'lib Library,
        raw_name: &[u8],
        symbol: &'static str,
    ) -> Result<libloading::Symbol<'lib, T>> {
        unsafe {
            library
                .get::<T>(raw_name)
                .map_err(|_| Error::MissingCapability { symbol })
        }
    }
}

impl DisplayServer for ServerModule {
    fn start(&mut self) {
        unsafe { (self.vtable.server_start)(self.handle) }
    }

    fn stop(&mut self) {
        unsafe { (self.vtable.server_stop)(self.handle) }
    }

    fn create_client_socket(&mut self) -> Result<OwnedFd> {
        match self.vtable.create_client_socket {
            Some(create_client_socket) => {
                let fd = unsafe { create_client_socket(self.handle) };
                if fd < 0 {
                    return Err(Error::Io(io::Error::last_os_error()));
                }
                Ok(unsafe { OwnedFd::from_raw_fd(fd) })
            }
            None => Err(Error::NotSupported),
        }
    }
}

impl Drop for ServerModule {
    fn drop(&mut self) {
        unsafe { (self.vtable.destroy_server)(self.handle) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // A real shared object that is guaranteed loadable but exports none
    // of the shim entry points.
    const UNRELATED_LIBRARY: &str = "libm.so.6";

    #[test]
    fn module_without_mandatory_symbols_is_a_configuration_error() {
        let err = ServerModule::load(Path::new(UNRELATED_LIBRARY), &[]).unwrap_err();

        // Resolution stops at the first mandatory entry point, before
        // any backend code could have run.
        match err {
            Error::MissingCapability { symbol } => {
                assert_eq!(symbol, "waycheck_create_server")
            }
            other => panic!("expected missing-capability error, got {other:?}"),
        }
    }

    #[test]
    fn nonexistent_module_fails_to_load() {
        let err = ServerModule::load(Path::new("/nonexistent/waycheck-server.so"), &[]).unwrap_err();
        assert!(matches!(err, Error::Module(_)));
    }
}
