//! Small OS helpers shared by the harness and by tests.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

/// Allocate an anonymous, file-backed memory region of `size` bytes and
/// return its descriptor.
///
/// The region is zero-initialized and resizable (tests truncate it on
/// purpose to provoke out-of-bounds access in the server under test).
pub fn create_anonymous_file(size: u64) -> io::Result<OwnedFd> {
    // memfds are unlinked from birth and fully zeroed after ftruncate.
    const NAME: &[u8] = b"waycheck-shm\0";
    let fd = unsafe {
        libc::memfd_create(
            NAME.as_ptr().cast(),
            libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    if unsafe { libc::ftruncate(fd.as_raw_fd(), size as libc::off_t) } < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

/// Initialize logging for a test binary. Safe to call from every test;
/// only the first call installs the subscriber.
pub fn init_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init()
        .ok();
}
