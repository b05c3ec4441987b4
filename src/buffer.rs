//! Shared-memory pixel buffers with release notification.

use std::cell::RefCell;
use std::io;
use std::os::fd::{AsFd, BorrowedFd};
use std::rc::Rc;

use wayland_client::protocol::{wl_buffer, wl_shm};
use wayland_client::Proxy;

use crate::client::{Client, EventHooks};
use crate::error::Result;
use crate::helpers;

const BYTES_PER_PIXEL: i32 = 4;

/// An ARGB8888 `wl_buffer` backed by an anonymous memory region.
///
/// Release subscribers registered with
/// [`add_release_listener`](ShmBuffer::add_release_listener) are
/// invoked, in subscription order, every time the server releases the
/// buffer; a subscriber returning false is dropped once the full
/// notification pass is over.
pub struct ShmBuffer {
    buffer: wl_buffer::WlBuffer,
    hooks: Rc<RefCell<EventHooks>>,
}

impl ShmBuffer {
    /// Allocate a `width` x `height` buffer with a tightly packed
    /// stride over a fresh anonymous file.
    pub fn new(client: &Client, width: i32, height: i32) -> Result<Self> {
        Self::with_backing(client, width, height, |_| Ok(()))
    }

    /// Like [`ShmBuffer::new`], but hands the backing descriptor to
    /// `backing` after the buffer exists and before the descriptor is
    /// closed. Conformance tests use this to corrupt the backing file
    /// (for example truncating it below the size the pool declared) and
    /// then assert the server rejects the buffer.
    pub fn with_backing(
        client: &Client,
        width: i32,
        height: i32,
        backing: impl FnOnce(BorrowedFd<'_>) -> io::Result<()>,
    ) -> Result<Self> {
        let stride = width * BYTES_PER_PIXEL;
        let size = stride * height;
        let fd = helpers::create_anonymous_file(size as u64)?;

        // The pool is a factory, not an owner: the derived buffer stays
        // valid after the pool wrapper is destroyed and the descriptor
        // closed, because the server maps what it needs.
        let pool = client
            .shm()?
            .create_pool(fd.as_fd(), size, client.qh(), ());
        let buffer = pool.create_buffer(
            0,
            width,
            height,
            stride,
            wl_shm::Format::Argb8888,
            client.qh(),
            (),
        );
        pool.destroy();
        backing(fd.as_fd())?;
        drop(fd);

        let hooks = client.hooks();
        hooks.borrow_mut().register_buffer(buffer.id());
        Ok(Self { buffer, hooks })
    }

    /// Subscribe to release events. `on_release` returns whether to
    /// stay subscribed.
    pub fn add_release_listener(&self, on_release: impl FnMut() -> bool + 'static) {
        self.hooks
            .borrow_mut()
            .add_release_notifier(self.buffer.id(), Box::new(on_release));
    }

    pub fn wl_buffer(&self) -> &wl_buffer::WlBuffer {
        &self.buffer
    }
}

impl Drop for ShmBuffer {
    fn drop(&mut self) {
        self.buffer.destroy();
        // No further release events can arrive for a destroyed buffer.
        self.hooks
            .borrow_mut()
            .drop_release_notifiers(&self.buffer.id());
    }
}
