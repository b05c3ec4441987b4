//! A client-owned drawable surface with frame-completion tracking.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::warn;
use wayland_client::protocol::{wl_buffer, wl_shell, wl_shell_surface, wl_surface};
use wayland_client::{Proxy, QueueHandle};

use crate::buffer::ShmBuffer;
use crate::client::{Client, ClientState, EventHooks};
use crate::error::Result;

/// A `wl_surface` created by a [`Client`], optionally carrying the
/// legacy-shell toplevel role.
///
/// Tracks at most one pending frame callback. The pending state lives
/// on this instance, so any number of surfaces can wait for frames
/// independently.
pub struct Surface {
    surface: wl_surface::WlSurface,
    // Kept alive for the role; the protocol ties its lifetime to the surface.
    _shell_surface: Option<wl_shell_surface::WlShellSurface>,
    qh: QueueHandle<ClientState>,
    hooks: Rc<RefCell<EventHooks>>,
}

impl Surface {
    pub(crate) fn new(client: &Client) -> Result<Self> {
        let surface = client.compositor()?.create_surface(client.qh(), ());
        Ok(Self {
            surface,
            _shell_surface: None,
            qh: client.qh().clone(),
            hooks: client.hooks(),
        })
    }

    pub(crate) fn make_toplevel(&mut self, shell: &wl_shell::WlShell) {
        let shell_surface = shell.get_shell_surface(&self.surface, &self.qh, ());
        shell_surface.set_toplevel();
        self._shell_surface = Some(shell_surface);
    }

    /// Register `on_frame` to run when the server signals the next
    /// frame completion, with the frame timestamp in milliseconds.
    ///
    /// Only one frame callback may be outstanding per surface. If one
    /// already is, its closure is released without firing and replaced;
    /// the superseded protocol callback's event is ignored when it
    /// arrives.
    pub fn add_frame_callback(&self, on_frame: impl FnOnce(u32) + 'static) {
        let callback = self.surface.frame(&self.qh, self.surface.id());
        let displaced = self.hooks.borrow_mut().set_frame_hook(
            self.surface.id(),
            callback.id(),
            Box::new(on_frame),
        );
        if displaced {
            warn!(
                surface = %self.surface.id(),
                "frame callback replaced while still pending, previous closure released unfired"
            );
        }
    }

    /// Attach `buffer` at the surface origin. Takes effect on commit.
    pub fn attach(&self, buffer: &ShmBuffer) {
        self.surface.attach(Some(buffer.wl_buffer()), 0, 0);
    }

    /// Raw attach, for tests driving buffers the harness did not create.
    pub fn attach_wl_buffer(&self, buffer: Option<&wl_buffer::WlBuffer>, x: i32, y: i32) {
        self.surface.attach(buffer, x, y);
    }

    pub fn damage(&self, x: i32, y: i32, width: i32, height: i32) {
        self.surface.damage(x, y, width, height);
    }

    pub fn commit(&self) {
        self.surface.commit();
    }

    pub fn wl_surface(&self) -> &wl_surface::WlSurface {
        &self.surface
    }
}

impl Drop for Surface {
    fn drop(&mut self) {
        // A still-pending closure is released without firing.
        self.hooks.borrow_mut().drop_frame_hook(&self.surface.id());
        self.surface.destroy();
    }
}
