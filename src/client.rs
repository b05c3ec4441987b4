//! Client session: one real Wayland connection to the server under test.
//!
//! The session prefers a private socket from the server module and falls
//! back to the ambient `WAYLAND_DISPLAY` when the module has no socket
//! capability. After connecting it discovers and binds the globals the
//! harness drives (`wl_compositor`, `wl_shm`, `wl_shell`), then hands
//! control back to the test, which pumps events through
//! [`Client::dispatch_until`].
//!
//! Everything is single-threaded and cooperative: protocol events are
//! delivered, and test-registered callbacks invoked, only from inside
//! `dispatch_until`/`server_roundtrip` on the calling thread.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::os::unix::net::UnixStream;
use std::rc::Rc;

use tracing::{debug, warn};
use wayland_client::backend::{ObjectId, WaylandError};
use wayland_client::protocol::{
    wl_buffer, wl_callback, wl_compositor, wl_registry, wl_shell, wl_shell_surface, wl_shm,
    wl_shm_pool, wl_surface,
};
use wayland_client::{
    delegate_noop, Connection, Dispatch, DispatchError, EventQueue, Proxy, QueueHandle,
};

use crate::error::{Error, ProtocolError, Result};
use crate::server::Server;
use crate::surface::Surface;

/// Per-object callback tables shared between the session, its derived
/// objects, and the event handlers. Only ever touched from the dispatch
/// thread; the `RefCell` is released before any test closure runs.
pub(crate) struct EventHooks {
    /// Pending frame callback per surface. At most one entry per
    /// surface; the entry remembers which `wl_callback` it belongs to so
    /// a stale callback's `done` cannot fire a newer closure.
    frames: HashMap<ObjectId, PendingFrame>,
    /// Release subscribers per buffer, in subscription order.
    releases: HashMap<ObjectId, Vec<ReleaseNotifier>>,
}

pub(crate) struct PendingFrame {
    callback: ObjectId,
    on_frame: Box<dyn FnOnce(u32)>,
}

pub(crate) type ReleaseNotifier = Box<dyn FnMut() -> bool>;

impl EventHooks {
    fn new() -> Self {
        Self {
            frames: HashMap::new(),
            releases: HashMap::new(),
        }
    }

    /// Install the pending frame hook for `surface`, releasing (without
    /// firing) any previously pending closure. Returns true if a closure
    /// was displaced.
    pub(crate) fn set_frame_hook(
        &mut self,
        surface: ObjectId,
        callback: ObjectId,
        on_frame: Box<dyn FnOnce(u32)>,
    ) -> bool {
        self.frames
            .insert(surface, PendingFrame { callback, on_frame })
            .is_some()
    }

    /// Remove and return the closure for `surface`, but only if
    /// `callback` is the one the hook is armed for.
    pub(crate) fn take_frame_hook(
        &mut self,
        surface: &ObjectId,
        callback: &ObjectId,
    ) -> Option<Box<dyn FnOnce(u32)>> {
        match self.frames.get(surface) {
            Some(pending) if pending.callback == *callback => self
                .frames
                .remove(surface)
                .map(|pending| pending.on_frame),
            _ => None,
        }
    }

    /// Release a pending closure without firing it (surface teardown).
    pub(crate) fn drop_frame_hook(&mut self, surface: &ObjectId) {
        self.frames.remove(surface);
    }

    pub(crate) fn register_buffer(&mut self, buffer: ObjectId) {
        self.releases.entry(buffer).or_default();
    }

    pub(crate) fn add_release_notifier(&mut self, buffer: ObjectId, notifier: ReleaseNotifier) {
        self.releases.entry(buffer).or_default().push(notifier);
    }

    /// Detach the subscriber list for a notification pass. The slot
    /// itself stays registered so subscribers added during the pass
    /// accumulate separately.
    pub(crate) fn begin_release_pass(&mut self, buffer: &ObjectId) -> Option<Vec<ReleaseNotifier>> {
        self.releases.get_mut(buffer).map(std::mem::take)
    }

    /// Re-attach the survivors of a pass ahead of any subscribers that
    /// were added while the pass ran, preserving subscription order.
    pub(crate) fn end_release_pass(&mut self, buffer: &ObjectId, mut kept: Vec<ReleaseNotifier>) {
        if let Some(slot) = self.releases.get_mut(buffer) {
            kept.append(slot);
            *slot = kept;
        }
    }

    pub(crate) fn drop_release_notifiers(&mut self, buffer: &ObjectId) {
        self.releases.remove(buffer);
    }

    #[cfg(test)]
    fn release_notifier_count(&self, buffer: &ObjectId) -> usize {
        self.releases.get(buffer).map_or(0, Vec::len)
    }
}

/// Run one release-notification pass: every current subscriber is
/// invoked exactly once, in subscription order; subscribers returning
/// false are dropped only after the whole pass.
fn notify_release(hooks: &Rc<RefCell<EventHooks>>, buffer: &ObjectId) {
    let Some(notifiers) = hooks.borrow_mut().begin_release_pass(buffer) else {
        return;
    };
    let mut kept = Vec::with_capacity(notifiers.len());
    // The RefCell is not held here, so a notifier may re-subscribe or
    // touch other harness objects.
    for mut notifier in notifiers {
        if notifier() {
            kept.push(notifier);
        }
    }
    hooks.borrow_mut().end_release_pass(buffer, kept);
}

/// Dispatch state for the session's event queue: the bound globals plus
/// the shared hook tables.
pub(crate) struct ClientState {
    compositor: Option<wl_compositor::WlCompositor>,
    shm: Option<wl_shm::WlShm>,
    shell: Option<wl_shell::WlShell>,
    hooks: Rc<RefCell<EventHooks>>,
}

/// A Wayland client session against the server under test.
///
/// Owns the connection exclusively; derived [`Surface`]s and
/// [`ShmBuffer`](crate::ShmBuffer)s must not outlive it.
pub struct Client {
    // Field order is teardown order: globals and hooks go before the
    // queue and the connection.
    state: ClientState,
    event_queue: EventQueue<ClientState>,
    qh: QueueHandle<ClientState>,
    conn: Connection,
}

impl Client {
    /// Connect to `server` and bind the globals advertised at connect
    /// time. Performs one blocking round-trip, so the compositor, shm
    /// and shell factories are available when this returns.
    pub fn connect(server: &mut Server) -> Result<Self> {
        let conn = match server.create_client_socket() {
            Ok(fd) => Connection::from_socket(UnixStream::from(fd))?,
            Err(Error::NotSupported) => {
                // Accepted degraded mode: the module cannot mint private
                // sockets, so we talk to whatever the environment points at.
                warn!("server module has no client-socket support, connecting to the ambient WAYLAND_DISPLAY");
                Connection::connect_to_env()?
            }
            Err(err) => return Err(err),
        };

        let event_queue = conn.new_event_queue();
        let qh = event_queue.handle();
        conn.display().get_registry(&qh, ());

        let mut client = Self {
            state: ClientState {
                compositor: None,
                shm: None,
                shell: None,
                hooks: Rc::new(RefCell::new(EventHooks::new())),
            },
            event_queue,
            qh,
            conn,
        };
        client.server_roundtrip()?;
        Ok(client)
    }

    /// Block processing incoming events until `predicate` is true.
    ///
    /// The predicate is re-checked after every batch of delivered
    /// events. There is no built-in timeout: a caller needing a bounded
    /// wait must fold the deadline into the predicate. A connection
    /// failure ends the loop with a translated error instead.
    pub fn dispatch_until(&mut self, mut predicate: impl FnMut() -> bool) -> Result<()> {
        while !predicate() {
            self.event_queue
                .blocking_dispatch(&mut self.state)
                .map_err(translate_dispatch_error)?;
        }
        Ok(())
    }

    /// Block until the server has processed everything sent so far.
    /// Calling with nothing outstanding simply returns.
    pub fn server_roundtrip(&mut self) -> Result<()> {
        self.event_queue
            .roundtrip(&mut self.state)
            .map(drop)
            .map_err(translate_dispatch_error)
    }

    pub fn compositor(&self) -> Result<&wl_compositor::WlCompositor> {
        self.state
            .compositor
            .as_ref()
            .ok_or(Error::MissingGlobal("wl_compositor"))
    }

    pub fn shm(&self) -> Result<&wl_shm::WlShm> {
        self.state.shm.as_ref().ok_or(Error::MissingGlobal("wl_shm"))
    }

    pub fn shell(&self) -> Result<&wl_shell::WlShell> {
        self.state
            .shell
            .as_ref()
            .ok_or(Error::MissingGlobal("wl_shell"))
    }

    /// Create a bare surface with no role.
    pub fn create_surface(&self) -> Result<Surface> {
        Surface::new(self)
    }

    /// Create a surface and give it the legacy-shell toplevel role.
    ///
    /// Does not attach any pixel content; size is the caller's to
    /// establish by attaching and committing a buffer.
    pub fn create_visible_surface(&self, _width: i32, _height: i32) -> Result<Surface> {
        let mut surface = self.create_surface()?;
        surface.make_toplevel(self.shell()?);
        Ok(surface)
    }

    pub(crate) fn qh(&self) -> &QueueHandle<ClientState> {
        &self.qh
    }

    pub(crate) fn hooks(&self) -> Rc<RefCell<EventHooks>> {
        self.state.hooks.clone()
    }

    /// The underlying connection, for tests that need to drive the wire
    /// below the harness abstractions.
    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

fn translate_dispatch_error(err: DispatchError) -> Error {
    match err {
        DispatchError::Backend(WaylandError::Protocol(err)) => Error::Protocol(ProtocolError {
            interface: err.object_interface,
            code: err.code,
        }),
        DispatchError::Backend(WaylandError::Io(err)) => Error::Io(err),
        err @ DispatchError::BadMessage { .. } => {
            Error::Io(io::Error::new(io::ErrorKind::InvalidData, err.to_string()))
        }
    }
}

impl Dispatch<wl_registry::WlRegistry, ()> for ClientState {
    fn event(
        state: &mut Self,
        registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _: &(),
        _: &Connection,
        qh: &QueueHandle<Self>,
    ) {
        // Unknown globals are ignored for forward compatibility; known
        // ones are bound at most once, at the version the bindings know.
        if let wl_registry::Event::Global {
            name,
            interface,
            version,
        } = event
        {
            match interface.as_str() {
                "wl_compositor" if state.compositor.is_none() => {
                    let version =
                        version.min(<wl_compositor::WlCompositor as Proxy>::interface().version);
                    state.compositor = Some(registry.bind(name, version, qh, ()));
                    debug!(version, "bound wl_compositor");
                }
                "wl_shm" if state.shm.is_none() => {
                    let version = version.min(<wl_shm::WlShm as Proxy>::interface().version);
                    state.shm = Some(registry.bind(name, version, qh, ()));
                    debug!(version, "bound wl_shm");
                }
                "wl_shell" if state.shell.is_none() => {
                    let version = version.min(<wl_shell::WlShell as Proxy>::interface().version);
                    state.shell = Some(registry.bind(name, version, qh, ()));
                    debug!(version, "bound wl_shell");
                }
                _ => {}
            }
        }
    }
}

impl Dispatch<wl_callback::WlCallback, ObjectId> for ClientState {
    fn event(
        state: &mut Self,
        callback: &wl_callback::WlCallback,
        event: wl_callback::Event,
        surface: &ObjectId,
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { callback_data } = event {
            // A done for a displaced callback finds no hook and is ignored.
            let hook = state
                .hooks
                .borrow_mut()
                .take_frame_hook(surface, &callback.id());
            if let Some(on_frame) = hook {
                on_frame(callback_data);
            }
        }
    }
}

impl Dispatch<wl_buffer::WlBuffer, ()> for ClientState {
    fn event(
        state: &mut Self,
        buffer: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            notify_release(&state.hooks, &buffer.id());
        }
    }
}

impl Dispatch<wl_shell_surface::WlShellSurface, ()> for ClientState {
    fn event(
        _: &mut Self,
        shell_surface: &wl_shell_surface::WlShellSurface,
        event: wl_shell_surface::Event,
        _: &(),
        _: &Connection,
        _: &QueueHandle<Self>,
    ) {
        // The shell pings to check we are alive; configure and popup
        // events are of no interest to the harness.
        if let wl_shell_surface::Event::Ping { serial } = event {
            shell_surface.pong(serial);
        }
    }
}

delegate_noop!(ClientState: wl_compositor::WlCompositor);
delegate_noop!(ClientState: ignore wl_shm::WlShm);
delegate_noop!(ClientState: wl_shm_pool::WlShmPool);
delegate_noop!(ClientState: wl_shell::WlShell);
delegate_noop!(ClientState: ignore wl_surface::WlSurface);

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use wayland_client::backend::protocol::ProtocolError as WireProtocolError;

    fn hooks() -> Rc<RefCell<EventHooks>> {
        Rc::new(RefCell::new(EventHooks::new()))
    }

    #[test]
    fn protocol_errors_translate_to_structured_values() {
        let err = translate_dispatch_error(DispatchError::Backend(WaylandError::Protocol(
            WireProtocolError {
                code: 2,
                object_id: 42,
                object_interface: "wl_buffer".to_string(),
                message: "invalid fd".to_string(),
            },
        )));

        match err {
            Error::Protocol(err) => {
                assert_eq!(err.interface(), "wl_buffer");
                assert_eq!(err.error_code(), 2);
            }
            other => panic!("expected protocol error, got {other:?}"),
        }
    }

    #[test]
    fn io_errors_stay_io_errors() {
        let err = translate_dispatch_error(DispatchError::Backend(WaylandError::Io(
            io::Error::from_raw_os_error(libc::EPIPE),
        )));
        match err {
            Error::Io(err) => assert_eq!(err.raw_os_error(), Some(libc::EPIPE)),
            other => panic!("expected IO error, got {other:?}"),
        }
    }

    #[test]
    fn displaced_frame_closure_is_released_without_firing() {
        let hooks = hooks();
        let surface = ObjectId::null();

        let first_fired = Rc::new(Cell::new(false));
        let fired = first_fired.clone();
        let replaced = hooks.borrow_mut().set_frame_hook(
            surface.clone(),
            ObjectId::null(),
            Box::new(move |_| fired.set(true)),
        );
        assert!(!replaced);

        let second_fired = Rc::new(Cell::new(false));
        let fired = second_fired.clone();
        let replaced = hooks.borrow_mut().set_frame_hook(
            surface.clone(),
            ObjectId::null(),
            Box::new(move |_| fired.set(true)),
        );
        assert!(replaced);

        let hook = hooks
            .borrow_mut()
            .take_frame_hook(&surface, &ObjectId::null());
        hook.unwrap()(0);

        assert!(!first_fired.get(), "displaced closure must never fire");
        assert!(second_fired.get());
        // Slot is empty again: nothing left to fire or leak.
        assert!(hooks
            .borrow_mut()
            .take_frame_hook(&surface, &ObjectId::null())
            .is_none());
    }

    #[test]
    fn release_pass_invokes_every_subscriber_once_and_removes_expired() {
        let hooks = hooks();
        let buffer = ObjectId::null();
        hooks.borrow_mut().register_buffer(buffer.clone());

        let calls: Rc<RefCell<Vec<usize>>> = Rc::new(RefCell::new(Vec::new()));
        for k in 0..3 {
            let calls = calls.clone();
            hooks.borrow_mut().add_release_notifier(
                buffer.clone(),
                Box::new(move || {
                    calls.borrow_mut().push(k);
                    k != 1 // subscriber 1 unsubscribes on first invocation
                }),
            );
        }

        notify_release(&hooks, &buffer);
        assert_eq!(*calls.borrow(), vec![0, 1, 2]);
        assert_eq!(hooks.borrow().release_notifier_count(&buffer), 2);

        // Second release: only the survivors run, still in order.
        calls.borrow_mut().clear();
        notify_release(&hooks, &buffer);
        assert_eq!(*calls.borrow(), vec![0, 2]);
    }

    #[test]
    fn subscriber_added_during_a_pass_runs_on_the_next_pass_only() {
        let hooks = hooks();
        let buffer = ObjectId::null();
        hooks.borrow_mut().register_buffer(buffer.clone());

        let calls: Rc<RefCell<Vec<&'static str>>> = Rc::new(RefCell::new(Vec::new()));
        {
            let hooks = hooks.clone();
            let buffer = buffer.clone();
            let calls = calls.clone();
            hooks.clone().borrow_mut().add_release_notifier(
                buffer.clone(),
                Box::new(move || {
                    calls.borrow_mut().push("original");
                    let inner_calls = calls.clone();
                    hooks.borrow_mut().add_release_notifier(
                        buffer.clone(),
                        Box::new(move || {
                            inner_calls.borrow_mut().push("added");
                            false
                        }),
                    );
                    false
                }),
            );
        }

        notify_release(&hooks, &buffer);
        assert_eq!(*calls.borrow(), vec!["original"]);

        notify_release(&hooks, &buffer);
        assert_eq!(*calls.borrow(), vec!["original", "added"]);
    }

    #[test]
    fn release_for_an_unknown_buffer_is_ignored() {
        let hooks = hooks();
        notify_release(&hooks, &ObjectId::null());
    }
}
