//! Conformance scenarios that need a real display server module.
//!
//! These tests self-skip unless `WAYCHECK_SERVER_MODULE` points at a
//! shared object implementing the waycheck shim ABI.

use waycheck::{Client, Fixture, ShmBuffer};
use wayland_client::Proxy;

fn fixture_or_skip() -> Option<Fixture> {
    waycheck::helpers::init_logging();
    match Fixture::from_env() {
        Ok(Some(fixture)) => Some(fixture),
        Ok(None) => {
            eprintln!("skipped: set WAYCHECK_SERVER_MODULE to run conformance tests");
            None
        }
        Err(err) => panic!("failed to load server module: {err}"),
    }
}

/// All three harness globals must be bound once the client constructor
/// returns.
#[test]
fn globals_are_bound_after_connect() {
    let Some(mut fixture) = fixture_or_skip() else {
        return;
    };
    fixture.set_up();

    let client = Client::connect(fixture.the_server()).expect("failed to connect client");

    assert!(client.compositor().is_ok(), "wl_compositor not bound");
    assert!(client.shm().is_ok(), "wl_shm not bound");
    assert!(client.shell().is_ok(), "wl_shell not bound");
}

/// A round-trip with nothing outstanding returns promptly and cleanly,
/// as does a second one.
#[test]
fn roundtrip_is_idempotent() {
    let Some(mut fixture) = fixture_or_skip() else {
        return;
    };
    fixture.set_up();

    let mut client = Client::connect(fixture.the_server()).expect("failed to connect client");
    client.server_roundtrip().expect("first roundtrip failed");
    client.server_roundtrip().expect("second roundtrip failed");
}

/// Two buffers of the same geometry are fully independent objects; the
/// server accepts both without protocol error.
#[test]
fn independent_buffers_are_distinct() {
    let Some(mut fixture) = fixture_or_skip() else {
        return;
    };
    fixture.set_up();

    let mut client = Client::connect(fixture.the_server()).expect("failed to connect client");

    let first = ShmBuffer::new(&client, 200, 200).expect("failed to create first buffer");
    let second = ShmBuffer::new(&client, 200, 200).expect("failed to create second buffer");

    assert_ne!(first.wl_buffer().id(), second.wl_buffer().id());
    client
        .server_roundtrip()
        .expect("server rejected one of the buffers");
}

/// Multiple clients may coexist on one server, each with its own
/// connection and its own global bindings.
#[test]
fn two_clients_connect_independently() {
    let Some(mut fixture) = fixture_or_skip() else {
        return;
    };
    fixture.set_up();

    let mut first = Client::connect(fixture.the_server()).expect("failed to connect first client");
    let mut second =
        Client::connect(fixture.the_server()).expect("failed to connect second client");

    first.server_roundtrip().expect("first client roundtrip");
    second.server_roundtrip().expect("second client roundtrip");
}

/// A toplevel surface can be created and committed without pixel
/// content; the server must not treat that as an error.
#[test]
fn visible_surface_creation_is_clean() {
    let Some(mut fixture) = fixture_or_skip() else {
        return;
    };
    fixture.set_up();

    let mut client = Client::connect(fixture.the_server()).expect("failed to connect client");
    let surface = client
        .create_visible_surface(200, 200)
        .expect("failed to create toplevel surface");
    surface.commit();

    client.server_roundtrip().expect("server rejected the surface");
}
