//! waycheck - conformance test harness for Wayland display servers
//!
//! The harness loads a display server implementation behind a small C
//! ABI shim ([`shim`]), controls its lifecycle ([`Server`], [`Fixture`]),
//! connects real Wayland clients to it ([`Client`]) and drives protocol
//! objects ([`Surface`], [`ShmBuffer`]) so tests can assert on
//! protocol-level outcomes: events received, or a structured
//! [`ProtocolError`] raised.
pub mod buffer;
pub mod client;
pub mod error;
pub mod fixture;
pub mod helpers;
pub mod server;
pub mod shim;
pub mod surface;

pub use buffer::ShmBuffer;
pub use client::Client;
pub use error::{Error, ProtocolError, Result};
pub use fixture::Fixture;
pub use server::{DisplayServer, Server};
pub use shim::ServerModule;
pub use surface::Surface;
