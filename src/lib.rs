//! Distributed Shared Memory: a flat `K * T` byte address space spread
//! round-robin across `N` peer processes, each owning a disjoint set of
//! fixed-size blocks, with transparent remote access backed by a
//! write-invalidate coherent cache.
//!
//! `access::Dsm` is the library's public entry point — construct a
//! `Transport` (see the `transport` module), pass it to `Dsm::init` along
//! with a `Config`, and call `read`/`write` against the flat address space.

pub mod access;
pub mod address;
pub mod bootstrap;
pub mod cache;
pub mod config;
pub mod error;
pub mod message;
pub mod protocol;
pub mod store;
pub mod transport;
pub mod wire;

pub use access::Dsm;
pub use bootstrap::Args;
pub use config::Config;
pub use error::{DsmError, Result};
pub use transport::{LoopbackTransport, TcpTransport, Transport};
