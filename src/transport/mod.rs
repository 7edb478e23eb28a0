//! Point-to-point transport abstraction.
//!
//! The core protocol (`protocol.rs`) only ever calls `Transport::send`; it
//! never reaches into how bytes actually move between peers. This mirrors
//! how `dms_communication.c` wraps `MPI_Send`/`MPI_Iprobe` behind
//! `send_message`/`receive_message` so the rest of the system does not know
//! MPI exists. Two implementations are provided: `TcpTransport` for real
//! multi-process runs and `LoopbackTransport` for tests and single-process
//! demos.

pub mod loopback;
pub mod tcp;

use async_trait::async_trait;

use crate::error::Result;
use crate::message::Envelope;

pub use loopback::LoopbackTransport;
pub use tcp::TcpTransport;

/// Sends are serialized: every implementation guarantees that at most one
/// `send` is in flight across the whole transport at any instant, per the
/// spec's single transport mutex.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, envelope: Envelope) -> Result<()>;
    fn rank(&self) -> u32;
}
