//! In-process transport connecting `N` ranks via channels. Used by tests and
//! by `dsm --loopback`, which runs every rank as a task in one binary
//! instead of one OS process per rank — convenient for exercising the
//! coherence protocol without standing up real sockets.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::{DsmError, Result};
use crate::message::Envelope;

use super::Transport;

pub struct LoopbackTransport {
    rank: u32,
    /// Guards sends the same way a single transport mutex would over a real
    /// socket set; channels are already thread-safe, so this exists to keep
    /// the "one send in flight at a time" invariant explicit and testable
    /// rather than implicit in the channel's own locking.
    peers: Mutex<Vec<mpsc::UnboundedSender<Envelope>>>,
}

impl LoopbackTransport {
    /// Builds a fully connected mesh of `n` loopback transports, returning
    /// each one paired with its inbound receiver (rank `i`'s receiver is at
    /// index `i`).
    pub fn mesh(n: u32) -> Vec<(Arc<LoopbackTransport>, mpsc::UnboundedReceiver<Envelope>)> {
        let mut senders = Vec::with_capacity(n as usize);
        let mut receivers = Vec::with_capacity(n as usize);
        for _ in 0..n {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.push(tx);
            receivers.push(Some(rx));
        }

        (0..n)
            .map(|rank| {
                let transport = Arc::new(LoopbackTransport {
                    rank,
                    peers: Mutex::new(senders.clone()),
                });
                (transport, receivers[rank as usize].take().unwrap())
            })
            .collect()
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        let peers = self.peers.lock().await;
        let target = envelope.target;
        let sender = peers.get(target as usize).ok_or_else(|| DsmError::Communication {
            peer: target,
            reason: "no such peer in loopback mesh".into(),
        })?;
        sender.send(envelope).map_err(|_| DsmError::Communication {
            peer: target,
            reason: "peer loopback channel closed".into(),
        })
    }

    fn rank(&self) -> u32 {
        self.rank
    }
}
