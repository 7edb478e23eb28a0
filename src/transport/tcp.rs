//! Full-mesh TCP transport: one long-lived connection per ordered pair of
//! peers, bootstrapped by each rank listening on its own address and
//! dialing every higher-ranked peer (so each pair connects exactly once).
//! Retry/backoff on dial mirrors the reference crate's connection-retry
//! constants in `net/connection.rs`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::error::{DsmError, Result};
use crate::message::Envelope;
use crate::wire::{read_frame, write_frame};

use super::Transport;

const INITIAL_RETRY_DELAY: Duration = Duration::from_millis(50);
const MAX_RETRY_DELAY: Duration = Duration::from_secs(2);
const RETRY_BACKOFF_FACTOR: u32 = 2;
const MAX_CONNECT_ATTEMPTS: u32 = 100;

pub struct TcpTransport {
    rank: u32,
    /// A single mutex over every outbound writer, so at most one send is in
    /// flight across the whole transport — the spec's "single transport
    /// mutex serializes every send and every probe-and-receive".
    writers: Mutex<HashMap<u32, OwnedWriteHalf>>,
}

impl TcpTransport {
    /// Binds `addrs[rank]`, accepts inbound connections from every
    /// lower-ranked peer and dials every higher-ranked peer, and returns the
    /// transport paired with the channel that every per-connection reader
    /// task forwards decoded frames into.
    pub async fn connect_mesh(
        rank: u32,
        addrs: &[SocketAddr],
    ) -> Result<(Arc<TcpTransport>, mpsc::UnboundedReceiver<Envelope>)> {
        let n = addrs.len() as u32;
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let listener = TcpListener::bind(addrs[rank as usize])
            .await
            .map_err(|e| DsmError::Communication {
                peer: rank,
                reason: format!("bind {}: {e}", addrs[rank as usize]),
            })?;
        info!("rank {rank} listening on {}", addrs[rank as usize]);

        let transport = Arc::new(TcpTransport {
            rank,
            writers: Mutex::new(HashMap::new()),
        });

        let expected_inbound = rank; // ranks 0..rank dial us
        let accept_transport = transport.clone();
        let accept_tx = inbound_tx.clone();
        let accept_task = tokio::spawn(async move {
            for _ in 0..expected_inbound {
                match listener.accept().await {
                    Ok((stream, peer_addr)) => {
                        if let Err(e) =
                            register_connection(&accept_transport, stream, &accept_tx).await
                        {
                            warn!("rank {rank}: failed to register inbound connection from {peer_addr}: {e}");
                        }
                    }
                    Err(e) => warn!("rank {rank}: accept failed: {e}"),
                }
            }
        });

        for peer in (rank + 1)..n {
            let stream = dial_with_retry(rank, peer, addrs[peer as usize]).await?;
            register_connection(&transport, stream, &inbound_tx).await?;
        }

        accept_task.await.map_err(|e| DsmError::Communication {
            peer: rank,
            reason: format!("accept task join error: {e}"),
        })?;

        Ok((transport, inbound_rx))
    }

}

async fn dial_with_retry(rank: u32, peer: u32, addr: SocketAddr) -> Result<TcpStream> {
    let mut delay = INITIAL_RETRY_DELAY;
    for attempt in 0..MAX_CONNECT_ATTEMPTS {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                debug!("rank {rank}: dial {peer} at {addr} attempt {attempt} failed: {e}");
                tokio::time::sleep(delay).await;
                delay = (delay * RETRY_BACKOFF_FACTOR).min(MAX_RETRY_DELAY);
            }
        }
    }
    Err(DsmError::Communication {
        peer,
        reason: format!("could not connect to {addr} after {MAX_CONNECT_ATTEMPTS} attempts"),
    })
}

/// Exchanges a 4-byte rank handshake over a freshly established stream,
/// stores its write half, and spawns a reader task forwarding every decoded
/// frame into `inbound_tx`.
async fn register_connection(
    transport: &Arc<TcpTransport>,
    stream: TcpStream,
    inbound_tx: &mpsc::UnboundedSender<Envelope>,
) -> Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    stream.set_nodelay(true).ok();
    let (mut read_half, mut write_half) = stream.into_split();

    write_half
        .write_all(&transport.rank.to_be_bytes())
        .await
        .map_err(|e| DsmError::Communication {
            peer: transport.rank,
            reason: format!("handshake write: {e}"),
        })?;
    let mut peer_buf = [0u8; 4];
    read_half
        .read_exact(&mut peer_buf)
        .await
        .map_err(|e| DsmError::Communication {
            peer: transport.rank,
            reason: format!("handshake read: {e}"),
        })?;
    let peer_rank = u32::from_be_bytes(peer_buf);

    transport.writers.lock().await.insert(peer_rank, write_half);

    let local_rank = transport.rank;
    let tx = inbound_tx.clone();
    tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half, local_rank).await {
                Ok(envelope) => {
                    if tx.send(envelope).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    debug!("rank {local_rank}: connection to {peer_rank} closed: {e}");
                    break;
                }
            }
        }
    });

    Ok(())
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, envelope: Envelope) -> Result<()> {
        let target = envelope.target;
        let mut writers = self.writers.lock().await;
        let writer = writers.get_mut(&target).ok_or_else(|| DsmError::Communication {
            peer: target,
            reason: "no connection to peer".into(),
        })?;
        write_frame(writer, &envelope).await
    }

    fn rank(&self) -> u32 {
        self.rank
    }
}
