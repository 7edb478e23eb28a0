//! Process bootstrap: CLI flags / config file parsing and peer address
//! resolution. Everything here is an "external collaborator" per the spec —
//! it builds a `Config` and a list of peer addresses, then hands off to
//! `Dsm::init`; none of it participates in the coherence protocol.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::error::{DsmError, Result};

/// Distributed Shared Memory — cache-coherent block layer.
///
/// Either pass `--config <file>` with `key value` lines, or use the `-n/-k/-t/-p`
/// flags directly, matching the original's "config file OR CLI flags" bootstrap.
#[derive(Parser, Debug)]
#[command(name = "dsm", version, about)]
pub struct Args {
    /// Number of processes
    #[arg(short = 'n', long = "processes", default_value_t = 4)]
    pub processes: u32,

    /// Number of blocks
    #[arg(short = 'k', long = "blocks", default_value_t = 1000)]
    pub blocks: u32,

    /// Block size in bytes
    #[arg(short = 't', long = "block-size", default_value_t = 4096)]
    pub block_size: u32,

    /// This process's rank (0 to n-1)
    #[arg(short = 'p', long = "process-id", default_value_t = 0)]
    pub process_id: u32,

    /// Configuration file (key value lines, `#` comments) — overrides -n/-k/-t/-p
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Comma-separated `host:port` for every rank's transport address, in rank order
    #[arg(long)]
    pub peers: Option<String>,

    /// Run every rank as a task of this one process over an in-memory transport,
    /// instead of dialing out over TCP — useful for local experimentation
    #[arg(long)]
    pub loopback: bool,
}

impl Args {
    pub fn resolve_config(&self) -> Result<Config> {
        match &self.config {
            Some(path) => Config::from_file(path),
            None => Config::new(self.processes, self.blocks, self.block_size, self.process_id),
        }
    }

    /// Parses `--peers` into one socket address per rank, and checks the
    /// count against `cfg.n` — the direct analogue of the original's
    /// `MPI_Comm_size != config.n` rejection.
    pub fn resolve_peer_addrs(&self, cfg: &Config) -> Result<Vec<SocketAddr>> {
        let peers = self.peers.as_deref().ok_or_else(|| {
            DsmError::InvalidProcess("--peers is required unless --loopback is set".into())
        })?;

        let addrs: Vec<SocketAddr> = peers
            .split(',')
            .map(|s| {
                s.trim()
                    .parse()
                    .map_err(|e| DsmError::InvalidProcess(format!("invalid --peers address {s:?}: {e}")))
            })
            .collect::<Result<_>>()?;

        cfg.check_peer_count(addrs.len())?;
        Ok(addrs)
    }
}
