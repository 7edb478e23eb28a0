//! Immutable run configuration: peer count, block count, block size, own rank.

use crate::error::{DsmError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// `(N, K, T, self)` — identical `(N, K, T)` is required across all peers; only
/// `rank` differs between processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Peer count, `N >= 1`.
    pub n: u32,
    /// Total block count, `K >= 1`.
    pub k: u32,
    /// Block size in bytes, `T >= 1`.
    pub t: u32,
    /// This peer's rank, `0 <= rank < N`.
    pub rank: u32,
}

impl Config {
    pub fn new(n: u32, k: u32, t: u32, rank: u32) -> Result<Self> {
        let cfg = Self { n, k, t, rank };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n == 0 || self.k == 0 || self.t == 0 {
            return Err(DsmError::InvalidProcess(
                "n, k and t must all be non-zero".into(),
            ));
        }
        if self.rank >= self.n {
            return Err(DsmError::InvalidProcess(format!(
                "rank {} out of range for n={}",
                self.rank, self.n
            )));
        }
        Ok(())
    }

    /// Total address space size in bytes, `K * T`.
    pub fn address_space(&self) -> u64 {
        self.k as u64 * self.t as u64
    }

    /// Number of blocks owned by `rank` under the round-robin placement,
    /// `ceil((K - rank) / N)`.
    pub fn local_block_count(&self, rank: u32) -> u32 {
        if rank >= self.k {
            return 0;
        }
        ((self.k - rank) + self.n - 1) / self.n
    }

    /// Rejects a peer-launch whose declared peer count does not match the
    /// number of live peers this process was actually told about — the
    /// direct analogue of the original's `MPI_Comm_size != config.n` check.
    pub fn check_peer_count(&self, live_peers: usize) -> Result<()> {
        if live_peers as u32 != self.n {
            return Err(DsmError::InvalidProcess(format!(
                "configured n={} but {} peers were launched",
                self.n, live_peers
            )));
        }
        Ok(())
    }

    /// Parses a `key value` config file: `#` comments and blank lines are
    /// skipped; recognized keys are `processes|n`, `blocks|k`, `block_size|t`,
    /// `process_id|pid`. Mirrors `load_config_from_file` in the reference
    /// implementation.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref()).map_err(|e| {
            DsmError::InvalidProcess(format!(
                "unable to open config file {}: {e}",
                path.as_ref().display()
            ))
        })?;

        let mut n: Option<u32> = None;
        let mut k: Option<u32> = None;
        let mut t: Option<u32> = None;
        let mut rank: Option<u32> = None;

        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let mut parts = line.split_whitespace();
            let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
                continue;
            };
            let parsed: Option<u32> = value.parse().ok();
            match key {
                "processes" | "n" => n = parsed,
                "blocks" | "k" => k = parsed,
                "block_size" | "t" => t = parsed,
                "process_id" | "pid" => rank = parsed,
                _ => {}
            }
        }

        let cfg = Self {
            n: n.unwrap_or(0),
            k: k.unwrap_or(0),
            t: t.unwrap_or(0),
            rank: rank.unwrap_or(u32::MAX),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_block_count_matches_round_robin_counting() {
        let cfg = Config::new(4, 10, 16, 0).unwrap();
        // Blocks 0,4,8 -> rank 0 (3 blocks); 1,5,9 -> rank 1 (3); 2,6 -> rank 2 (2); 3,7 -> rank 3 (2)
        assert_eq!(cfg.local_block_count(0), 3);
        assert_eq!(cfg.local_block_count(1), 3);
        assert_eq!(cfg.local_block_count(2), 2);
        assert_eq!(cfg.local_block_count(3), 2);
    }

    #[test]
    fn rejects_rank_out_of_range() {
        assert!(Config::new(4, 10, 16, 4).is_err());
    }

    #[test]
    fn parses_config_file() {
        let dir = std::env::temp_dir().join(format!("dsm-cfg-test-{}", std::process::id()));
        std::fs::write(
            &dir,
            "# comment\nprocesses 4\nblocks 8\nblock_size 16\npid 0\n",
        )
        .unwrap();
        let cfg = Config::from_file(&dir).unwrap();
        std::fs::remove_file(&dir).ok();
        assert_eq!(cfg, Config::new(4, 8, 16, 0).unwrap());
    }

    #[test]
    fn round_trips_through_json_for_logging_snapshots() {
        let cfg = Config::new(4, 10, 16, 2).unwrap();
        let json = serde_json::to_string(&cfg).unwrap();
        let back: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg, back);
    }
}
