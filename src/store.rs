//! Contiguous backing storage for the blocks this rank owns.
//!
//! Concurrent readers/writers on an owned block are serialized by the
//! protocol layer being single-flight per inbound connection (see
//! `protocol.rs`); the store itself holds a single lock around the whole
//! buffer, which is cheap here because block-level critical sections are
//! short memcpy-sized operations.

use crate::config::Config;
use crate::error::{DsmError, Result};
use tokio::sync::Mutex;

pub struct LocalBlockStore {
    t: u32,
    data: Mutex<Vec<u8>>,
}

impl LocalBlockStore {
    pub fn new(cfg: &Config, rank: u32) -> Self {
        let local_blocks = cfg.local_block_count(rank);
        let len = local_blocks as usize * cfg.t as usize;
        Self {
            t: cfg.t,
            data: Mutex::new(vec![0u8; len]),
        }
    }

    pub async fn read(&self, slot: u32, offset: u32, len: u32) -> Result<Vec<u8>> {
        self.check_bounds(offset, len)?;
        let data = self.data.lock().await;
        let start = slot as usize * self.t as usize + offset as usize;
        Ok(data[start..start + len as usize].to_vec())
    }

    pub async fn write(&self, slot: u32, offset: u32, bytes: &[u8]) -> Result<()> {
        self.check_bounds(offset, bytes.len() as u32)?;
        let mut data = self.data.lock().await;
        let start = slot as usize * self.t as usize + offset as usize;
        data[start..start + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    fn check_bounds(&self, offset: u32, len: u32) -> Result<()> {
        if offset as u64 + len as u64 > self.t as u64 {
            return Err(DsmError::InvalidSize {
                position: offset as u64,
                len: len as u64,
                space: self.t as u64,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_within_a_block() {
        let cfg = Config::new(1, 2, 16, 0).unwrap();
        let store = LocalBlockStore::new(&cfg, 0);
        store.write(1, 4, b"hello").await.unwrap();
        let got = store.read(1, 4, 5).await.unwrap();
        assert_eq!(got, b"hello");
    }

    #[tokio::test]
    async fn rejects_out_of_bounds_access() {
        let cfg = Config::new(1, 1, 16, 0).unwrap();
        let store = LocalBlockStore::new(&cfg, 0);
        assert!(store.write(0, 12, b"too long here").await.is_err());
    }
}
