//! Fixed-capacity cache of remote blocks with write-invalidate coherence.
//!
//! Arena-style: `C` entries at stable indices, referenced by index rather
//! than by pointer, so eviction can never produce a dangling reference.
//!
//! Locking discipline: the cache-wide lock guards the slot-allocation
//! decision (which entry houses which block) and the round-robin victim
//! pointer; each entry's own lock guards its data and flags. Acquire the
//! cache-wide lock before a per-entry lock, never the reverse.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::Mutex;

use crate::error::{DsmError, Result};

/// Number of cache entries. Matches `CACHE_SIZE` in the reference
/// implementation.
pub const DEFAULT_CACHE_CAPACITY: usize = 128;

const EMPTY: i64 = -1;

pub struct CacheSlot {
    pub block_id: i64,
    pub data: Vec<u8>,
    pub valid: bool,
    /// Never set to `true` on this crate's read/write paths — see
    /// DESIGN.md / SPEC_FULL.md §9 note 2. Kept, not removed, because the
    /// write-back path that consumes it is part of the specified eviction
    /// algorithm and must still run correctly for a dirty entry however it
    /// got dirtied.
    pub dirty: bool,
}

impl CacheSlot {
    fn empty(block_size: u32) -> Self {
        Self {
            block_id: EMPTY,
            data: vec![0u8; block_size as usize],
            valid: false,
            dirty: false,
        }
    }
}

pub struct BlockCache {
    block_size: u32,
    capacity: usize,
    entries: Vec<Mutex<CacheSlot>>,
    /// Serializes allocation/eviction decisions and the victim pointer.
    admission: Mutex<()>,
    victim: AtomicUsize,
}

impl BlockCache {
    pub fn new(block_size: u32) -> Self {
        Self::with_capacity(block_size, DEFAULT_CACHE_CAPACITY)
    }

    pub fn with_capacity(block_size: u32, capacity: usize) -> Self {
        let entries = (0..capacity)
            .map(|_| Mutex::new(CacheSlot::empty(block_size)))
            .collect();
        Self {
            block_size,
            capacity,
            entries,
            admission: Mutex::new(()),
            victim: AtomicUsize::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Non-blocking scan for a live valid entry for `block_id`; returns the
    /// copied data on a hit.
    pub async fn find(&self, block_id: u32) -> Option<Vec<u8>> {
        for entry in &self.entries {
            let slot = entry.lock().await;
            if slot.valid && slot.block_id == block_id as i64 {
                return Some(slot.data.clone());
            }
        }
        None
    }

    /// Number of entries currently `valid`. Used to enforce the
    /// cache-bounded invariant in tests.
    pub async fn valid_count(&self) -> usize {
        let mut n = 0;
        for entry in &self.entries {
            if entry.lock().await.valid {
                n += 1;
            }
        }
        n
    }

    /// Allocates an entry to house `block_id`, evicting a victim with
    /// round-robin replacement if no free entry exists. If the victim is
    /// dirty, `write_back` is invoked with its `(block_id, data)` *while its
    /// per-entry lock is still held*, before the slot is reassigned — per
    /// spec §4.3 step 3-4, eviction only completes once that write-back has
    /// succeeded. If `write_back` fails, the error propagates and the
    /// victim entry is left exactly as it was (still valid, dirty, holding
    /// its original data): no caller can observe a slot reassigned to the
    /// new `block_id` without its write-back having actually completed.
    /// The caller must still call `commit` afterward to install the new
    /// block's data.
    pub async fn allocate<F, Fut>(&self, block_id: u32, write_back: F) -> Result<usize>
    where
        F: FnOnce(u32, Vec<u8>) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let _admission = self.admission.lock().await;

        for (i, entry) in self.entries.iter().enumerate() {
            let mut slot = entry.lock().await;
            if !slot.valid {
                slot.block_id = block_id as i64;
                slot.valid = true;
                slot.dirty = false;
                return Ok(i);
            }
        }

        let index = self.victim.fetch_add(1, Ordering::SeqCst) % self.capacity;
        let mut victim = self.entries[index].lock().await;
        if victim.valid && victim.dirty {
            write_back(victim.block_id as u32, victim.data.clone()).await?;
        }
        victim.block_id = block_id as i64;
        victim.valid = true;
        victim.dirty = false;
        Ok(index)
    }

    /// Copies `data` (a full `T`-byte block) into the allocated slot and
    /// marks it clean. Called once the caller has resolved any pending
    /// write-back from `allocate`.
    pub async fn commit(&self, index: usize, data: &[u8]) -> Result<()> {
        if data.len() != self.block_size as usize {
            return Err(DsmError::Memory(format!(
                "cache commit expected {} bytes, got {}",
                self.block_size,
                data.len()
            )));
        }
        let mut slot = self.entries[index].lock().await;
        slot.data.copy_from_slice(data);
        slot.dirty = false;
        Ok(())
    }

    /// If a matching valid entry exists, clears `valid` and `dirty`.
    /// Idempotent: invalidating an already-invalid or absent entry is a
    /// no-op.
    pub async fn invalidate(&self, block_id: u32) {
        for entry in &self.entries {
            let mut slot = entry.lock().await;
            if slot.valid && slot.block_id == block_id as i64 {
                slot.valid = false;
                slot.dirty = false;
            }
        }
    }

    /// Two passes under the admission lock: write back every dirty valid
    /// entry, then invalidate everything. Returns the write-backs the
    /// caller must perform (block_id, data) before the flush is considered
    /// complete.
    pub async fn flush_all(&self) -> Vec<(u32, Vec<u8>)> {
        let _admission = self.admission.lock().await;
        let mut write_backs = Vec::new();
        for entry in &self.entries {
            let slot = entry.lock().await;
            if slot.valid && slot.dirty {
                write_backs.push((slot.block_id as u32, slot.data.clone()));
            }
        }
        for entry in &self.entries {
            let mut slot = entry.lock().await;
            slot.valid = false;
            slot.dirty = false;
            slot.block_id = EMPTY;
        }
        write_backs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A `write_back` that is never expected to run (no victim in these
    /// tests is ever dirty).
    async fn no_write_back(_block_id: u32, _data: Vec<u8>) -> Result<()> {
        Ok(())
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let cache = BlockCache::with_capacity(4, 2);
        assert!(cache.find(7).await.is_none());
        let index = cache.allocate(7, no_write_back).await.unwrap();
        cache.commit(index, &[1, 2, 3, 4]).await.unwrap();
        assert_eq!(cache.find(7).await, Some(vec![1, 2, 3, 4]));
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let cache = BlockCache::with_capacity(4, 2);
        let index = cache.allocate(7, no_write_back).await.unwrap();
        cache.commit(index, &[9, 9, 9, 9]).await.unwrap();
        cache.invalidate(7).await;
        cache.invalidate(7).await;
        assert!(cache.find(7).await.is_none());
        assert_eq!(cache.valid_count().await, 0);
    }

    #[tokio::test]
    async fn eviction_is_round_robin_and_bounded() {
        let cache = BlockCache::with_capacity(4, 2);
        for id in 0..2u32 {
            let index = cache.allocate(id, no_write_back).await.unwrap();
            cache.commit(index, &[id as u8; 4]).await.unwrap();
        }
        assert_eq!(cache.valid_count().await, 2);
        // cache full, clean -> evicting admits the new block with no write-back
        let index = cache.allocate(2, no_write_back).await.unwrap();
        cache.commit(index, &[2u8; 4]).await.unwrap();
        assert_eq!(cache.valid_count().await, 2);
    }

    #[tokio::test]
    async fn failed_write_back_leaves_victim_untouched() {
        let cache = BlockCache::with_capacity(4, 1);
        let index = cache.allocate(1, no_write_back).await.unwrap();
        cache.commit(index, &[1, 1, 1, 1]).await.unwrap();
        {
            // Simulate a dirty victim directly; nothing on the public
            // read/write path sets `dirty` today (SPEC_FULL.md §9), but the
            // eviction write-back machinery must still be correct if it is
            // ever reached.
            let mut slot = cache.entries[index].lock().await;
            slot.dirty = true;
        }

        let err = cache
            .allocate(2, |_block_id, _data| async {
                Err(DsmError::Communication {
                    peer: 1,
                    reason: "write-back refused".into(),
                })
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DsmError::Communication { .. }));

        // The failed write-back must not have reassigned the victim slot:
        // block 1's data must still be there, and block 2 must not have
        // been admitted.
        assert_eq!(cache.find(1).await, Some(vec![1, 1, 1, 1]));
        assert!(cache.find(2).await.is_none());
    }
}
