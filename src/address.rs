//! Position <-> (block, offset), block -> owner, owned block -> local slot.
//!
//! Every operation here is pure and total given inputs validated against
//! `Config`; callers are expected to range-check before calling.

use crate::config::Config;

#[derive(Debug, Clone, Copy)]
pub struct AddressMap {
    cfg: Config,
}

impl AddressMap {
    pub fn new(cfg: Config) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn block_of(&self, pos: u64) -> u32 {
        (pos / self.cfg.t as u64) as u32
    }

    pub fn offset_of(&self, pos: u64) -> u32 {
        (pos % self.cfg.t as u64) as u32
    }

    /// `owner(b) = b mod N`, round-robin static placement.
    pub fn owner(&self, block_id: u32) -> u32 {
        block_id % self.cfg.n
    }

    pub fn is_owner(&self, block_id: u32) -> bool {
        self.owner(block_id) == self.cfg.rank
    }

    /// Offset (in blocks) into this rank's local store for a block it owns.
    /// Equivalent to counting owned blocks with id `< block_id`; since
    /// ownership is round-robin this is just `block_id / N`.
    pub fn local_slot(&self, block_id: u32) -> u32 {
        debug_assert!(self.is_owner(block_id));
        block_id / self.cfg.n
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(n: u32, k: u32, t: u32, rank: u32) -> AddressMap {
        AddressMap::new(Config::new(n, k, t, rank).unwrap())
    }

    #[test]
    fn slices_position_into_block_and_offset() {
        let m = map(4, 8, 16, 0);
        assert_eq!(m.block_of(0), 0);
        assert_eq!(m.offset_of(0), 0);
        assert_eq!(m.block_of(20), 1);
        assert_eq!(m.offset_of(20), 4);
    }

    #[test]
    fn ownership_is_round_robin_and_disjoint() {
        let m = map(4, 8, 16, 0);
        for b in 0..8u32 {
            let owners: Vec<u32> = (0..4).filter(|&r| map(4, 8, 16, r).owner(b) == r).collect();
            assert_eq!(owners.len(), 1, "block {b} must have exactly one owner");
        }
    }

    #[test]
    fn local_slot_is_contiguous_per_owner() {
        let m = map(4, 8, 16, 1);
        // rank 1 owns blocks 1, 5 -> slots 0, 1
        assert_eq!(m.local_slot(1), 0);
        assert_eq!(m.local_slot(5), 1);
    }
}
