//! Property tests over the pure position/ownership arithmetic in
//! `dsm::address`, independent of any transport or async runtime.

use dsm::address::AddressMap;
use dsm::config::Config;
use proptest::prelude::*;

fn map(n: u32, k: u32, t: u32, rank: u32) -> AddressMap {
    AddressMap::new(Config::new(n, k, t, rank).unwrap())
}

proptest! {
    /// Invariant 1: every block has exactly one owner under the round-robin
    /// placement, for any valid (n, k).
    #[test]
    fn ownership_is_always_exactly_one_rank(
        n in 1u32..16,
        k in 1u32..200,
        block_id in 0u32..200,
    ) {
        prop_assume!(block_id < k);
        let owners: u32 = (0..n).filter(|&r| map(n, k, 1, r).owner(block_id) == r).count() as u32;
        prop_assert_eq!(owners, 1);
    }

    /// Invariant 7: slicing a position into (block, offset) and back
    /// reconstructs the original position, for any position within the
    /// address space.
    #[test]
    fn block_and_offset_reconstruct_position(
        n in 1u32..8,
        k in 1u32..50,
        t in 1u32..64,
        pos in 0u64..(50u64 * 64),
    ) {
        let space = k as u64 * t as u64;
        prop_assume!(pos < space);
        let m = map(n, k, t, 0);
        let block = m.block_of(pos);
        let offset = m.offset_of(pos);
        prop_assert_eq!(block as u64 * t as u64 + offset as u64, pos);
        prop_assert!(offset < t);
    }

    /// A rank's local block count, summed across all ranks, accounts for
    /// every block exactly once.
    #[test]
    fn local_block_counts_partition_all_blocks(n in 1u32..16, k in 1u32..200) {
        let cfg = Config::new(n, k, 1, 0).unwrap();
        let total: u32 = (0..n).map(|r| cfg.local_block_count(r)).sum();
        prop_assert_eq!(total, k);
    }
}
