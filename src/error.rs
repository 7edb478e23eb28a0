//! Status values surfaced across the public API.

use thiserror::Error;

/// Everything that can go wrong in the block layer, one variant per Status
/// value in the spec's external-interface table.
#[derive(Debug, Error)]
pub enum DsmError {
    #[error("invalid position {position} (address space is {space} bytes)")]
    InvalidPosition { position: u64, space: u64 },

    #[error("invalid size: position {position} + len {len} exceeds address space {space}")]
    InvalidSize { position: u64, len: u64, space: u64 },

    #[error("block {block_id} not found on rank {rank} (not its owner)")]
    BlockNotFound { block_id: u32, rank: u32 },

    #[error("communication failure with rank {peer}: {reason}")]
    Communication { peer: u32, reason: String },

    #[error("memory allocation failed: {0}")]
    Memory(String),

    #[error("invalid process configuration: {0}")]
    InvalidProcess(String),
}

pub type Result<T> = std::result::Result<T, DsmError>;
