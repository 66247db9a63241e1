use thiserror::Error;

/// Errors produced by type operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TypeError {
    #[error("invalid hex string: {0}")]
    InvalidHex(String),

    #[error("invalid byte length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("unknown encoding type: {0}")]
    UnknownEncoding(u64),

    #[error("invalid shard parameters: {0}")]
    InvalidShardParams(String),

    #[error("shard {shard} out of range, at most {max} shards are addressable")]
    ShardOutOfRange { shard: u64, max: u64 },
}
