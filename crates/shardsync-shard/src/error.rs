use shardsync_types::TypeError;

/// Errors from shard engine operations.
#[derive(Debug, thiserror::Error)]
pub enum ShardError {
    /// The shard is not stored locally.
    #[error("shard {0} not found")]
    ShardNotFound(u64),

    /// A raw blob does not fit in one slot.
    #[error("blob for slot {slot} is {len} bytes, slot size is {max}")]
    BlobTooLarge { slot: u64, len: usize, max: u64 },

    /// An encoded blob is not exactly one slot wide.
    #[error("encoded blob for slot {slot} is {len} bytes, expected {expected}")]
    EncodedLength { slot: u64, len: usize, expected: u64 },

    /// A read asked for more bytes than a slot holds.
    #[error("read of {len} bytes from slot {slot} exceeds slot size {max}")]
    ReadTooLong { slot: u64, len: usize, max: u64 },

    /// A sample index lies outside the shard.
    #[error("sample {sample} out of range for shard {shard}")]
    SampleOutOfRange { shard: u64, sample: u64 },

    /// The backend refused a physical write.
    #[error("write to slot {slot} failed: {reason}")]
    WriteFailed { slot: u64, reason: String },

    /// The engine has been closed.
    #[error("shard store is closed")]
    Closed,

    /// Invalid shard geometry.
    #[error(transparent)]
    InvalidParams(#[from] TypeError),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for shard engine operations.
pub type ShardResult<T> = Result<T, ShardError>;
