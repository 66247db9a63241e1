use std::fmt;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// log2 of the sample width read by miners (32 bytes).
pub const SAMPLE_SIZE_BITS: u32 = 5;

/// Slot indices are stored in five bytes of a ledger record.
pub const MAX_INDEX_BITS: u32 = 40;

/// Blob sizes are stored in three bytes of a ledger record, and a full slot
/// must fit.
pub const MAX_KV_SIZE_BITS: u32 = 23;

/// Static geometry shared by every shard of a storage contract.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardParams {
    /// log2 of the number of slots per shard.
    pub kv_entries_bits: u32,
    /// log2 of the byte size of one slot.
    pub kv_size_bits: u32,
    /// log2 of the number of chunks a slot is split into by the encoder.
    pub chunks_per_kv_bits: u32,
}

impl Default for ShardParams {
    fn default() -> Self {
        Self {
            kv_entries_bits: 13,
            kv_size_bits: 17,
            chunks_per_kv_bits: 5,
        }
    }
}

impl ShardParams {
    pub fn validate(&self) -> Result<(), TypeError> {
        if self.kv_entries_bits == 0 || self.kv_entries_bits >= MAX_INDEX_BITS {
            return Err(TypeError::InvalidShardParams(format!(
                "kv_entries_bits must be in 1..{MAX_INDEX_BITS}, got {}",
                self.kv_entries_bits
            )));
        }
        if self.kv_size_bits < SAMPLE_SIZE_BITS || self.kv_size_bits > MAX_KV_SIZE_BITS {
            return Err(TypeError::InvalidShardParams(format!(
                "kv_size_bits must be in {SAMPLE_SIZE_BITS}..={MAX_KV_SIZE_BITS}, got {}",
                self.kv_size_bits
            )));
        }
        if self.chunks_per_kv_bits > self.kv_size_bits - SAMPLE_SIZE_BITS {
            return Err(TypeError::InvalidShardParams(format!(
                "chunks_per_kv_bits {} leaves chunks smaller than a sample",
                self.chunks_per_kv_bits
            )));
        }
        Ok(())
    }

    /// Slots per shard.
    pub fn kv_entries(&self) -> u64 {
        1 << self.kv_entries_bits
    }

    /// Byte size of one slot.
    pub fn kv_size(&self) -> u64 {
        1 << self.kv_size_bits
    }

    /// log2 of the number of 32-byte samples per slot.
    pub fn samples_per_kv_bits(&self) -> u32 {
        self.kv_size_bits - SAMPLE_SIZE_BITS
    }

    /// The shard `kv_index` belongs to.
    pub fn shard_of(&self, kv_index: u64) -> u64 {
        kv_index >> self.kv_entries_bits
    }

    /// Number of shards whose slot indices fit in a ledger record.
    pub fn max_shards(&self) -> u64 {
        1 << (MAX_INDEX_BITS - self.kv_entries_bits)
    }

    /// Slot indices covered by `shard`.
    pub fn slot_range(&self, shard: u64) -> Result<Range<u64>, TypeError> {
        if shard >= self.max_shards() {
            return Err(TypeError::ShardOutOfRange {
                shard,
                max: self.max_shards(),
            });
        }
        let first = shard << self.kv_entries_bits;
        Ok(first..first + self.kv_entries())
    }
}

/// How a shard encodes blob content on disk.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodingType {
    /// Content stored as-is, zero padded to the slot size.
    #[default]
    Plain,
    /// Content XOR-ed with a key stream bound to the slot, owner and commitment.
    Masked,
}

impl EncodingType {
    pub fn as_u64(&self) -> u64 {
        match self {
            Self::Plain => 0,
            Self::Masked => 1,
        }
    }
}

impl TryFrom<u64> for EncodingType {
    type Error = TypeError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Plain),
            1 => Ok(Self::Masked),
            other => Err(TypeError::UnknownEncoding(other)),
        }
    }
}

impl fmt::Display for EncodingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plain => write!(f, "plain"),
            Self::Masked => write!(f, "masked"),
        }
    }
}
