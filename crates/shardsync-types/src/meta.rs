//! Fixed-layout 32-byte metadata records.
//!
//! Two records share the same width but not the same layout:
//!
//! - [`KvMeta`] is what the ledger reports for a slot: the slot index in the
//!   first five bytes, the blob size in the next three, and the commitment
//!   prefix in the trailing [`HASH_SIZE_IN_CONTRACT`] bytes.
//! - [`SlotMeta`] is what the shard engine stores next to each slot: the
//!   commitment prefix in the leading bytes, followed by a byte whose high bit
//!   is the filling bit.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::commitment::Commitment;
use crate::error::TypeError;

/// Width of every metadata record.
pub const META_SIZE: usize = 32;

/// Number of commitment bytes the ledger retains per slot.
pub const HASH_SIZE_IN_CONTRACT: usize = 24;

/// Set in byte [`HASH_SIZE_IN_CONTRACT`] of a [`SlotMeta`] once the slot has
/// been written, with real content or with the empty blob.
pub const FILLING_MASK: u8 = 0b1000_0000;

const KV_INDEX_BYTES: usize = 5;
const KV_SIZE_END: usize = 8;

/// Ledger-side metadata record for one slot.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KvMeta([u8; META_SIZE]);

impl KvMeta {
    /// Build a record for `kv_index` expecting `commitment`.
    ///
    /// Only the low five bytes of `kv_index` and the low three bytes of
    /// `kv_size` are kept; [`ShardParams::validate`](crate::ShardParams::validate)
    /// and [`ShardParams::slot_range`](crate::ShardParams::slot_range) bound
    /// both for every local slot.
    pub fn new(kv_index: u64, kv_size: u32, commitment: &Commitment) -> Self {
        let mut meta = Self::index_only(kv_index);
        meta.0[KV_INDEX_BYTES..KV_SIZE_END].copy_from_slice(&kv_size.to_be_bytes()[1..]);
        meta.0[META_SIZE - HASH_SIZE_IN_CONTRACT..].copy_from_slice(commitment.prefix());
        meta
    }

    /// A record carrying only the slot index: the ledger expects no content.
    pub fn index_only(kv_index: u64) -> Self {
        let mut raw = [0u8; META_SIZE];
        raw[..KV_INDEX_BYTES].copy_from_slice(&kv_index.to_be_bytes()[8 - KV_INDEX_BYTES..]);
        Self(raw)
    }

    pub const fn from_raw(raw: [u8; META_SIZE]) -> Self {
        Self(raw)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        let raw: [u8; META_SIZE] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: META_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; META_SIZE] {
        &self.0
    }

    /// The slot index embedded in the record.
    pub fn kv_index(&self) -> u64 {
        let mut buf = [0u8; 8];
        buf[8 - KV_INDEX_BYTES..].copy_from_slice(&self.0[..KV_INDEX_BYTES]);
        u64::from_be_bytes(buf)
    }

    /// Blob size reported by the ledger. Zero for locally synthesized records.
    pub fn kv_size(&self) -> u32 {
        let mut buf = [0u8; 4];
        buf[1..].copy_from_slice(&self.0[KV_INDEX_BYTES..KV_SIZE_END]);
        u32::from_be_bytes(buf)
    }

    /// The expected commitment prefix.
    pub fn hash_prefix(&self) -> &[u8] {
        &self.0[META_SIZE - HASH_SIZE_IN_CONTRACT..]
    }

    /// Returns `true` if `commitment` carries the expected prefix.
    pub fn matches(&self, commitment: &Commitment) -> bool {
        self.hash_prefix() == commitment.prefix()
    }

    /// Returns `true` if the ledger expects the empty blob here.
    pub fn expects_empty(&self) -> bool {
        self.hash_prefix().iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for KvMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KvMeta")
            .field("kv_index", &self.kv_index())
            .field("kv_size", &self.kv_size())
            .field("hash", &hex::encode(self.hash_prefix()))
            .finish()
    }
}

/// Physical metadata the shard engine keeps for one slot.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotMeta([u8; META_SIZE]);

impl SlotMeta {
    /// Metadata of a slot nothing has been written to.
    pub const fn zero() -> Self {
        Self([0u8; META_SIZE])
    }

    /// Metadata recorded when `commitment` is written: the prefix plus the
    /// filling bit.
    pub fn filled(commitment: &Commitment) -> Self {
        let mut raw = [0u8; META_SIZE];
        raw[..HASH_SIZE_IN_CONTRACT].copy_from_slice(commitment.prefix());
        raw[HASH_SIZE_IN_CONTRACT] |= FILLING_MASK;
        Self(raw)
    }

    /// Metadata of a slot explicitly filled with the empty blob.
    pub fn empty_filled() -> Self {
        Self::filled(&Commitment::zero())
    }

    pub const fn from_raw(raw: [u8; META_SIZE]) -> Self {
        Self(raw)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TypeError> {
        let raw: [u8; META_SIZE] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: META_SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self(raw))
    }

    pub fn as_bytes(&self) -> &[u8; META_SIZE] {
        &self.0
    }

    pub fn hash_prefix(&self) -> &[u8] {
        &self.0[..HASH_SIZE_IN_CONTRACT]
    }

    pub fn is_filled(&self) -> bool {
        self.0[HASH_SIZE_IN_CONTRACT] & FILLING_MASK != 0
    }

    /// Returns `true` if the slot is already filled with `commitment`.
    pub fn holds(&self, commitment: &Commitment) -> bool {
        self.is_filled() && self.hash_prefix() == commitment.prefix()
    }

    /// Three-way classification of the slot.
    pub fn state(&self) -> SlotState {
        if self.0 == [0u8; META_SIZE] {
            SlotState::Unsynced
        } else if *self == Self::empty_filled() {
            SlotState::EmptyFilled
        } else {
            SlotState::Filled
        }
    }
}

impl fmt::Debug for SlotMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SlotMeta")
            .field("hash", &hex::encode(self.hash_prefix()))
            .field("filled", &self.is_filled())
            .finish()
    }
}

/// Storage state of a slot, derived from its [`SlotMeta`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotState {
    /// No commit has reached local storage.
    Unsynced,
    /// Filled with the empty blob.
    EmptyFilled,
    /// Holds real content.
    Filled,
}

impl SlotState {
    /// Only slots with real content can be served.
    pub fn is_readable(&self) -> bool {
        matches!(self, Self::Filled)
    }
}

impl fmt::Display for SlotState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unsynced => write!(f, "unsynced"),
            Self::EmptyFilled => write!(f, "empty"),
            Self::Filled => write!(f, "filled"),
        }
    }
}
