//! Foundation types for shardsync.
//!
//! Every other shardsync crate depends on `shardsync-types`.
//!
//! # Key Types
//!
//! - [`Commitment`] -- content commitment of a blob; only its prefix is compared
//! - [`KvMeta`] -- 32-byte ledger record: slot index, size, commitment prefix
//! - [`SlotMeta`] -- 32-byte physical record: commitment prefix plus filling bit
//! - [`SlotState`] -- unsynced / empty / filled classification of a slot
//! - [`ShardParams`] -- slot and shard geometry
//! - [`BlockId`], [`BlockHeader`] -- ledger block references

pub mod block;
pub mod commitment;
pub mod error;
pub mod meta;
pub mod shard;

pub use block::{BlockHeader, BlockId};
pub use commitment::{Address, Commitment};
pub use error::TypeError;
pub use meta::{KvMeta, SlotMeta, SlotState, FILLING_MASK, HASH_SIZE_IN_CONTRACT, META_SIZE};
pub use shard::{EncodingType, ShardParams, MAX_INDEX_BITS, MAX_KV_SIZE_BITS, SAMPLE_SIZE_BITS};
