//! Shard storage engine boundary for shardsync.
//!
//! A shard is a contiguous range of slots owned by one address. The engine
//! stores a fixed-size encoded blob and a 32-byte [`SlotMeta`] per slot; it
//! never decides whether a write is *allowed*. That is the storage manager's
//! job.
//!
//! # Backends
//!
//! All backends implement the [`ShardStore`] trait:
//!
//! - [`MemoryShardStore`] -- map-based engine for tests and embedding
//!
//! # Conventions
//!
//! 1. `Ok(None)` / `Ok(false)` mean the slot is not in a locally stored shard.
//! 2. Encoded blobs are always exactly one slot wide.
//! 3. Metadata is written together with the blob it describes.
//! 4. All I/O errors are propagated, never silently ignored.
//!
//! [`SlotMeta`]: shardsync_types::SlotMeta

pub mod codec;
pub mod error;
pub mod memory;
pub mod traits;

pub use error::{ShardError, ShardResult};
pub use memory::MemoryShardStore;
pub use traits::ShardStore;
