use async_trait::async_trait;
use shardsync_types::{BlockHeader, BlockId, KvMeta};

use crate::error::LedgerResult;

/// Read boundary for the authoritative ledger.
#[async_trait]
pub trait LedgerSource: Send + Sync {
    /// Expected metadata for `kv_indices` as of `block`.
    ///
    /// The response preserves request order and is all-or-nothing.
    async fn kv_metas(&self, kv_indices: &[u64], block: u64) -> LedgerResult<Vec<KvMeta>>;

    /// Exclusive upper bound of the slot indices assigned as of `block`.
    async fn last_kv_index(&self, block: u64) -> LedgerResult<u64>;

    async fn header_by_number(&self, id: BlockId) -> LedgerResult<BlockHeader>;
}
