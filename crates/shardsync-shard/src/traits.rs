use shardsync_types::{Address, Commitment, EncodingType, ShardParams, SlotMeta};

use crate::error::ShardResult;

/// Physical shard storage engine.
///
/// Implementations are blocking and must be safe to call from several
/// threads at once. Callers serialize writes to the same slot; the engine
/// only has to keep each individual call atomic.
pub trait ShardStore: Send + Sync {
    /// Static geometry of every shard.
    fn params(&self) -> ShardParams;

    /// The storage contract this engine mirrors.
    fn contract_address(&self) -> Address;

    /// Locally stored shards, ascending.
    fn shard_ids(&self) -> Vec<u64>;

    /// Owner of a locally stored shard.
    fn shard_owner(&self, shard: u64) -> Option<Address>;

    /// Encoding used by a locally stored shard.
    fn shard_encoding(&self, shard: u64) -> Option<EncodingType>;

    /// Returns `true` if `kv_index` falls in a locally stored shard.
    fn contains(&self, kv_index: u64) -> bool {
        let shard = self.params().shard_of(kv_index);
        self.shard_ids().contains(&shard)
    }

    /// Encode a raw blob and write it together with `meta`.
    ///
    /// The encoding key is derived from the commitment prefix held by `meta`.
    fn try_write(&self, kv_index: u64, blob: &[u8], meta: SlotMeta) -> ShardResult<bool>;

    /// Encode a raw blob for `kv_index` without writing it.
    fn try_encode(
        &self,
        kv_index: u64,
        blob: &[u8],
        commitment: &Commitment,
    ) -> ShardResult<Option<Vec<u8>>>;

    /// Write an already-encoded blob together with `meta`.
    fn try_write_encoded(&self, kv_index: u64, encoded: &[u8], meta: SlotMeta)
        -> ShardResult<bool>;

    /// Read and decode the first `len` bytes of a slot.
    fn try_read(
        &self,
        kv_index: u64,
        len: usize,
        commitment: &Commitment,
    ) -> ShardResult<Option<Vec<u8>>>;

    /// Read the first `len` encoded bytes of a slot.
    fn try_read_encoded(&self, kv_index: u64, len: usize) -> ShardResult<Option<Vec<u8>>>;

    /// Read the physical metadata of a slot.
    ///
    /// A slot that was never written reports [`SlotMeta::zero`].
    fn try_read_meta(&self, kv_index: u64) -> ShardResult<Option<SlotMeta>>;

    /// Decode an encoded blob with explicit owner and encoding.
    fn decode_kv(
        &self,
        kv_index: u64,
        encoded: &[u8],
        commitment: &Commitment,
        owner: &Address,
        encoding: EncodingType,
    ) -> ShardResult<Vec<u8>>;

    /// Read one 32-byte sample of a shard's encoded data.
    fn read_sample(&self, shard: u64, sample_index: u64) -> ShardResult<[u8; 32]>;

    /// Flush and release the engine. Later calls fail with `Closed`.
    fn close(&self) -> ShardResult<()>;
}
