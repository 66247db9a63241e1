use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use shardsync_types::{Address, Commitment, EncodingType, ShardParams, SlotMeta};

use crate::codec;
use crate::error::{ShardError, ShardResult};
use crate::traits::ShardStore;

/// In-memory shard engine.
///
/// Intended for tests and embedding. Shards are registered up front with
/// [`add_shard`](Self::add_shard); slots that were never written read back
/// as zero data with [`SlotMeta::zero`]. Write failures can be injected per
/// slot to exercise error paths in callers.
pub struct MemoryShardStore {
    params: ShardParams,
    contract: Address,
    shards: RwLock<BTreeMap<u64, MemoryShard>>,
    failing_slots: RwLock<HashSet<u64>>,
    writes: AtomicU64,
    closed: AtomicBool,
}

struct MemoryShard {
    owner: Address,
    encoding: EncodingType,
    slots: HashMap<u64, StoredSlot>,
}

struct StoredSlot {
    data: Vec<u8>,
    meta: SlotMeta,
}

impl MemoryShardStore {
    /// Create an engine with no shards.
    pub fn new(params: ShardParams, contract: Address) -> ShardResult<Self> {
        params.validate()?;
        Ok(Self {
            params,
            contract,
            shards: RwLock::new(BTreeMap::new()),
            failing_slots: RwLock::new(HashSet::new()),
            writes: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    /// Register a shard. Re-registering keeps existing slot data.
    ///
    /// Fails if the shard's slot indices do not fit in a ledger record.
    pub fn add_shard(
        &self,
        shard: u64,
        owner: Address,
        encoding: EncodingType,
    ) -> ShardResult<()> {
        self.params.slot_range(shard)?;
        let mut shards = self.shards_mut();
        let entry = shards.entry(shard).or_insert_with(|| MemoryShard {
            owner,
            encoding,
            slots: HashMap::new(),
        });
        entry.owner = owner;
        entry.encoding = encoding;
        Ok(())
    }

    /// Builder form of [`add_shard`](Self::add_shard).
    pub fn with_shard(
        self,
        shard: u64,
        owner: Address,
        encoding: EncodingType,
    ) -> ShardResult<Self> {
        self.add_shard(shard, owner, encoding)?;
        Ok(self)
    }

    /// Make every later write to `kv_index` fail.
    pub fn fail_writes_to(&self, kv_index: u64) {
        self.failing_slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(kv_index);
    }

    pub fn clear_write_failures(&self) {
        self.failing_slots
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Number of successful physical writes so far.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of slots holding data across all shards.
    pub fn written_slots(&self) -> usize {
        self.shards().values().map(|s| s.slots.len()).sum()
    }

    fn shards(&self) -> RwLockReadGuard<'_, BTreeMap<u64, MemoryShard>> {
        self.shards.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn shards_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<u64, MemoryShard>> {
        self.shards.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn ensure_open(&self) -> ShardResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ShardError::Closed);
        }
        Ok(())
    }

    fn check_injected_failure(&self, kv_index: u64) -> ShardResult<()> {
        let failing = self
            .failing_slots
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if failing.contains(&kv_index) {
            return Err(ShardError::WriteFailed {
                slot: kv_index,
                reason: "injected failure".into(),
            });
        }
        Ok(())
    }

    fn store_slot(&self, kv_index: u64, data: Vec<u8>, meta: SlotMeta) -> bool {
        let shard_id = self.params.shard_of(kv_index);
        let mut shards = self.shards_mut();
        let Some(shard) = shards.get_mut(&shard_id) else {
            return false;
        };
        shard.slots.insert(kv_index, StoredSlot { data, meta });
        self.writes.fetch_add(1, Ordering::SeqCst);
        true
    }

    /// Encoded bytes of a slot, or zeros if it was never written.
    fn encoded_slot(&self, kv_index: u64) -> Option<(Vec<u8>, Address, EncodingType)> {
        let shards = self.shards();
        let shard = shards.get(&self.params.shard_of(kv_index))?;
        let data = shard
            .slots
            .get(&kv_index)
            .map(|s| s.data.clone())
            .unwrap_or_else(|| vec![0u8; self.params.kv_size() as usize]);
        Some((data, shard.owner, shard.encoding))
    }

    fn check_read_len(&self, kv_index: u64, len: usize) -> ShardResult<()> {
        if len as u64 > self.params.kv_size() {
            return Err(ShardError::ReadTooLong {
                slot: kv_index,
                len,
                max: self.params.kv_size(),
            });
        }
        Ok(())
    }
}

impl ShardStore for MemoryShardStore {
    fn params(&self) -> ShardParams {
        self.params
    }

    fn contract_address(&self) -> Address {
        self.contract
    }

    fn shard_ids(&self) -> Vec<u64> {
        self.shards().keys().copied().collect()
    }

    fn shard_owner(&self, shard: u64) -> Option<Address> {
        self.shards().get(&shard).map(|s| s.owner)
    }

    fn shard_encoding(&self, shard: u64) -> Option<EncodingType> {
        self.shards().get(&shard).map(|s| s.encoding)
    }

    fn contains(&self, kv_index: u64) -> bool {
        self.shards().contains_key(&self.params.shard_of(kv_index))
    }

    fn try_write(&self, kv_index: u64, blob: &[u8], meta: SlotMeta) -> ShardResult<bool> {
        self.ensure_open()?;
        let shard_id = self.params.shard_of(kv_index);
        let (Some(owner), Some(encoding)) =
            (self.shard_owner(shard_id), self.shard_encoding(shard_id))
        else {
            return Ok(false);
        };
        self.check_injected_failure(kv_index)?;
        let key = codec::encode_key(meta.hash_prefix(), &owner, kv_index);
        let encoded = codec::encode(encoding, kv_index, blob, self.params.kv_size(), &key)?;
        Ok(self.store_slot(kv_index, encoded, meta))
    }

    fn try_encode(
        &self,
        kv_index: u64,
        blob: &[u8],
        commitment: &Commitment,
    ) -> ShardResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        let shard_id = self.params.shard_of(kv_index);
        let (Some(owner), Some(encoding)) =
            (self.shard_owner(shard_id), self.shard_encoding(shard_id))
        else {
            return Ok(None);
        };
        let key = codec::encode_key(commitment.prefix(), &owner, kv_index);
        codec::encode(encoding, kv_index, blob, self.params.kv_size(), &key).map(Some)
    }

    fn try_write_encoded(
        &self,
        kv_index: u64,
        encoded: &[u8],
        meta: SlotMeta,
    ) -> ShardResult<bool> {
        self.ensure_open()?;
        if !self.contains(kv_index) {
            return Ok(false);
        }
        if encoded.len() as u64 != self.params.kv_size() {
            return Err(ShardError::EncodedLength {
                slot: kv_index,
                len: encoded.len(),
                expected: self.params.kv_size(),
            });
        }
        self.check_injected_failure(kv_index)?;
        Ok(self.store_slot(kv_index, encoded.to_vec(), meta))
    }

    fn try_read(
        &self,
        kv_index: u64,
        len: usize,
        commitment: &Commitment,
    ) -> ShardResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.check_read_len(kv_index, len)?;
        let Some((encoded, owner, encoding)) = self.encoded_slot(kv_index) else {
            return Ok(None);
        };
        let key = codec::encode_key(commitment.prefix(), &owner, kv_index);
        let mut data = codec::decode(encoding, &encoded, &key);
        data.truncate(len);
        Ok(Some(data))
    }

    fn try_read_encoded(&self, kv_index: u64, len: usize) -> ShardResult<Option<Vec<u8>>> {
        self.ensure_open()?;
        self.check_read_len(kv_index, len)?;
        Ok(self.encoded_slot(kv_index).map(|(mut data, _, _)| {
            data.truncate(len);
            data
        }))
    }

    fn try_read_meta(&self, kv_index: u64) -> ShardResult<Option<SlotMeta>> {
        self.ensure_open()?;
        let shards = self.shards();
        Ok(shards.get(&self.params.shard_of(kv_index)).map(|shard| {
            shard
                .slots
                .get(&kv_index)
                .map(|s| s.meta)
                .unwrap_or_else(SlotMeta::zero)
        }))
    }

    fn decode_kv(
        &self,
        kv_index: u64,
        encoded: &[u8],
        commitment: &Commitment,
        owner: &Address,
        encoding: EncodingType,
    ) -> ShardResult<Vec<u8>> {
        let key = codec::encode_key(commitment.prefix(), owner, kv_index);
        Ok(codec::decode(encoding, encoded, &key))
    }

    fn read_sample(&self, shard: u64, sample_index: u64) -> ShardResult<[u8; 32]> {
        self.ensure_open()?;
        let shards = self.shards();
        let stored = shards.get(&shard).ok_or(ShardError::ShardNotFound(shard))?;

        let samples_bits = self.params.samples_per_kv_bits();
        let slot_offset = sample_index >> samples_bits;
        if slot_offset >= self.params.kv_entries() {
            return Err(ShardError::SampleOutOfRange {
                shard,
                sample: sample_index,
            });
        }
        let kv_index = self.params.slot_range(shard)?.start + slot_offset;
        let offset = ((sample_index & ((1 << samples_bits) - 1)) * 32) as usize;

        let mut sample = [0u8; 32];
        if let Some(slot) = stored.slots.get(&kv_index) {
            sample.copy_from_slice(&slot.data[offset..offset + 32]);
        }
        Ok(sample)
    }

    fn close(&self) -> ShardResult<()> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!(shards = self.shards().len(), "memory shard store closed");
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryShardStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryShardStore")
            .field("params", &self.params)
            .field("shards", &self.shard_ids())
            .field("written_slots", &self.written_slots())
            .finish()
    }
}
