use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use shardsync_types::{BlockHeader, BlockId, Commitment, KvMeta};

use crate::error::{LedgerError, LedgerResult};
use crate::traits::LedgerSource;

/// In-memory ledger for tests, local demos, and embedding.
///
/// Blocks are appended with [`push_block`](Self::push_block); each block
/// assigns the next slot indices to the blobs it carries. Finality is moved
/// explicitly with [`finalize`](Self::finalize). Metadata requests can be
/// made to fail on demand.
pub struct InMemoryLedger {
    inner: RwLock<LedgerState>,
    failures_pending: AtomicU64,
    meta_requests: AtomicU64,
}

struct LedgerState {
    blocks: Vec<BlockRecord>,
    entries: Vec<SlotEntry>,
    finalized: u64,
}

struct BlockRecord {
    hash: [u8; 32],
    last_kv_index: u64,
}

struct SlotEntry {
    commitment: Commitment,
    size: u32,
}

impl InMemoryLedger {
    /// A ledger holding only the empty genesis block, which is finalized.
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LedgerState {
                blocks: vec![BlockRecord {
                    hash: block_hash(0),
                    last_kv_index: 0,
                }],
                entries: Vec::new(),
                finalized: 0,
            }),
            failures_pending: AtomicU64::new(0),
            meta_requests: AtomicU64::new(0),
        }
    }

    /// Append a block assigning one slot per `(commitment, size)` pair.
    /// Returns the new block number.
    pub fn push_block(&self, blobs: &[(Commitment, u32)]) -> u64 {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        state
            .entries
            .extend(blobs.iter().map(|(commitment, size)| SlotEntry {
                commitment: *commitment,
                size: *size,
            }));
        let number = state.blocks.len() as u64;
        let last_kv_index = state.entries.len() as u64;
        state.blocks.push(BlockRecord {
            hash: block_hash(number),
            last_kv_index,
        });
        number
    }

    /// Append a block carrying `blobs`, committing to each by digest.
    /// Empty blobs are assigned the zero commitment.
    pub fn push_blobs<B: AsRef<[u8]>>(&self, blobs: &[B]) -> u64 {
        let records: Vec<(Commitment, u32)> = blobs
            .iter()
            .map(|b| (blob_commitment(b.as_ref()), b.as_ref().len() as u32))
            .collect();
        self.push_block(&records)
    }

    /// Mark `block` finalized. Finality never moves backwards.
    pub fn finalize(&self, block: u64) -> LedgerResult<()> {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if block as usize >= state.blocks.len() {
            return Err(LedgerError::UnknownBlock(block));
        }
        state.finalized = state.finalized.max(block);
        Ok(())
    }

    pub fn head(&self) -> u64 {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        state.blocks.len() as u64 - 1
    }

    pub fn finalized(&self) -> u64 {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .finalized
    }

    /// Expected commitment of an assigned slot.
    pub fn commitment(&self, kv_index: u64) -> Option<Commitment> {
        let state = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        state.entries.get(kv_index as usize).map(|e| e.commitment)
    }

    /// Make the next `count` metadata requests fail.
    pub fn fail_next_requests(&self, count: u64) {
        self.failures_pending.store(count, Ordering::SeqCst);
    }

    /// Number of metadata requests served or failed so far.
    pub fn meta_requests(&self) -> u64 {
        self.meta_requests.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_pending
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Commitment the in-memory ledger records for a blob.
pub fn blob_commitment(blob: &[u8]) -> Commitment {
    if blob.is_empty() {
        Commitment::zero()
    } else {
        Commitment::digest(blob)
    }
}

fn block_hash(number: u64) -> [u8; 32] {
    *Commitment::digest(&number.to_be_bytes()).as_bytes()
}

#[async_trait]
impl LedgerSource for InMemoryLedger {
    async fn kv_metas(&self, kv_indices: &[u64], block: u64) -> LedgerResult<Vec<KvMeta>> {
        self.meta_requests.fetch_add(1, Ordering::SeqCst);
        if self.take_failure() {
            tracing::debug!(block, count = kv_indices.len(), "injected meta request failure");
            return Err(LedgerError::Request("injected failure".into()));
        }

        let state = self
            .inner
            .read()
            .map_err(|_| LedgerError::Request("ledger lock poisoned".into()))?;
        let assigned = state
            .blocks
            .get(block as usize)
            .ok_or(LedgerError::UnknownBlock(block))?
            .last_kv_index;

        Ok(kv_indices
            .iter()
            .map(|&idx| {
                if idx < assigned {
                    let entry = &state.entries[idx as usize];
                    KvMeta::new(idx, entry.size, &entry.commitment)
                } else {
                    KvMeta::default()
                }
            })
            .collect())
    }

    async fn last_kv_index(&self, block: u64) -> LedgerResult<u64> {
        let state = self
            .inner
            .read()
            .map_err(|_| LedgerError::Request("ledger lock poisoned".into()))?;
        state
            .blocks
            .get(block as usize)
            .map(|b| b.last_kv_index)
            .ok_or(LedgerError::UnknownBlock(block))
    }

    async fn header_by_number(&self, id: BlockId) -> LedgerResult<BlockHeader> {
        let state = self
            .inner
            .read()
            .map_err(|_| LedgerError::Request("ledger lock poisoned".into()))?;
        let number = match id {
            BlockId::Latest => state.blocks.len() as u64 - 1,
            BlockId::Finalized => state.finalized,
            BlockId::Number(n) => n,
        };
        let record = state
            .blocks
            .get(number as usize)
            .ok_or(LedgerError::UnknownBlock(number))?;
        Ok(BlockHeader {
            number,
            hash: record.hash,
        })
    }
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("head", &self.head())
            .field("finalized", &self.finalized())
            .finish()
    }
}
