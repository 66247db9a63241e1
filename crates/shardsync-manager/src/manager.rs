use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use shardsync_ledger::LedgerSource;
use shardsync_shard::{ShardError, ShardStore};
use shardsync_types::{Address, Commitment, EncodingType, KvMeta, SlotMeta};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::cache::MetaCache;
use crate::config::ManagerConfig;
use crate::error::{ManagerError, ManagerResult};
use crate::partition;
use crate::view::LedgerView;

/// Coordinates a shard engine with the ledger it mirrors.
///
/// The manager owns the node's [`LedgerView`] and the [`MetaCache`] of
/// expected slot metadata, both behind one mutex. That mutex also serializes
/// every physical access the manager performs on behalf of commits and
/// reads, so two commits to the same slot never interleave and no write
/// races a change of the view.
///
/// [`bootstrap`](Self::bootstrap) must be called once before any other
/// operation; until then they fail with [`ManagerError::NotBootstrapped`].
///
/// Cloning is cheap and yields a handle to the same state.
pub struct StorageManager<S, L> {
    pub(crate) shards: Arc<S>,
    pub(crate) ledger: Arc<L>,
    pub(crate) state: Arc<Mutex<ManagerState>>,
    pub(crate) config: ManagerConfig,
}

#[derive(Default)]
pub(crate) struct ManagerState {
    pub(crate) view: Option<LedgerView>,
    pub(crate) metas: MetaCache,
}

impl ManagerState {
    pub(crate) fn view(&self) -> ManagerResult<LedgerView> {
        self.view.ok_or(ManagerError::NotBootstrapped)
    }
}

/// Finalized blobs handed to the write workers of `advance_to`.
struct FinalizedBatch {
    kv_indices: Vec<u64>,
    blobs: Vec<Vec<u8>>,
    commitments: Vec<Commitment>,
}

impl<S, L> Clone for StorageManager<S, L> {
    fn clone(&self) -> Self {
        Self {
            shards: Arc::clone(&self.shards),
            ledger: Arc::clone(&self.ledger),
            state: Arc::clone(&self.state),
            config: self.config.clone(),
        }
    }
}

impl<S, L> StorageManager<S, L>
where
    S: ShardStore + 'static,
    L: LedgerSource + 'static,
{
    pub fn new(shards: Arc<S>, ledger: Arc<L>, config: ManagerConfig) -> ManagerResult<Self> {
        config.validate()?;
        Ok(Self {
            shards,
            ledger,
            state: Arc::new(Mutex::new(ManagerState::default())),
            config,
        })
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, ManagerState> {
        lock_state(&self.state)
    }

    /// Establish the local ledger view at `block`.
    pub async fn bootstrap(&self, block: u64) -> ManagerResult<LedgerView> {
        let existing = self.lock().view;
        if let Some(view) = existing {
            return Err(ManagerError::AlreadyBootstrapped(view.block));
        }

        let last_kv_index = self.ledger.last_kv_index(block).await?;

        let mut state = self.lock();
        if let Some(view) = state.view {
            return Err(ManagerError::AlreadyBootstrapped(view.block));
        }
        let view = LedgerView {
            block,
            last_kv_index,
        };
        state.view = Some(view);
        info!(block, last_kv_index, "ledger view bootstrapped");
        Ok(view)
    }

    /// Commit the blobs finalized by `block` and adopt it as the local view.
    ///
    /// Writes are spread over `advance_workers` blocking workers. If any
    /// write fails the first error is returned and the view is left as it
    /// was; writes that already landed are harmless because committing the
    /// same content again is a no-op.
    pub async fn advance_to(
        &self,
        block: u64,
        kv_indices: Vec<u64>,
        blobs: Vec<Vec<u8>>,
        commitments: Vec<Commitment>,
    ) -> ManagerResult<()> {
        check_lengths(kv_indices.len(), blobs.len(), commitments.len())?;
        let max = self.shards.params().kv_size();
        if let Some((&slot, blob)) = kv_indices
            .iter()
            .zip(&blobs)
            .find(|(_, blob)| blob.len() as u64 > max)
        {
            return Err(ShardError::BlobTooLarge {
                slot,
                len: blob.len(),
                max,
            }
            .into());
        }
        let current = self.lock().view()?;
        if block <= current.block {
            return Err(ManagerError::StaleAdvance {
                current: current.block,
                requested: block,
            });
        }

        let last_kv_index = self.ledger.last_kv_index(block).await?;
        let staged = LedgerView {
            block,
            last_kv_index,
        };

        let batch = Arc::new(FinalizedBatch {
            kv_indices,
            blobs,
            commitments,
        });
        self.write_finalized(Arc::clone(&batch)).await?;

        {
            let mut state = self.lock();
            let view = state.view.as_mut().ok_or(ManagerError::NotBootstrapped)?;
            view.advance(staged)?;
        }
        info!(
            block,
            last_kv_index,
            blobs = batch.kv_indices.len(),
            "ledger view advanced"
        );

        let mut state = self.lock();
        for ((&kv_index, blob), commitment) in batch
            .kv_indices
            .iter()
            .zip(&batch.blobs)
            .zip(&batch.commitments)
        {
            state
                .metas
                .record_written(kv_index, blob.len() as u32, commitment);
        }
        Ok(())
    }

    async fn write_finalized(&self, batch: Arc<FinalizedBatch>) -> ManagerResult<()> {
        let partitions = partition::strided(batch.kv_indices.len(), self.config.advance_workers);
        let dispatched = partitions.len();
        if dispatched == 0 {
            return Ok(());
        }

        let (tx, mut rx) = mpsc::channel(dispatched);
        let abort = Arc::new(AtomicBool::new(false));
        for (worker, items) in partitions.into_iter().enumerate() {
            let tx = tx.clone();
            let batch = Arc::clone(&batch);
            let shards = Arc::clone(&self.shards);
            let state = Arc::clone(&self.state);
            let abort = Arc::clone(&abort);
            tokio::task::spawn_blocking(move || {
                let result = write_partition(shards.as_ref(), &state, &batch, &items, &abort);
                if result.is_err() {
                    abort.store(true, Ordering::SeqCst);
                }
                let _ = tx.blocking_send((worker, result));
            });
        }
        drop(tx);

        let mut first_error = None;
        for _ in 0..dispatched {
            match rx.recv().await {
                Some((_, Ok(written))) => {
                    debug!(written, "finalized write worker done");
                }
                Some((worker, Err(e))) => {
                    warn!(worker, error = %e, "finalized write worker failed");
                    first_error.get_or_insert(e);
                }
                None => {
                    first_error.get_or_insert(ManagerError::WorkerFailed(
                        "write worker exited without reporting".into(),
                    ));
                    break;
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Current local ledger view, if bootstrapped.
    pub fn view(&self) -> Option<LedgerView> {
        self.lock().view
    }

    pub fn last_kv_index(&self) -> Option<u64> {
        self.lock().view.map(|v| v.last_kv_index)
    }

    /// Expected metadata cached for `kv_index`.
    pub fn cached_meta(&self, kv_index: u64) -> Option<KvMeta> {
        self.lock().metas.lookup(kv_index).copied()
    }

    /// A copy of the whole expected-metadata cache.
    pub fn snapshot_metas(&self) -> MetaCache {
        self.lock().metas.clone()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Locally stored shards, ascending.
    pub fn shards(&self) -> Vec<u64> {
        self.shards.shard_ids()
    }

    pub fn kv_entries(&self) -> u64 {
        self.shards.params().kv_entries()
    }

    pub fn kv_entries_bits(&self) -> u32 {
        self.shards.params().kv_entries_bits
    }

    pub fn max_kv_size(&self) -> u64 {
        self.shards.params().kv_size()
    }

    pub fn max_kv_size_bits(&self) -> u32 {
        self.shards.params().kv_size_bits
    }

    pub fn chunks_per_kv_bits(&self) -> u32 {
        self.shards.params().chunks_per_kv_bits
    }

    pub fn shard_owner(&self, shard: u64) -> Option<Address> {
        self.shards.shard_owner(shard)
    }

    pub fn shard_encoding(&self, shard: u64) -> Option<EncodingType> {
        self.shards.shard_encoding(shard)
    }

    pub fn contract_address(&self) -> Address {
        self.shards.contract_address()
    }

    pub fn close(&self) -> ManagerResult<()> {
        let _state = self.lock();
        Ok(self.shards.close()?)
    }
}

/// Poisoning is recovered: every critical section leaves the state whole.
pub(crate) fn lock_state(state: &Mutex<ManagerState>) -> MutexGuard<'_, ManagerState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn check_lengths(slots: usize, blobs: usize, commitments: usize) -> ManagerResult<()> {
    if slots != blobs || blobs != commitments {
        return Err(ManagerError::LengthMismatch {
            slots,
            blobs,
            commitments,
        });
    }
    Ok(())
}

fn write_partition<S: ShardStore + ?Sized>(
    shards: &S,
    state: &Mutex<ManagerState>,
    batch: &FinalizedBatch,
    items: &[usize],
    abort: &AtomicBool,
) -> ManagerResult<usize> {
    let mut written = 0;
    for &i in items {
        if abort.load(Ordering::SeqCst) {
            break;
        }
        let meta = SlotMeta::filled(&batch.commitments[i]);
        let _state = lock_state(state);
        // Ok(false): the slot belongs to a shard this node does not store.
        if shards.try_write(batch.kv_indices[i], &batch.blobs[i], meta)? {
            written += 1;
        }
    }
    Ok(written)
}
