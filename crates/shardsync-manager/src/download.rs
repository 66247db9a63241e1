use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use shardsync_ledger::{LedgerError, LedgerSource};
use shardsync_shard::{ShardError, ShardStore};
use shardsync_types::{BlockHeader, BlockId, KvMeta};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::{ManagerError, ManagerResult};
use crate::manager::{lock_state, ManagerState, StorageManager};
use crate::partition;

/// What [`StorageManager::download_all_metas`] loaded into the cache.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Finalized header the download was sized against.
    pub finalized: BlockHeader,
    /// Last assigned slot index as of `finalized`.
    pub last_kv_index: u64,
    /// Records fetched from the ledger.
    pub downloaded: u64,
    /// Index-only records filled in for unassigned slots.
    pub synthesized: u64,
}

impl<S, L> StorageManager<S, L>
where
    S: ShardStore + 'static,
    L: LedgerSource + 'static,
{
    /// Load expected metadata for every local shard.
    ///
    /// Slots up to the finalized last index are fetched from the ledger
    /// against the local view's block; the rest of each shard is marked as
    /// expecting no content.
    pub async fn download_all_metas(&self) -> ManagerResult<DownloadSummary> {
        self.lock().view()?;

        let finalized = self.ledger.header_by_number(BlockId::Finalized).await?;
        let last_kv_index = self.ledger.last_kv_index(finalized.number).await?;
        let params = self.shards.params();

        let mut summary = DownloadSummary {
            finalized,
            last_kv_index,
            downloaded: 0,
            synthesized: 0,
        };
        for shard in self.shards.shard_ids() {
            let Range { start, end: limit } =
                params.slot_range(shard).map_err(ShardError::from)?;
            let end = last_kv_index.clamp(start, limit);
            info!(shard, first = start, end, limit, last_kv_index, "downloading metas");

            summary.downloaded += self.download_range(start, end).await?;

            self.lock().metas.insert_empty_range(end..limit);
            summary.synthesized += limit - end;
            debug!(shard, first = end, limit, "empty metas filled");
        }

        info!(
            block = finalized.number,
            downloaded = summary.downloaded,
            synthesized = summary.synthesized,
            "all metas downloaded"
        );
        Ok(summary)
    }

    /// Fetch and install expected metadata for `from..to`.
    async fn download_range(&self, from: u64, to: u64) -> ManagerResult<u64> {
        if from >= to {
            return Ok(0);
        }
        let workers = self.config.meta_download_workers as u64;
        let batch_size = self.config.meta_batch_size;

        if to - from < workers.saturating_mul(batch_size) {
            let abort = AtomicBool::new(false);
            return download_batches(
                self.ledger.as_ref(),
                &self.state,
                from..to,
                batch_size,
                0,
                &abort,
            )
            .await;
        }

        let ranges = partition::split_range(from, to, workers);
        let dispatched = ranges.len();
        let (tx, mut rx) = mpsc::channel(dispatched);
        let abort = Arc::new(AtomicBool::new(false));
        for (task, range) in ranges.into_iter().enumerate() {
            let tx = tx.clone();
            let ledger = Arc::clone(&self.ledger);
            let state = Arc::clone(&self.state);
            let abort = Arc::clone(&abort);
            tokio::spawn(async move {
                let result =
                    download_batches(ledger.as_ref(), &state, range, batch_size, task, &abort)
                        .await;
                if result.is_err() {
                    abort.store(true, Ordering::SeqCst);
                }
                let _ = tx.send((task, result)).await;
            });
        }
        drop(tx);

        let mut installed = 0;
        let mut first_error = None;
        for _ in 0..dispatched {
            match rx.recv().await {
                Some((_, Ok(count))) => installed += count,
                Some((task, Err(e))) => {
                    warn!(task, error = %e, "meta download worker failed");
                    first_error.get_or_insert(e);
                }
                None => {
                    first_error.get_or_insert(ManagerError::WorkerFailed(
                        "download worker exited without reporting".into(),
                    ));
                    break;
                }
            }
        }
        first_error.map_or(Ok(installed), Err)
    }
}

async fn download_batches<L: LedgerSource + ?Sized>(
    ledger: &L,
    state: &Mutex<ManagerState>,
    range: Range<u64>,
    batch_size: u64,
    task: usize,
    abort: &AtomicBool,
) -> ManagerResult<u64> {
    let mut from = range.start;
    let mut installed = 0;
    while from < range.end {
        if abort.load(Ordering::SeqCst) {
            break;
        }
        let batch_end = range.end.min(from.saturating_add(batch_size));
        let kv_indices: Vec<u64> = (from..batch_end).collect();

        let block = lock_state(state).view()?.block;
        let metas = fetch_metas(ledger, &kv_indices, block).await?;

        {
            let mut guard = lock_state(state);
            if guard.view()?.block != block {
                debug!(task, from, block, "ledger view moved, refetching batch");
                continue;
            }
            guard.metas.extend(kv_indices.iter().copied().zip(metas));
        }

        debug!(task, from, to = batch_end, "meta batch installed");
        installed += batch_end - from;
        from = batch_end;
    }
    Ok(installed)
}

/// Request one batch, retrying a failed request once.
async fn fetch_metas<L: LedgerSource + ?Sized>(
    ledger: &L,
    kv_indices: &[u64],
    block: u64,
) -> ManagerResult<Vec<KvMeta>> {
    let metas = match ledger.kv_metas(kv_indices, block).await {
        Ok(metas) => metas,
        Err(e) => {
            warn!(
                block,
                from = kv_indices.first().copied().unwrap_or_default(),
                count = kv_indices.len(),
                error = %e,
                "meta request failed, retrying"
            );
            ledger.kv_metas(kv_indices, block).await?
        }
    };
    if metas.len() != kv_indices.len() {
        return Err(LedgerError::ShortResponse {
            requested: kv_indices.len(),
            returned: metas.len(),
        }
        .into());
    }
    Ok(metas)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ManagerConfig;
    use crate::testkit::{self, blob, Fixture};
    use async_trait::async_trait;
    use shardsync_ledger::{InMemoryLedger, LedgerResult};
    use shardsync_shard::MemoryShardStore;
    use shardsync_types::{Commitment, EncodingType, ShardParams};
    use tokio::sync::Notify;

    #[tokio::test]
    async fn downloads_assigned_and_synthesizes_rest() {
        let fx = Fixture::new(&[0, 1]);
        let blobs: Vec<Vec<u8>> = (0..20).map(blob).collect();
        let block = fx.ledger.push_blobs(&blobs);
        fx.ledger.finalize(block).unwrap();
        fx.manager.bootstrap(block).await.unwrap();

        let summary = fx.manager.download_all_metas().await.unwrap();
        assert_eq!(summary.finalized.number, block);
        assert_eq!(summary.last_kv_index, 20);
        assert_eq!(summary.downloaded, 20);
        assert_eq!(summary.synthesized, 12);

        let cache = fx.manager.snapshot_metas();
        assert_eq!(cache.len(), 32);
        for slot in 0..20 {
            let meta = cache.get(slot);
            assert_eq!(meta.kv_index(), slot);
            assert!(meta.matches(&Commitment::digest(&blobs[slot as usize])));
        }
        for slot in 20..32 {
            assert_eq!(cache.get(slot), KvMeta::index_only(slot));
        }
    }

    #[tokio::test]
    async fn shard_past_last_index_is_synthesized() {
        let fx = Fixture::new(&[3]);
        fx.ledger.push_blobs(&[blob(0)]);
        fx.ledger.finalize(1).unwrap();
        fx.manager.bootstrap(1).await.unwrap();

        let summary = fx.manager.download_all_metas().await.unwrap();
        assert_eq!(summary.downloaded, 0);
        assert_eq!(summary.synthesized, 16);
        assert_eq!(fx.ledger.meta_requests(), 0);
        assert_eq!(fx.manager.cached_meta(48), Some(KvMeta::index_only(48)));
    }

    #[tokio::test]
    async fn parallel_download_is_deterministic() {
        const ASSIGNED: u64 = 100_000;
        let params = ShardParams {
            kv_entries_bits: 17,
            kv_size_bits: 5,
            chunks_per_kv_bits: 0,
        };
        let ledger = Arc::new(InMemoryLedger::new());
        let records: Vec<(Commitment, u32)> = (0..ASSIGNED)
            .map(|i| (Commitment::digest(&i.to_le_bytes()), (i % 4096) as u32))
            .collect();
        let block = ledger.push_block(&records);
        ledger.finalize(block).unwrap();

        let mut snapshots = Vec::new();
        for workers in [1usize, 8, 32] {
            let store = Arc::new(
                MemoryShardStore::new(params, testkit::CONTRACT)
                    .unwrap()
                    .with_shard(0, testkit::OWNER, EncodingType::Plain)
                    .unwrap(),
            );
            let config = ManagerConfig {
                meta_download_workers: workers,
                meta_batch_size: 1000,
                ..ManagerConfig::default()
            };
            let manager = StorageManager::new(store, Arc::clone(&ledger), config).unwrap();
            manager.bootstrap(block).await.unwrap();
            let summary = manager.download_all_metas().await.unwrap();
            assert_eq!(summary.downloaded, ASSIGNED);
            assert_eq!(summary.synthesized, (1 << 17) - ASSIGNED);
            snapshots.push(manager.snapshot_metas());
        }

        assert_eq!(snapshots[0], snapshots[1]);
        assert_eq!(snapshots[1], snapshots[2]);
        let cache = &snapshots[0];
        assert_eq!(cache.len(), 1 << 17);
        for slot in [0, 999, 1000, 3124, 99_999] {
            let (commitment, size) = records[slot as usize];
            assert_eq!(cache.get(slot), KvMeta::new(slot, size, &commitment));
        }
    }

    #[tokio::test]
    async fn failed_batch_is_retried_once() {
        let fx = Fixture::new(&[0]);
        fx.ledger.push_blobs(&[blob(0), blob(1), blob(2)]);
        fx.ledger.finalize(1).unwrap();
        fx.manager.bootstrap(1).await.unwrap();

        fx.ledger.fail_next_requests(1);
        let summary = fx.manager.download_all_metas().await.unwrap();
        assert_eq!(summary.downloaded, 3);
        assert_eq!(fx.ledger.meta_requests(), 2);
    }

    #[tokio::test]
    async fn second_failure_aborts_download() {
        let fx = Fixture::new(&[0]);
        fx.ledger.push_blobs(&[blob(0), blob(1), blob(2)]);
        fx.ledger.finalize(1).unwrap();
        fx.manager.bootstrap(1).await.unwrap();

        fx.ledger.fail_next_requests(2);
        let err = fx.manager.download_all_metas().await.unwrap_err();
        assert!(matches!(err, ManagerError::Ledger(LedgerError::Request(_))));
        assert_eq!(fx.ledger.meta_requests(), 2);
        assert!(fx.manager.snapshot_metas().is_empty());
    }

    #[tokio::test]
    async fn parallel_failure_surfaces_error() {
        let fx = Fixture::new(&[0]);
        let blobs: Vec<Vec<u8>> = (0..16).map(blob).collect();
        let block = fx.ledger.push_blobs(&blobs);
        fx.ledger.finalize(block).unwrap();
        fx.manager.bootstrap(block).await.unwrap();

        // 16 slots over 4 workers with batches of 4 takes the parallel path
        fx.ledger.fail_next_requests(8);
        let err = fx.manager.download_all_metas().await.unwrap_err();
        assert!(matches!(err, ManagerError::Ledger(_)));
    }

    /// Holds the first metadata request until released.
    struct GatedLedger {
        inner: Arc<InMemoryLedger>,
        gated: AtomicBool,
        entered: Notify,
        release: Notify,
        requested_blocks: Mutex<Vec<u64>>,
    }

    #[async_trait]
    impl LedgerSource for GatedLedger {
        async fn kv_metas(&self, kv_indices: &[u64], block: u64) -> LedgerResult<Vec<KvMeta>> {
            self.requested_blocks.lock().unwrap().push(block);
            if self.gated.swap(false, Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.kv_metas(kv_indices, block).await
        }

        async fn last_kv_index(&self, block: u64) -> LedgerResult<u64> {
            self.inner.last_kv_index(block).await
        }

        async fn header_by_number(&self, id: BlockId) -> LedgerResult<BlockHeader> {
            self.inner.header_by_number(id).await
        }
    }

    #[tokio::test]
    async fn stale_batch_is_refetched() {
        let inner = Arc::new(InMemoryLedger::new());
        let early = vec![blob(0), blob(1)];
        inner.push_blobs(&early);
        let late = inner.push_blobs(&[blob(2)]);
        inner.finalize(late).unwrap();

        let ledger = Arc::new(GatedLedger {
            inner: Arc::clone(&inner),
            gated: AtomicBool::new(true),
            entered: Notify::new(),
            release: Notify::new(),
            requested_blocks: Mutex::new(Vec::new()),
        });
        let store = Arc::new(testkit::store(&[0]));
        let manager =
            StorageManager::new(store, Arc::clone(&ledger), testkit::config()).unwrap();
        manager.bootstrap(1).await.unwrap();

        let downloader = manager.clone();
        let handle = tokio::spawn(async move { downloader.download_all_metas().await });

        ledger.entered.notified().await;
        manager.advance_to(late, vec![], vec![], vec![]).await.unwrap();
        ledger.release.notify_one();

        let summary = handle.await.unwrap().unwrap();
        assert_eq!(summary.downloaded, 3);
        assert_eq!(*ledger.requested_blocks.lock().unwrap(), vec![1, late]);
        // slot 2 is only assigned as of the later block
        assert!(manager
            .cached_meta(2)
            .unwrap()
            .matches(&Commitment::digest(&blob(2))));
    }
}
