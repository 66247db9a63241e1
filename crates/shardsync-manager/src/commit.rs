use shardsync_ledger::LedgerSource;
use shardsync_shard::ShardStore;
use shardsync_types::{Commitment, KvMeta, SlotMeta};
use tracing::{debug, info, warn};

use crate::error::{ManagerError, ManagerResult};
use crate::manager::{check_lengths, StorageManager};

/// Slots encoded per lock acquisition while filling empty blobs.
pub const EMPTY_FILL_CHUNK: u64 = 64;

/// Result of committing one slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The encoded blob and its metadata were written.
    Written,
    /// The slot already held this commitment; nothing was written.
    AlreadyPresent,
}

/// Progress of [`StorageManager::commit_empty_blobs`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FillProgress {
    /// Slots committed as empty, including ones already filled.
    pub inserted: u64,
    /// The next slot to try.
    pub next: u64,
}

impl<S, L> StorageManager<S, L>
where
    S: ShardStore + 'static,
    L: LedgerSource + 'static,
{
    /// Commit blobs received from peers.
    ///
    /// Blobs that fail to encode or fail validation are logged and skipped.
    /// Returns the slots that now hold their blob, in input order.
    pub fn commit_blobs<B: AsRef<[u8]>>(
        &self,
        kv_indices: &[u64],
        blobs: &[B],
        commitments: &[Commitment],
    ) -> ManagerResult<Vec<u64>> {
        check_lengths(kv_indices.len(), blobs.len(), commitments.len())?;
        self.lock().view()?;

        let mut encoded = Vec::with_capacity(kv_indices.len());
        for (i, (&kv_index, blob)) in kv_indices.iter().zip(blobs).enumerate() {
            match self
                .shards
                .try_encode(kv_index, blob.as_ref(), &commitments[i])
            {
                Ok(Some(bytes)) => encoded.push((i, bytes)),
                Ok(None) => warn!(slot = kv_index, "blob encode skipped: slot not local"),
                Err(e) => warn!(slot = kv_index, error = %e, "blob encode failed"),
            }
        }

        let state = self.lock();
        let mut inserted = Vec::with_capacity(encoded.len());
        for (i, bytes) in encoded {
            let kv_index = kv_indices[i];
            let expected = state.metas.get(kv_index);
            match commit_encoded(
                self.shards.as_ref(),
                kv_index,
                &bytes,
                &commitments[i],
                &expected,
            ) {
                Ok(_) => inserted.push(kv_index),
                Err(e) => info!(slot = kv_index, error = %e, "commit skipped"),
            }
        }
        drop(state);

        debug!(
            requested = kv_indices.len(),
            inserted = inserted.len(),
            "peer blobs committed"
        );
        Ok(inserted)
    }

    /// Commit a single blob received from a peer.
    pub fn commit_blob(
        &self,
        kv_index: u64,
        blob: &[u8],
        commitment: &Commitment,
    ) -> ManagerResult<CommitOutcome> {
        self.lock().view()?;

        let encoded = self
            .shards
            .try_encode(kv_index, blob, commitment)
            .map_err(|source| ManagerError::EncodeFailed {
                slot: kv_index,
                source,
            })?
            .ok_or(ManagerError::NotManaged { slot: kv_index })?;

        let state = self.lock();
        let expected = state.metas.get(kv_index);
        commit_encoded(
            self.shards.as_ref(),
            kv_index,
            &encoded,
            commitment,
            &expected,
        )
    }

    /// Fill slots `start..=limit` with the empty blob where the ledger
    /// expects no content.
    ///
    /// Slots whose expected commitment is not empty are passed over. Filling
    /// stops at the first slot that cannot be encoded (usually the end of the
    /// local shards) or fails to commit for any other reason; the returned
    /// `next` is where a later call should resume.
    pub fn commit_empty_blobs(&self, start: u64, limit: u64) -> ManagerResult<FillProgress> {
        self.lock().view()?;

        let empty = Commitment::zero();
        let mut progress = FillProgress {
            inserted: 0,
            next: start,
        };
        let mut cursor = start;
        while cursor <= limit {
            let chunk_end = limit.min(cursor.saturating_add(EMPTY_FILL_CHUNK - 1));

            let mut encoded = Vec::new();
            let mut exhausted = false;
            for kv_index in cursor..=chunk_end {
                match self.shards.try_encode(kv_index, &[], &empty) {
                    Ok(Some(bytes)) => encoded.push((kv_index, bytes)),
                    Ok(None) => {
                        debug!(slot = kv_index, "empty fill reached a non-local slot");
                        exhausted = true;
                        break;
                    }
                    Err(e) => {
                        warn!(slot = kv_index, error = %e, "empty blob encode failed");
                        exhausted = true;
                        break;
                    }
                }
            }

            let state = self.lock();
            for (kv_index, bytes) in &encoded {
                let expected = state.metas.get(*kv_index);
                match commit_encoded(self.shards.as_ref(), *kv_index, bytes, &empty, &expected) {
                    Ok(_) => progress.inserted += 1,
                    Err(e) if e.is_mismatch() => {}
                    Err(e) => {
                        info!(slot = *kv_index, error = %e, "empty fill stopped");
                        return Ok(progress);
                    }
                }
                progress.next += 1;
            }
            drop(state);

            match chunk_end.checked_add(1) {
                Some(next) if !exhausted => cursor = next,
                _ => break,
            }
        }
        Ok(progress)
    }
}

/// Validate one encoded blob against its expected record and write it.
///
/// The caller must hold the coordination lock.
pub(crate) fn commit_encoded<S: ShardStore + ?Sized>(
    shards: &S,
    kv_index: u64,
    encoded: &[u8],
    commitment: &Commitment,
    expected: &KvMeta,
) -> ManagerResult<CommitOutcome> {
    if !expected.matches(commitment) {
        return Err(ManagerError::CommitMismatch { slot: kv_index });
    }

    let physical = shards
        .try_read_meta(kv_index)?
        .ok_or(ManagerError::NotManaged { slot: kv_index })?;

    // A zero record for a non-zero slot means the cache has no entry.
    if expected.kv_index() != kv_index {
        return Err(ManagerError::IndexMismatch {
            slot: kv_index,
            recorded: expected.kv_index(),
        });
    }

    if physical.holds(commitment) {
        return Ok(CommitOutcome::AlreadyPresent);
    }

    if !shards.try_write_encoded(kv_index, encoded, SlotMeta::filled(commitment))? {
        return Err(ManagerError::WriteFailed { slot: kv_index });
    }
    Ok(CommitOutcome::Written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{self, blob, Fixture};
    use shardsync_types::SlotState;

    /// Bootstrap at a block carrying `blobs` and load the expected metadata.
    async fn synced(shards: &[u64], blobs: &[Vec<u8>]) -> Fixture {
        let fx = Fixture::new(shards);
        let block = fx.ledger.push_blobs(blobs);
        fx.ledger.finalize(block).unwrap();
        fx.manager.bootstrap(block).await.unwrap();
        fx.manager.download_all_metas().await.unwrap();
        fx
    }

    #[tokio::test]
    async fn commit_is_idempotent() {
        let blobs: Vec<Vec<u8>> = (0..3).map(blob).collect();
        let fx = synced(&[0], &blobs).await;
        let c = Commitment::digest(&blobs[1]);

        assert_eq!(
            fx.manager.commit_blob(1, &blobs[1], &c).unwrap(),
            CommitOutcome::Written
        );
        let meta = fx.manager.read_meta(1).unwrap();
        assert_eq!(
            fx.manager.commit_blob(1, &blobs[1], &c).unwrap(),
            CommitOutcome::AlreadyPresent
        );
        assert_eq!(fx.store.write_count(), 1);
        assert_eq!(fx.manager.read_meta(1).unwrap(), meta);
    }

    #[tokio::test]
    async fn mismatched_commitment_rejected() {
        let blobs: Vec<Vec<u8>> = (0..3).map(blob).collect();
        let fx = synced(&[0], &blobs).await;
        let wrong = Commitment::digest(b"not the ledger's blob");

        let err = fx.manager.commit_blob(2, b"not the ledger's blob", &wrong);
        assert!(matches!(err, Err(ManagerError::CommitMismatch { slot: 2 })));
        assert_eq!(fx.store.write_count(), 0);
        assert_eq!(fx.manager.slot_state(2).unwrap(), SlotState::Unsynced);
    }

    #[tokio::test]
    async fn missing_cache_entry_trips_index_guard() {
        let fx = Fixture::new(&[0]);
        fx.manager.bootstrap(0).await.unwrap();

        // No expected record: the zero record validates the empty blob, but
        // its embedded index is 0.
        let err = fx.manager.commit_blob(5, &[], &Commitment::zero()).unwrap_err();
        assert!(matches!(
            err,
            ManagerError::IndexMismatch {
                slot: 5,
                recorded: 0
            }
        ));
        assert_eq!(fx.store.write_count(), 0);
    }

    #[tokio::test]
    async fn foreign_slot_not_managed() {
        let blobs: Vec<Vec<u8>> = (0..3).map(blob).collect();
        let fx = synced(&[1], &blobs).await;
        let c = Commitment::digest(&blobs[0]);
        assert!(matches!(
            fx.manager.commit_blob(0, &blobs[0], &c),
            Err(ManagerError::NotManaged { slot: 0 })
        ));
    }

    #[tokio::test]
    async fn oversized_blob_fails_to_encode() {
        let fx = synced(&[0], &[vec![1u8; 4]]).await;
        let big = vec![1u8; 129];
        let err = fx
            .manager
            .commit_blob(0, &big, &Commitment::digest(&big))
            .unwrap_err();
        assert!(matches!(err, ManagerError::EncodeFailed { slot: 0, .. }));
    }

    #[tokio::test]
    async fn commit_blobs_returns_accepted_in_order() {
        let blobs: Vec<Vec<u8>> = (0..6).map(blob).collect();
        let fx = synced(&[0], &blobs).await;

        let slots = vec![4, 0, 2, 20, 3];
        let mut payloads: Vec<Vec<u8>> = slots
            .iter()
            .map(|&s| blobs.get(s as usize).cloned().unwrap_or_else(|| blob(s)))
            .collect();
        payloads[4] = b"tampered".to_vec();
        let commitments: Vec<Commitment> =
            payloads.iter().map(|b| Commitment::digest(b)).collect();

        // slot 0 is pre-committed so it reports as already present
        fx.manager
            .commit_blob(0, &blobs[0], &Commitment::digest(&blobs[0]))
            .unwrap();

        let inserted = fx
            .manager
            .commit_blobs(&slots, &payloads, &commitments)
            .unwrap();
        assert_eq!(inserted, vec![4, 0, 2]);
        assert_eq!(fx.store.write_count(), 3);
    }

    #[tokio::test]
    async fn commit_blobs_length_mismatch() {
        let fx = synced(&[0], &[blob(0)]).await;
        let err = fx
            .manager
            .commit_blobs(&[0, 1], &[blob(0)], &[Commitment::zero()])
            .unwrap_err();
        assert!(matches!(err, ManagerError::LengthMismatch { .. }));
    }

    #[tokio::test]
    async fn slot_states_are_classified() {
        let mut blobs: Vec<Vec<u8>> = (0..2).map(blob).collect();
        blobs.push(Vec::new());
        let fx = synced(&[0], &blobs).await;

        let c = Commitment::digest(&blobs[0]);
        fx.manager.commit_blob(0, &blobs[0], &c).unwrap();
        fx.manager.commit_blob(2, &[], &Commitment::zero()).unwrap();

        assert_eq!(fx.manager.slot_state(0).unwrap(), SlotState::Filled);
        assert_eq!(fx.manager.slot_state(1).unwrap(), SlotState::Unsynced);
        assert_eq!(fx.manager.slot_state(2).unwrap(), SlotState::EmptyFilled);

        let data = fx.manager.read_encoded(0, blobs[0].len()).unwrap();
        assert_eq!(data.len(), blobs[0].len());
        for slot in [1, 2] {
            let err = fx.manager.read_encoded(slot, 8).unwrap_err();
            assert!(err.is_not_available());
        }
    }

    #[tokio::test]
    async fn empty_fill_skips_mismatched_slot() {
        let blobs: Vec<Vec<u8>> = (0..5).map(blob).collect();
        let fx = synced(&[0], &blobs).await;

        // slot 4 expects content, 5 and 6 lie past the last assigned index
        let progress = fx.manager.commit_empty_blobs(4, 6).unwrap();
        assert_eq!(
            progress,
            FillProgress {
                inserted: 2,
                next: 7
            }
        );
        assert_eq!(fx.manager.slot_state(4).unwrap(), SlotState::Unsynced);
        assert_eq!(fx.manager.slot_state(5).unwrap(), SlotState::EmptyFilled);
        assert_eq!(fx.manager.slot_state(6).unwrap(), SlotState::EmptyFilled);
    }

    #[tokio::test]
    async fn empty_fill_passes_over_trailing_content() {
        let blobs = vec![Vec::new(), Vec::new(), blob(2)];
        let fx = synced(&[0], &blobs).await;

        let progress = fx.manager.commit_empty_blobs(0, 2).unwrap();
        assert_eq!(
            progress,
            FillProgress {
                inserted: 2,
                next: 3
            }
        );
        assert_eq!(fx.manager.slot_state(0).unwrap(), SlotState::EmptyFilled);
        assert_eq!(fx.manager.slot_state(1).unwrap(), SlotState::EmptyFilled);
        assert_eq!(fx.manager.slot_state(2).unwrap(), SlotState::Unsynced);
    }

    #[tokio::test]
    async fn empty_fill_counts_already_filled() {
        let fx = synced(&[0], &[blob(0)]).await;
        assert_eq!(fx.manager.commit_empty_blobs(1, 3).unwrap().inserted, 3);
        let again = fx.manager.commit_empty_blobs(1, 3).unwrap();
        assert_eq!(
            again,
            FillProgress {
                inserted: 3,
                next: 4
            }
        );
        assert_eq!(fx.store.write_count(), 3);
    }

    #[tokio::test]
    async fn empty_fill_stops_on_write_failure() {
        let fx = synced(&[0], &[blob(0)]).await;
        fx.store.fail_writes_to(3);
        let progress = fx.manager.commit_empty_blobs(1, 10).unwrap();
        assert_eq!(
            progress,
            FillProgress {
                inserted: 2,
                next: 3
            }
        );
    }

    #[tokio::test]
    async fn empty_fill_stops_at_shard_boundary() {
        let fx = synced(&[0], &[blob(0)]).await;
        // shard 0 covers slots 0..16
        let progress = fx.manager.commit_empty_blobs(10, 40).unwrap();
        assert_eq!(
            progress,
            FillProgress {
                inserted: 6,
                next: 16
            }
        );
    }

    #[tokio::test]
    async fn empty_fill_spans_chunks() {
        let fx = Fixture::with_params(
            &[0],
            shardsync_types::ShardParams {
                kv_entries_bits: 8,
                kv_size_bits: 5,
                chunks_per_kv_bits: 0,
            },
        );
        fx.manager.bootstrap(0).await.unwrap();
        fx.manager.download_all_metas().await.unwrap();

        let progress = fx.manager.commit_empty_blobs(0, 200).unwrap();
        assert_eq!(
            progress,
            FillProgress {
                inserted: 201,
                next: 201
            }
        );
    }

    #[tokio::test]
    async fn empty_fill_inverted_range() {
        let fx = synced(&[0], &[blob(0)]).await;
        assert_eq!(
            fx.manager.commit_empty_blobs(5, 4).unwrap(),
            FillProgress {
                inserted: 0,
                next: 5
            }
        );
    }

    #[tokio::test]
    async fn concurrent_commits_write_once() {
        let blobs: Vec<Vec<u8>> = (0..2).map(blob).collect();
        let fx = synced(&[0], &blobs).await;
        let c = Commitment::digest(&blobs[1]);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = fx.manager.clone();
            let data = blobs[1].clone();
            handles.push(tokio::task::spawn_blocking(move || {
                manager.commit_blob(1, &data, &c)
            }));
        }
        let mut written = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == CommitOutcome::Written {
                written += 1;
            }
        }
        assert_eq!(written, 1);
        assert_eq!(fx.store.write_count(), 1);
        assert!(fx.manager.read_meta(1).unwrap().unwrap().holds(&c));
        testkit::assert_readable(&fx, 1, &blobs[1]);
    }
}
