use shardsync_ledger::LedgerSource;
use shardsync_shard::ShardStore;
use shardsync_types::{Address, Commitment, EncodingType, SlotMeta, SlotState};

use crate::error::{ManagerError, ManagerResult};
use crate::manager::StorageManager;

impl<S, L> StorageManager<S, L>
where
    S: ShardStore + 'static,
    L: LedgerSource + 'static,
{
    /// Read the first `len` encoded bytes of a slot that holds real content.
    ///
    /// Slots that are not synchronized yet or hold the empty blob fail with
    /// [`ManagerError::NotAvailable`] so they are never served to peers.
    pub fn read_encoded(&self, kv_index: u64, len: usize) -> ManagerResult<Vec<u8>> {
        let state = self.lock();
        state.view()?;

        let meta = self
            .shards
            .try_read_meta(kv_index)?
            .ok_or(ManagerError::NotManaged { slot: kv_index })?;
        let slot_state = meta.state();
        if !slot_state.is_readable() {
            return Err(ManagerError::NotAvailable {
                slot: kv_index,
                state: slot_state,
            });
        }

        self.shards
            .try_read_encoded(kv_index, len)?
            .ok_or(ManagerError::NotManaged { slot: kv_index })
    }

    /// Read and decode a slot with a caller-supplied commitment.
    ///
    /// No state check is made. `None` means the slot is not local.
    pub fn read(
        &self,
        kv_index: u64,
        len: usize,
        commitment: &Commitment,
    ) -> ManagerResult<Option<Vec<u8>>> {
        let state = self.lock();
        state.view()?;
        Ok(self.shards.try_read(kv_index, len, commitment)?)
    }

    /// Raw physical metadata of a slot, `None` if the slot is not local.
    pub fn read_meta(&self, kv_index: u64) -> ManagerResult<Option<SlotMeta>> {
        let state = self.lock();
        state.view()?;
        Ok(self.shards.try_read_meta(kv_index)?)
    }

    pub fn slot_state(&self, kv_index: u64) -> ManagerResult<SlotState> {
        self.read_meta(kv_index)?
            .map(|meta| meta.state())
            .ok_or(ManagerError::NotManaged { slot: kv_index })
    }

    /// Decode bytes encoded for `owner` with `encoding`.
    pub fn decode_kv(
        &self,
        kv_index: u64,
        encoded: &[u8],
        commitment: &Commitment,
        owner: &Address,
        encoding: EncodingType,
    ) -> ManagerResult<Vec<u8>> {
        Ok(self
            .shards
            .decode_kv(kv_index, encoded, commitment, owner, encoding)?)
    }

    /// Read one 32-byte sample of a local shard without taking the lock.
    ///
    /// The sample may race with a concurrent commit to the same slot.
    pub fn read_sample_unlocked(&self, shard: u64, sample_index: u64) -> ManagerResult<[u8; 32]> {
        Ok(self.shards.read_sample(shard, sample_index)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testkit::{self, blob, Fixture};
    use shardsync_shard::ShardError;

    #[tokio::test]
    async fn read_round_trips_through_encoding() {
        let fx = Fixture::new(&[0]);
        fx.manager.bootstrap(0).await.unwrap();
        let blobs = vec![blob(7)];
        let block = fx.ledger.push_blobs(&blobs);
        let (slots, blobs, commitments) = testkit::finalized(0, &blobs);
        fx.manager
            .advance_to(block, slots, blobs.clone(), commitments.clone())
            .await
            .unwrap();

        let encoded = fx.manager.read_encoded(0, 128).unwrap();
        assert_ne!(&encoded[..blobs[0].len()], blobs[0].as_slice());

        let decoded = fx
            .manager
            .decode_kv(
                0,
                &encoded,
                &commitments[0],
                &testkit::OWNER,
                EncodingType::Masked,
            )
            .unwrap();
        assert_eq!(&decoded[..blobs[0].len()], blobs[0].as_slice());
        testkit::assert_readable(&fx, 0, &blobs[0]);
    }

    #[tokio::test]
    async fn wrong_owner_does_not_decode() {
        let fx = Fixture::new(&[0]);
        fx.manager.bootstrap(0).await.unwrap();
        let blobs = vec![blob(3)];
        let block = fx.ledger.push_blobs(&blobs);
        let (slots, blobs, commitments) = testkit::finalized(0, &blobs);
        fx.manager
            .advance_to(block, slots, blobs.clone(), commitments.clone())
            .await
            .unwrap();

        let encoded = fx.manager.read_encoded(0, 128).unwrap();
        let decoded = fx
            .manager
            .decode_kv(
                0,
                &encoded,
                &commitments[0],
                &Address::from_bytes([0xee; 20]),
                EncodingType::Masked,
            )
            .unwrap();
        assert_ne!(&decoded[..blobs[0].len()], blobs[0].as_slice());
    }

    #[tokio::test]
    async fn unsynced_slot_not_available() {
        let fx = Fixture::new(&[0]);
        fx.manager.bootstrap(0).await.unwrap();
        let err = fx.manager.read_encoded(3, 16).unwrap_err();
        assert!(matches!(
            err,
            ManagerError::NotAvailable {
                slot: 3,
                state: SlotState::Unsynced
            }
        ));
        // the unchecked read still goes through
        assert_eq!(
            fx.manager.read(3, 4, &Commitment::zero()).unwrap().map(|d| d.len()),
            Some(4)
        );
    }

    #[tokio::test]
    async fn foreign_slot_reads() {
        let fx = Fixture::new(&[0]);
        fx.manager.bootstrap(0).await.unwrap();
        assert!(matches!(
            fx.manager.read_encoded(40, 16),
            Err(ManagerError::NotManaged { slot: 40 })
        ));
        assert!(fx.manager.read(40, 4, &Commitment::zero()).unwrap().is_none());
        assert!(fx.manager.read_meta(40).unwrap().is_none());
        assert!(matches!(
            fx.manager.slot_state(40),
            Err(ManagerError::NotManaged { slot: 40 })
        ));
    }

    #[tokio::test]
    async fn sample_read_skips_bootstrap() {
        let fx = Fixture::new(&[1]);
        assert_eq!(fx.manager.read_sample_unlocked(1, 0).unwrap(), [0u8; 32]);
        assert!(matches!(
            fx.manager.read_sample_unlocked(0, 0),
            Err(ManagerError::Shard(ShardError::ShardNotFound(0)))
        ));
    }

    #[tokio::test]
    async fn sample_read_of_huge_shard_id_is_not_found() {
        let fx = Fixture::new(&[0]);
        fx.manager.bootstrap(0).await.unwrap();
        let blobs = vec![vec![0x5a; 128]];
        let block = fx.ledger.push_blobs(&blobs);
        let (slots, blobs, commitments) = testkit::finalized(0, &blobs);
        fx.manager
            .advance_to(block, slots, blobs, commitments)
            .await
            .unwrap();
        assert_ne!(fx.manager.read_sample_unlocked(0, 0).unwrap(), [0u8; 32]);

        // 2^60 shards of 16 slots wrap around to slot 0
        for shard in [u64::MAX, 1 << 60] {
            assert!(matches!(
                fx.manager.read_sample_unlocked(shard, 0),
                Err(ManagerError::Shard(ShardError::ShardNotFound(s))) if s == shard
            ));
        }
    }
}
