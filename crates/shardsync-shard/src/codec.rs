//! Slot encoding used by [`MemoryShardStore`](crate::MemoryShardStore).
//!
//! `Plain` pads the blob with zeros to the slot size. `Masked` additionally
//! XORs the padded slot with a BLAKE3 output stream keyed by the commitment
//! prefix, the shard owner and the slot index, so the same content stored by
//! two owners (or in two slots) never has the same bytes on disk.

use shardsync_types::{Address, EncodingType};

use crate::error::{ShardError, ShardResult};

const ENCODE_KEY_CONTEXT: &str = "shardsync 2026-01-01 slot encoding key";

/// Derive the key binding an encoded slot to its content and owner.
pub fn encode_key(commitment_prefix: &[u8], owner: &Address, kv_index: u64) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new_derive_key(ENCODE_KEY_CONTEXT);
    hasher.update(commitment_prefix);
    hasher.update(owner.as_bytes());
    hasher.update(&kv_index.to_be_bytes());
    *hasher.finalize().as_bytes()
}

/// Encode `blob` into a slot of `kv_size` bytes.
pub fn encode(
    encoding: EncodingType,
    kv_index: u64,
    blob: &[u8],
    kv_size: u64,
    key: &[u8; 32],
) -> ShardResult<Vec<u8>> {
    if blob.len() as u64 > kv_size {
        return Err(ShardError::BlobTooLarge {
            slot: kv_index,
            len: blob.len(),
            max: kv_size,
        });
    }
    let mut slot = vec![0u8; kv_size as usize];
    slot[..blob.len()].copy_from_slice(blob);
    if encoding == EncodingType::Masked {
        apply_mask(&mut slot, key);
    }
    Ok(slot)
}

/// Invert [`encode`]. The result keeps the slot's zero padding.
pub fn decode(encoding: EncodingType, encoded: &[u8], key: &[u8; 32]) -> Vec<u8> {
    let mut data = encoded.to_vec();
    if encoding == EncodingType::Masked {
        apply_mask(&mut data, key);
    }
    data
}

fn apply_mask(data: &mut [u8], key: &[u8; 32]) {
    let mut mask = vec![0u8; data.len()];
    blake3::Hasher::new_keyed(key).finalize_xof().fill(&mut mask);
    for (byte, m) in data.iter_mut().zip(mask) {
        *byte ^= m;
    }
}
