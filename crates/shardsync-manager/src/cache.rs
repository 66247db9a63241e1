use std::collections::HashMap;
use std::ops::Range;

use shardsync_types::{Commitment, KvMeta};

/// Expected ledger metadata per slot: the local source of truth for write
/// validation.
///
/// Entries are replaced, never merged. A slot without an entry reads as the
/// all-zero record, which only validates an empty commit to slot 0.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetaCache {
    entries: HashMap<u64, KvMeta>,
}

impl MetaCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The expected record for `kv_index`, or the zero record.
    pub fn get(&self, kv_index: u64) -> KvMeta {
        self.entries.get(&kv_index).copied().unwrap_or_default()
    }

    pub fn lookup(&self, kv_index: u64) -> Option<&KvMeta> {
        self.entries.get(&kv_index)
    }

    pub fn insert(&mut self, kv_index: u64, meta: KvMeta) {
        self.entries.insert(kv_index, meta);
    }

    pub fn extend<I: IntoIterator<Item = (u64, KvMeta)>>(&mut self, iter: I) {
        self.entries.extend(iter);
    }

    /// Record locally written content so the ledger need not be asked again.
    pub fn record_written(&mut self, kv_index: u64, size: u32, commitment: &Commitment) {
        self.insert(kv_index, KvMeta::new(kv_index, size, commitment));
    }

    /// Mark `range` as assigned no content.
    pub fn insert_empty_range(&mut self, range: Range<u64>) {
        self.entries
            .extend(range.map(|idx| (idx, KvMeta::index_only(idx))));
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_entry_reads_as_zero_record() {
        let cache = MetaCache::new();
        assert_eq!(cache.get(42), KvMeta::default());
        assert!(cache.lookup(42).is_none());
    }

    #[test]
    fn last_write_wins() {
        let mut cache = MetaCache::new();
        let a = Commitment::digest(b"a");
        let b = Commitment::digest(b"b");
        cache.record_written(3, 1, &a);
        cache.insert(3, KvMeta::new(3, 1, &b));
        assert!(cache.get(3).matches(&b));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn empty_range_is_index_only() {
        let mut cache = MetaCache::new();
        cache.insert_empty_range(10..14);
        assert_eq!(cache.len(), 4);
        for idx in 10..14 {
            let meta = cache.get(idx);
            assert_eq!(meta.kv_index(), idx);
            assert!(meta.expects_empty());
        }
        cache.insert_empty_range(20..20);
        assert_eq!(cache.len(), 4);
    }
}
