//! Work splitting for the manager's worker pools.

use std::ops::Range;

/// Deal `len` items round-robin over at most `workers` partitions.
///
/// Worker `w` receives `w, w + n, w + 2n, ...` where `n` is the number of
/// partitions returned. No partition is empty.
pub fn strided(len: usize, workers: usize) -> Vec<Vec<usize>> {
    let n = workers.max(1).min(len);
    (0..n).map(|w| (w..len).step_by(n).collect()).collect()
}

/// Split `[from, to)` into `parts` contiguous, disjoint sub-ranges. The last
/// one absorbs the remainder.
pub fn split_range(from: u64, to: u64, parts: u64) -> Vec<Range<u64>> {
    if from >= to {
        return Vec::new();
    }
    let parts = parts.max(1).min(to - from);
    let size = (to - from) / parts;
    (0..parts)
        .map(|i| {
            let start = from + i * size;
            let end = if i == parts - 1 { to } else { start + size };
            start..end
        })
        .collect()
}
