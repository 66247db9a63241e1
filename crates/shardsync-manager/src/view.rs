use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, ManagerResult};

/// The node's local belief of ledger finality.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerView {
    /// Most recent finalized block the node has adopted.
    pub block: u64,
    /// Exclusive upper bound of slot indices assigned as of `block`.
    pub last_kv_index: u64,
}

impl LedgerView {
    /// Move to `next`. The block must be strictly newer.
    pub fn advance(&mut self, next: LedgerView) -> ManagerResult<()> {
        if next.block <= self.block {
            return Err(ManagerError::StaleAdvance {
                current: self.block,
                requested: next.block,
            });
        }
        *self = next;
        Ok(())
    }
}
