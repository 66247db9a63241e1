/// Errors produced by ledger requests.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    #[error("block {0} not found")]
    UnknownBlock(u64),

    #[error("ledger request failed: {0}")]
    Request(String),

    #[error("short response: requested {requested} metas, got {returned}")]
    ShortResponse { requested: usize, returned: usize },
}

pub type LedgerResult<T> = Result<T, LedgerError>;
