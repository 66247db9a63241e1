use shardsync_ledger::LedgerError;
use shardsync_shard::ShardError;
use shardsync_types::SlotState;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManagerError {
    #[error("input lengths differ: {slots} slots, {blobs} blobs, {commitments} commitments")]
    LengthMismatch {
        slots: usize,
        blobs: usize,
        commitments: usize,
    },

    #[error("ledger view has not been bootstrapped")]
    NotBootstrapped,

    #[error("ledger view already bootstrapped at block {0}")]
    AlreadyBootstrapped(u64),

    #[error("block {requested} is not newer than local view block {current}")]
    StaleAdvance { current: u64, requested: u64 },

    #[error("commitment for slot {slot} does not match the ledger")]
    CommitMismatch { slot: u64 },

    #[error("expected metadata for slot {slot} records index {recorded}")]
    IndexMismatch { slot: u64, recorded: u64 },

    #[error("slot {slot} is not in a local shard")]
    NotManaged { slot: u64 },

    #[error("encoding blob for slot {slot} failed: {source}")]
    EncodeFailed {
        slot: u64,
        #[source]
        source: ShardError,
    },

    #[error("write to slot {slot} was not applied")]
    WriteFailed { slot: u64 },

    #[error("slot {slot} is syncing or empty ({state})")]
    NotAvailable { slot: u64, state: SlotState },

    #[error("worker failed: {0}")]
    WorkerFailed(String),

    #[error("shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

impl ManagerError {
    /// The ledger expects a different commitment for the slot.
    pub fn is_mismatch(&self) -> bool {
        matches!(self, Self::CommitMismatch { .. })
    }

    /// The slot holds no servable content yet.
    pub fn is_not_available(&self) -> bool {
        matches!(self, Self::NotAvailable { .. })
    }
}

pub type ManagerResult<T> = Result<T, ManagerError>;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}
