//! Consistency layer between a shard engine and the ledger it mirrors.
//!
//! [`StorageManager`] is the single synchronization point of a storage node:
//! - owns the local [`LedgerView`] of finality and moves it only forward
//! - caches the expected metadata of every local slot in a [`MetaCache`]
//! - validates every commit against that cache before it reaches disk
//! - classifies slots so unsynchronized or empty ones are never served

pub mod cache;
pub mod commit;
pub mod config;
pub mod download;
pub mod error;
pub mod manager;
pub mod partition;
pub mod read;
pub mod view;

pub use cache::MetaCache;
pub use commit::{CommitOutcome, FillProgress, EMPTY_FILL_CHUNK};
pub use config::ManagerConfig;
pub use download::DownloadSummary;
pub use error::{ConfigError, ManagerError, ManagerResult};
pub use manager::StorageManager;
pub use view::LedgerView;
