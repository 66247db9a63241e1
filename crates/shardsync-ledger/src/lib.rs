//! Ledger client boundary for shardsync.
//!
//! The ledger is the authority on which slots exist and what each of them
//! must contain. This crate provides:
//! - the [`LedgerSource`] trait the storage manager consumes
//! - [`InMemoryLedger`], a scriptable ledger for tests, demos and embedding

pub mod error;
pub mod memory;
pub mod traits;

pub use error::{LedgerError, LedgerResult};
pub use memory::{blob_commitment, InMemoryLedger};
pub use traits::LedgerSource;
