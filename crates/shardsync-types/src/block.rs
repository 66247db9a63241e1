use std::fmt;

use serde::{Deserialize, Serialize};

/// A block selector understood by the ledger client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockId {
    Latest,
    Finalized,
    Number(u64),
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Latest => write!(f, "latest"),
            Self::Finalized => write!(f, "finalized"),
            Self::Number(n) => write!(f, "#{n}"),
        }
    }
}

/// The slice of a block header the storage layer cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub hash: [u8; 32],
}
