//! Records describing where and how a transaction settled.

use serde::{Deserialize, Serialize};

use crate::ids::BlockHash;

/// Outcome of a transaction at the block it settled in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SettlementOutcome {
    /// Included in the block.  `successful` says whether execution succeeded.
    Valid { successful: bool },

    /// Not included, and no longer includable on this branch.
    Invalid,
}

impl SettlementOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid { .. })
    }

    /// Execution result, only known for included transactions.
    pub fn successful(&self) -> Option<bool> {
        match self {
            Self::Valid { successful } => Some(*successful),
            Self::Invalid => None,
        }
    }
}

/// What the consumer is told on both the settled and the done milestone.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxSettlement {
    block_hash: BlockHash,

    #[serde(flatten)]
    outcome: SettlementOutcome,
}

impl TxSettlement {
    pub fn new(block_hash: BlockHash, outcome: SettlementOutcome) -> Self {
        Self {
            block_hash,
            outcome,
        }
    }

    pub fn valid(block_hash: BlockHash, successful: bool) -> Self {
        Self::new(block_hash, SettlementOutcome::Valid { successful })
    }

    pub fn invalid(block_hash: BlockHash) -> Self {
        Self::new(block_hash, SettlementOutcome::Invalid)
    }

    pub fn block_hash(&self) -> &BlockHash {
        &self.block_hash
    }

    pub fn outcome(&self) -> SettlementOutcome {
        self.outcome
    }
}
