//! Events delivered by the chain follower.

use serde::{Deserialize, Serialize};

use crate::ids::{BlockHash, TxId};

/// One notification from the event source.  These are handled strictly one
/// at a time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChainEvent {
    /// A block was imported.  It may be on any fork.
    #[serde(rename_all = "camelCase")]
    NewBlock {
        block_hash: BlockHash,
        #[serde(alias = "parent")]
        parent_hash: BlockHash,
    },

    /// A transaction was submitted and should be tracked from now on.
    NewTransaction { value: TxId },

    /// A block was finalized.  Not every finalized block gets one of these,
    /// its unannounced ancestors are implicitly finalized too.
    #[serde(rename_all = "camelCase")]
    Finalized { block_hash: BlockHash },
}

impl ChainEvent {
    pub fn new_block(block_hash: impl Into<BlockHash>, parent_hash: impl Into<BlockHash>) -> Self {
        Self::NewBlock {
            block_hash: block_hash.into(),
            parent_hash: parent_hash.into(),
        }
    }

    pub fn new_transaction(txid: impl Into<TxId>) -> Self {
        Self::NewTransaction { value: txid.into() }
    }

    pub fn finalized(block_hash: impl Into<BlockHash>) -> Self {
        Self::Finalized {
            block_hash: block_hash.into(),
        }
    }

    /// Short name used in log spans.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewBlock { .. } => "newBlock",
            Self::NewTransaction { .. } => "newTransaction",
            Self::Finalized { .. } => "finalized",
        }
    }
}
