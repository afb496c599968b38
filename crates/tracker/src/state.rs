use std::collections::HashSet;

use txwatch_primitives::prelude::*;

use crate::{block_tree::BlockTree, ledger::TxLedger, query_cache::QueryCache};

/// Everything the engines read and mutate while handling an event.
#[derive(Debug, Default)]
pub struct TrackerState {
    pub(crate) tree: BlockTree,
    pub(crate) ledger: TxLedger,
    pub(crate) cache: QueryCache,

    /// Blocks in the tree whose settlement pass hasn't gone through yet.
    pub(crate) unsettled: HashSet<BlockHash>,
}

impl TrackerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tree(&self) -> &BlockTree {
        &self.tree
    }

    pub fn ledger(&self) -> &TxLedger {
        &self.ledger
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Returns `true` if the block still needs its settlement pass, because
    /// an earlier attempt failed.
    pub fn is_unsettled(&self, blkid: &BlockHash) -> bool {
        self.unsettled.contains(blkid)
    }
}
