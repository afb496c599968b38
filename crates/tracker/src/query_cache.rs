//! Memoized chain query results.  Bodies live as long as their block is
//! pinned, per-transaction answers as long as the transaction is tracked.

use std::collections::{HashMap, HashSet};

use txwatch_primitives::prelude::*;

type TxAtBlock = (BlockHash, TxId);

#[derive(Debug, Default)]
pub struct QueryCache {
    bodies: HashMap<BlockHash, HashSet<TxId>>,
    validity: HashMap<TxAtBlock, bool>,
    success: HashMap<TxAtBlock, bool>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_body(&self, blkid: &BlockHash) -> Option<&HashSet<TxId>> {
        self.bodies.get(blkid)
    }

    pub fn put_body(&mut self, blkid: BlockHash, body: impl IntoIterator<Item = TxId>) {
        self.bodies.insert(blkid, body.into_iter().collect());
    }

    pub fn get_validity(&self, blkid: &BlockHash, txid: &TxId) -> Option<bool> {
        self.validity.get(&(blkid.clone(), txid.clone())).copied()
    }

    pub fn put_validity(&mut self, blkid: BlockHash, txid: TxId, valid: bool) {
        self.validity.insert((blkid, txid), valid);
    }

    pub fn get_success(&self, blkid: &BlockHash, txid: &TxId) -> Option<bool> {
        self.success.get(&(blkid.clone(), txid.clone())).copied()
    }

    pub fn put_success(&mut self, blkid: BlockHash, txid: TxId, successful: bool) {
        self.success.insert((blkid, txid), successful);
    }

    /// Drops everything we know about a transaction.
    pub fn evict_tx(&mut self, txid: &TxId) {
        self.validity.retain(|(_, t), _| t != txid);
        self.success.retain(|(_, t), _| t != txid);
    }

    /// Drops everything we know about some blocks.
    pub fn evict_blocks(&mut self, blkids: &[BlockHash]) {
        let gone: HashSet<&BlockHash> = blkids.iter().collect();
        self.bodies.retain(|b, _| !gone.contains(b));
        self.validity.retain(|(b, _), _| !gone.contains(b));
        self.success.retain(|(b, _), _| !gone.contains(b));
    }

    pub fn body_count(&self) -> usize {
        self.bodies.len()
    }

    pub fn tx_entry_count(&self) -> usize {
        self.validity.len() + self.success.len()
    }
}
