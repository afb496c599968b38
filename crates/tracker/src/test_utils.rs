//! Test implementations of the chain client and the status sink.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use txwatch_primitives::prelude::*;

use crate::client::{ChainClient, TxStatusSink};

#[derive(Debug, Default)]
struct TestChainInner {
    bodies: HashMap<BlockHash, Vec<TxId>>,

    /// (block, tx) pairs where the tx can no longer be included.
    invalid: HashSet<(BlockHash, TxId)>,

    /// (block, tx) pairs where the included tx failed execution.
    unsuccessful: HashSet<(BlockHash, TxId)>,

    /// Blocks whose body query errors.
    broken_bodies: HashSet<BlockHash>,

    /// Transactions whose validity/success queries error.
    broken_txs: HashSet<TxId>,

    /// How long validity/success queries for a transaction take to answer.
    delays: HashMap<TxId, Duration>,

    body_calls: Vec<BlockHash>,
    validity_calls: Vec<(BlockHash, TxId)>,
    success_calls: Vec<(BlockHash, TxId)>,
    unpin_batches: Vec<Vec<BlockHash>>,
}

/// A test implementation of a chain client.  Clones share state, so a test
/// can keep a handle to inspect the calls the tracker made.
///
/// Unknown blocks have empty bodies, and every transaction is valid and
/// successful unless configured otherwise.
#[derive(Clone, Debug, Default)]
pub struct TestChainClient {
    inner: Arc<Mutex<TestChainInner>>,
}

impl TestChainClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_block(&self, blkid: &str, body: &[&str]) {
        self.inner.lock().bodies.insert(
            BlockHash::from(blkid),
            body.iter().map(|t| TxId::from(*t)).collect(),
        );
    }

    pub fn set_invalid(&self, blkid: &str, txid: &str) {
        self.inner
            .lock()
            .invalid
            .insert((blkid.into(), txid.into()));
    }

    pub fn set_unsuccessful(&self, blkid: &str, txid: &str) {
        self.inner
            .lock()
            .unsuccessful
            .insert((blkid.into(), txid.into()));
    }

    pub fn fail_body(&self, blkid: &str) {
        self.inner.lock().broken_bodies.insert(blkid.into());
    }

    pub fn restore_body(&self, blkid: &str) {
        self.inner.lock().broken_bodies.remove(blkid);
    }

    /// Makes validity/success queries for the transaction answer only after
    /// `delay`.
    pub fn delay_queries_for(&self, txid: &str, delay: Duration) {
        self.inner.lock().delays.insert(txid.into(), delay);
    }

    pub fn fail_queries_for(&self, txid: &str) {
        self.inner.lock().broken_txs.insert(txid.into());
    }

    pub fn body_calls(&self) -> Vec<BlockHash> {
        self.inner.lock().body_calls.clone()
    }

    pub fn validity_calls(&self) -> Vec<(BlockHash, TxId)> {
        self.inner.lock().validity_calls.clone()
    }

    pub fn success_calls(&self) -> Vec<(BlockHash, TxId)> {
        self.inner.lock().success_calls.clone()
    }

    pub fn unpin_batches(&self) -> Vec<Vec<BlockHash>> {
        self.inner.lock().unpin_batches.clone()
    }

    /// All blocks ever unpinned, in request order.
    pub fn unpinned(&self) -> Vec<BlockHash> {
        self.inner.lock().unpin_batches.concat()
    }
}

#[async_trait]
impl ChainClient for TestChainClient {
    async fn get_body(&self, blkid: &BlockHash) -> anyhow::Result<Vec<TxId>> {
        let mut inner = self.inner.lock();
        inner.body_calls.push(blkid.clone());
        if inner.broken_bodies.contains(blkid) {
            anyhow::bail!("test: body unavailable for {blkid}");
        }
        Ok(inner.bodies.get(blkid).cloned().unwrap_or_default())
    }

    async fn is_tx_valid(&self, blkid: &BlockHash, txid: &TxId) -> anyhow::Result<bool> {
        let (res, delay) = {
            let mut inner = self.inner.lock();
            inner.validity_calls.push((blkid.clone(), txid.clone()));
            let res = if inner.broken_txs.contains(txid) {
                Err(anyhow::anyhow!("test: validity unavailable for {txid}"))
            } else {
                Ok(!inner.invalid.contains(&(blkid.clone(), txid.clone())))
            };
            (res, inner.delays.get(txid).copied())
        };

        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        res
    }

    async fn is_tx_successful(&self, blkid: &BlockHash, txid: &TxId) -> anyhow::Result<bool> {
        let (res, delay) = {
            let mut inner = self.inner.lock();
            inner.success_calls.push((blkid.clone(), txid.clone()));
            let res = if inner.broken_txs.contains(txid) {
                Err(anyhow::anyhow!("test: result unavailable for {txid}"))
            } else {
                Ok(!inner.unsuccessful.contains(&(blkid.clone(), txid.clone())))
            };
            (res, inner.delays.get(txid).copied())
        };

        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        res
    }

    async fn unpin(&self, blkids: &[BlockHash]) -> anyhow::Result<()> {
        self.inner.lock().unpin_batches.push(blkids.to_vec());
        Ok(())
    }
}

/// A notification as seen by the consumer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Notification {
    Settled(TxId, TxSettlement),
    Done(TxId, TxSettlement),
}

impl Notification {
    pub fn settled(txid: &str, settlement: TxSettlement) -> Self {
        Self::Settled(txid.into(), settlement)
    }

    pub fn done(txid: &str, settlement: TxSettlement) -> Self {
        Self::Done(txid.into(), settlement)
    }

    pub fn txid(&self) -> &TxId {
        match self {
            Self::Settled(txid, _) | Self::Done(txid, _) => txid,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, Self::Done(..))
    }
}

/// Sink that just remembers everything it was told.
#[derive(Clone, Debug, Default)]
pub struct RecordingSink {
    pub events: Vec<Notification>,
}

impl RecordingSink {
    pub fn settled_count(&self, txid: &TxId) -> usize {
        self.events
            .iter()
            .filter(|n| !n.is_done() && n.txid() == txid)
            .count()
    }

    pub fn done_count(&self, txid: &TxId) -> usize {
        self.events
            .iter()
            .filter(|n| n.is_done() && n.txid() == txid)
            .count()
    }
}

impl TxStatusSink for RecordingSink {
    fn on_tx_settled(&mut self, txid: &TxId, settlement: &TxSettlement) {
        self.events
            .push(Notification::Settled(txid.clone(), settlement.clone()));
    }

    fn on_tx_done(&mut self, txid: &TxId, settlement: &TxSettlement) {
        self.events
            .push(Notification::Done(txid.clone(), settlement.clone()));
    }
}
