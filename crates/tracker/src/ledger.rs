//! Ordered registry of the transactions we're tracking.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
};

use tracing::*;
use txwatch_primitives::prelude::*;

use crate::errors::{TrackerError, TrackerResult};

/// Lifecycle milestone of a tracked transaction.  Only ever moves forward.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum TxState {
    /// Not seen in any block yet.
    Pending,

    /// Included in, or invalidated at, one or more unfinalized blocks.
    Settled,

    /// One of its settlement blocks was finalized.
    Done,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Settled => "settled",
            Self::Done => "done",
        };
        f.write_str(s)
    }
}

/// A transaction we're waiting on.
#[derive(Clone, Debug)]
pub struct TrackedTx {
    txid: TxId,
    arrival_seq: u64,
    state: TxState,

    /// One entry per fork the transaction settled on, oldest first.
    settlements: Vec<TxSettlement>,
}

impl TrackedTx {
    pub fn txid(&self) -> &TxId {
        &self.txid
    }

    pub fn arrival_seq(&self) -> u64 {
        self.arrival_seq
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn settlements(&self) -> &[TxSettlement] {
        &self.settlements
    }

    pub fn settlement_in(&self, blkid: &BlockHash) -> Option<&TxSettlement> {
        self.settlements.iter().find(|s| s.block_hash() == blkid)
    }
}

#[derive(Debug, Default)]
pub struct TxLedger {
    next_seq: u64,

    /// Active transactions by arrival sequence.
    entries: BTreeMap<u64, TrackedTx>,

    /// Arrival sequence by txid.
    index: HashMap<TxId, u64>,

    /// Transactions that already reached `Done`, so a resubmission can't
    /// get a second completion.
    completed: HashSet<TxId>,
}

impl TxLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions still being tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, txid: &TxId) -> Option<&TrackedTx> {
        self.index.get(txid).and_then(|seq| self.entries.get(seq))
    }

    pub fn is_completed(&self, txid: &TxId) -> bool {
        self.completed.contains(txid)
    }

    /// Starts tracking a transaction, returning its arrival sequence.  Returns
    /// `None` if it's already tracked or was already completed.
    pub fn register(&mut self, txid: TxId) -> Option<u64> {
        if self.index.contains_key(&txid) {
            debug!(%txid, "tx already tracked");
            return None;
        }

        if self.completed.contains(&txid) {
            debug!(%txid, "tx already completed, not tracking again");
            return None;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        self.index.insert(txid.clone(), seq);
        self.entries.insert(
            seq,
            TrackedTx {
                txid,
                arrival_seq: seq,
                state: TxState::Pending,
                settlements: Vec::new(),
            },
        );

        Some(seq)
    }

    /// Iterates over everything not yet done, in arrival order.
    pub fn active_in_arrival_order(&self) -> impl Iterator<Item = &TrackedTx> {
        self.entries.values()
    }

    pub fn pending_in_arrival_order(&self) -> impl Iterator<Item = &TrackedTx> {
        self.entries
            .values()
            .filter(|tx| tx.state == TxState::Pending)
    }

    /// Returns the settled transactions with a live settlement in the block,
    /// in arrival order.
    pub fn settled_in(&self, blkid: &BlockHash) -> Vec<TxId> {
        self.entries
            .values()
            .filter(|tx| tx.state == TxState::Settled && tx.settlement_in(blkid).is_some())
            .map(|tx| tx.txid.clone())
            .collect()
    }

    /// Checks that moving `txid` to `to` with the given settlement is legal,
    /// without changing anything.
    pub fn check_transition(
        &self,
        txid: &TxId,
        to: TxState,
        settlement: Option<&TxSettlement>,
    ) -> TrackerResult<()> {
        let tx = self
            .get(txid)
            .ok_or_else(|| TrackerError::UnknownTx(txid.clone()))?;

        let ok = match (tx.state, to, settlement) {
            (TxState::Pending, TxState::Settled, Some(_)) => true,

            // Settling again on another fork.
            (TxState::Settled, TxState::Settled, Some(s)) => {
                tx.settlement_in(s.block_hash()).is_none()
            }

            (TxState::Settled, TxState::Done, Some(s)) => {
                tx.settlement_in(s.block_hash()).is_some()
            }

            _ => false,
        };

        if !ok {
            return Err(TrackerError::InvalidTransition {
                txid: txid.clone(),
                from: tx.state,
                to,
            });
        }

        Ok(())
    }

    /// Moves a transaction forward.  For `Settled` the settlement is
    /// recorded, for `Done` it names which live settlement was finalized and
    /// the transaction stops being tracked.
    pub fn transition(
        &mut self,
        txid: &TxId,
        to: TxState,
        settlement: Option<TxSettlement>,
    ) -> TrackerResult<()> {
        self.check_transition(txid, to, settlement.as_ref())?;

        let Some(seq) = self.index.get(txid).copied() else {
            return Err(TrackerError::UnknownTx(txid.clone()));
        };

        match to {
            TxState::Settled => {
                let Some(tx) = self.entries.get_mut(&seq) else {
                    return Err(TrackerError::UnknownTx(txid.clone()));
                };
                tx.state = TxState::Settled;
                tx.settlements.extend(settlement);
            }

            TxState::Done => {
                self.entries.remove(&seq);
                self.index.remove(txid);
                self.completed.insert(txid.clone());
            }

            TxState::Pending => {
                return Err(TrackerError::InvalidTransition {
                    txid: txid.clone(),
                    from: TxState::Pending,
                    to,
                })
            }
        }

        Ok(())
    }

    /// Records a settlement.
    pub fn settle(&mut self, txid: &TxId, settlement: TxSettlement) -> TrackerResult<()> {
        self.transition(txid, TxState::Settled, Some(settlement))
    }

    /// Completes a transaction through its settlement in `blkid`, returning
    /// that settlement.
    pub fn complete(&mut self, txid: &TxId, blkid: &BlockHash) -> TrackerResult<TxSettlement> {
        let settlement = self
            .get(txid)
            .and_then(|tx| tx.settlement_in(blkid))
            .cloned()
            .ok_or_else(|| TrackerError::InvalidTransition {
                txid: txid.clone(),
                from: self.get(txid).map_or(TxState::Done, |tx| tx.state),
                to: TxState::Done,
            })?;

        self.transition(txid, TxState::Done, Some(settlement.clone()))?;
        Ok(settlement)
    }

    /// Forgets settlements recorded in blocks that were pruned.  The
    /// transactions stay settled, they just have nothing left to finalize
    /// until they settle on the surviving chain.
    pub fn drop_settlements_in(&mut self, blkids: &[BlockHash]) {
        let pruned: HashSet<&BlockHash> = blkids.iter().collect();
        for tx in self.entries.values_mut() {
            let before = tx.settlements.len();
            tx.settlements.retain(|s| !pruned.contains(s.block_hash()));
            if tx.settlements.len() != before {
                debug!(txid = %tx.txid, "dropped settlements on pruned blocks");
            }
        }
    }
}
