use thiserror::Error;
use txwatch_primitives::prelude::*;

use crate::ledger::TxState;

#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("block {0} not in tree")]
    UnknownBlock(BlockHash),

    #[error("tx {0} not tracked")]
    UnknownTx(TxId),

    /// A ledger transition that would break the monotonic lifecycle.  This
    /// is a logic fault in the engines, not something the chain can cause.
    #[error("invalid transition for tx {txid} ({from} -> {to})")]
    InvalidTransition {
        txid: TxId,
        from: TxState,
        to: TxState,
    },

    #[error("tried to finalize block {0} on a pruned fork")]
    ConflictingFinality(BlockHash),

    #[error("client: {0}")]
    Client(#[from] anyhow::Error),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
