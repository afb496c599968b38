pub use crate::{
    event::ChainEvent,
    ids::{BlockHash, TxId},
    settlement::{SettlementOutcome, TxSettlement},
};
