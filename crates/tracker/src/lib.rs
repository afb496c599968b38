//! Transaction lifecycle tracking against a forking, finalizing chain.
//!
//! [`TxTracker`] consumes [`ChainEvent`]s one at a time and reports, exactly
//! once each, when a transaction settles in a block and when that block is
//! finalized.
//!
//! [`ChainEvent`]: txwatch_primitives::event::ChainEvent

pub mod block_tree;
pub mod client;
pub mod errors;
pub mod finalization;
pub mod ledger;
pub mod query_cache;
pub mod settlement;
pub mod state;
pub mod tracker;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

pub use client::{ChainClient, TxStatusSink};
pub use errors::{TrackerError, TrackerResult};
pub use tracker::TxTracker;
