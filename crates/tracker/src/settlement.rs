//! Settlement pass run for every newly observed block.

use std::collections::HashSet;

use futures::{stream, StreamExt};
use tracing::*;
use txwatch_config::tracker::TrackerConfig;
use txwatch_primitives::prelude::*;

use crate::{
    client::{ChainClient, TxStatusSink},
    errors::TrackerResult,
    ledger::TxState,
    query_cache::QueryCache,
    state::TrackerState,
};

/// Which question we need answered for a candidate at a block.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum Check {
    /// It's in the body, did it execute successfully?
    Success,

    /// It's not in the body, can it still get in?
    Validity,
}

/// Summary of one settlement pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SettleReport {
    /// Transactions that needed evaluating at the block.
    pub candidates: usize,

    /// Settlement notifications emitted.
    pub settled: usize,

    /// Candidates skipped because a chain query failed.
    pub query_failures: usize,
}

/// Attaches a new block to the tree and settles whatever it settles.
/// Repeated blocks are ignored entirely.
pub async fn process_new_block<C: ChainClient, S: TxStatusSink>(
    state: &mut TrackerState,
    client: &C,
    sink: &mut S,
    config: &TrackerConfig,
    blkid: BlockHash,
    parent: BlockHash,
) -> TrackerResult<SettleReport> {
    if !state.tree.insert(blkid.clone(), Some(parent)) {
        if !state.unsettled.contains(&blkid) {
            debug!(%blkid, "ignoring repeated block");
            return Ok(SettleReport::default());
        }

        debug!(%blkid, "retrying settlement for repeated block");
    }

    settle_tracked_block(state, client, sink, config, &blkid).await
}

/// Runs [`settle_block`], keeping the block marked unsettled unless the pass
/// goes through, so a redelivered event can retry it.
pub(crate) async fn settle_tracked_block<C: ChainClient, S: TxStatusSink>(
    state: &mut TrackerState,
    client: &C,
    sink: &mut S,
    config: &TrackerConfig,
    blkid: &BlockHash,
) -> TrackerResult<SettleReport> {
    state.unsettled.insert(blkid.clone());
    let report = settle_block(state, client, sink, config, blkid).await?;
    state.unsettled.remove(blkid);
    Ok(report)
}

/// Finds the transactions that could settle at `blkid`, in arrival order.
fn find_candidates(state: &TrackerState, blkid: &BlockHash) -> Vec<TxId> {
    state
        .ledger
        .active_in_arrival_order()
        .filter(|tx| match tx.state() {
            TxState::Pending => true,

            // Whatever it settled as on this branch holds further down it.
            TxState::Settled => !tx.settlements().iter().any(|s| {
                s.block_hash() == blkid || state.tree.is_descendant(s.block_hash(), blkid)
            }),

            TxState::Done => false,
        })
        .map(|tx| tx.txid().clone())
        .collect()
}

/// Evaluates the candidate transactions against a block that's already in
/// the tree and emits the resulting settlements in arrival order.
pub(crate) async fn settle_block<C: ChainClient, S: TxStatusSink>(
    state: &mut TrackerState,
    client: &C,
    sink: &mut S,
    config: &TrackerConfig,
    blkid: &BlockHash,
) -> TrackerResult<SettleReport> {
    let candidates = find_candidates(state, blkid);
    if candidates.is_empty() {
        trace!(%blkid, "no candidates, not fetching body");
        return Ok(SettleReport::default());
    }

    let body = fetch_body(state, client, blkid).await?;

    let checks = candidates
        .into_iter()
        .map(|txid| {
            let check = if body.contains(&txid) {
                Check::Success
            } else {
                Check::Validity
            };
            (txid, check)
        })
        .collect::<Vec<_>>();

    let answers = run_checks(
        &state.cache,
        client,
        blkid,
        &checks,
        config.max_concurrent_queries,
    )
    .await;

    let mut report = SettleReport {
        candidates: checks.len(),
        ..Default::default()
    };

    let mut settlements = Vec::new();
    for ((txid, check), answer) in checks.into_iter().zip(answers) {
        let answer = match answer {
            Ok(v) => v,
            Err(e) => {
                warn!(%blkid, %txid, err = %e, "chain query failed, skipping tx at this block");
                report.query_failures += 1;
                continue;
            }
        };

        match check {
            Check::Success => {
                state
                    .cache
                    .put_success(blkid.clone(), txid.clone(), answer);
                settlements.push((txid, TxSettlement::valid(blkid.clone(), answer)));
            }

            Check::Validity => {
                state
                    .cache
                    .put_validity(blkid.clone(), txid.clone(), answer);
                if !answer {
                    settlements.push((txid, TxSettlement::invalid(blkid.clone())));
                }
            }
        }
    }

    // Check everything before touching the ledger so a bad transition can't
    // leave us with only some of the notifications sent.
    for (txid, s) in &settlements {
        state
            .ledger
            .check_transition(txid, TxState::Settled, Some(s))?;
    }

    for (txid, s) in settlements {
        state.ledger.settle(&txid, s.clone())?;
        debug!(%blkid, %txid, outcome = ?s.outcome(), "tx settled");
        sink.on_tx_settled(&txid, &s);
        report.settled += 1;
    }

    Ok(report)
}

async fn fetch_body<C: ChainClient>(
    state: &mut TrackerState,
    client: &C,
    blkid: &BlockHash,
) -> TrackerResult<HashSet<TxId>> {
    if let Some(body) = state.cache.get_body(blkid) {
        return Ok(body.clone());
    }

    let body = client
        .get_body(blkid)
        .await?
        .into_iter()
        .collect::<HashSet<_>>();
    trace!(%blkid, txs = body.len(), "fetched block body");

    state.cache.put_body(blkid.clone(), body.iter().cloned());
    Ok(body)
}

/// Answers each check, from the cache if we can, otherwise by asking the
/// client.  Queries run concurrently but the answers come back in the order
/// of `checks`.
async fn run_checks<C: ChainClient>(
    cache: &QueryCache,
    client: &C,
    blkid: &BlockHash,
    checks: &[(TxId, Check)],
    limit: usize,
) -> Vec<anyhow::Result<bool>> {
    stream::iter(checks.iter().map(|(txid, check)| async move {
        let cached = match check {
            Check::Success => cache.get_success(blkid, txid),
            Check::Validity => cache.get_validity(blkid, txid),
        };

        if let Some(v) = cached {
            return Ok(v);
        }

        match check {
            Check::Success => client.is_tx_successful(blkid, txid).await,
            Check::Validity => client.is_tx_valid(blkid, txid).await,
        }
    }))
    .buffered(limit.max(1))
    .collect()
    .await
}
