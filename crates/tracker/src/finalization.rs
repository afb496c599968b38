//! Completes transactions as the blocks they settled in become final, and
//! releases the blocks we don't need anymore.

use tracing::*;
use txwatch_config::tracker::TrackerConfig;
use txwatch_primitives::prelude::*;

use crate::{
    block_tree::FinalizeReport,
    client::{ChainClient, TxStatusSink},
    errors::TrackerResult,
    settlement,
    state::TrackerState,
};

/// Advances finality to `blkid`, completing every transaction settled on the
/// newly finalized stretch of chain.
pub async fn process_finalized<C: ChainClient, S: TxStatusSink>(
    state: &mut TrackerState,
    client: &C,
    sink: &mut S,
    config: &TrackerConfig,
    blkid: BlockHash,
) -> TrackerResult<FinalizeReport> {
    if !state.tree.is_seen_block(&blkid) {
        warn!(%blkid, "finalized block was never announced, inserting as root");
        state.tree.insert(blkid.clone(), None);

        // Nothing could have settled in it yet, so give it the pass it
        // would've gotten as a new block.
        if config.settle_unseen_finalized {
            state.unsettled.insert(blkid.clone());
        }
    }

    // Anything about to be finalized has to have settled first, oldest first.
    let retry = state
        .tree
        .finalization_path(&blkid)
        .into_iter()
        .filter(|b| state.unsettled.contains(b))
        .collect::<Vec<_>>();
    for b in &retry {
        debug!(blkid = %b, "settling block before finalizing it");
        settlement::settle_tracked_block(state, client, sink, config, b).await?;
    }

    let report = state.tree.update_finalized_tip(&blkid)?;
    if report.finalized().is_empty() {
        debug!(%blkid, "nothing newly finalized");
        return Ok(report);
    }

    let mut completed = 0;
    for fblkid in report.finalized() {
        for txid in state.ledger.settled_in(fblkid) {
            let settlement = state.ledger.complete(&txid, fblkid)?;
            state.cache.evict_tx(&txid);
            debug!(blkid = %fblkid, %txid, "tx done");
            sink.on_tx_done(&txid, &settlement);
            completed += 1;
        }
    }

    release_blocks(state, client, config, report.rejected()).await;

    info!(
        %blkid,
        finalized = report.finalized().len(),
        %completed,
        rejected = report.rejected().len(),
        "advanced finalized tip"
    );

    Ok(report)
}

/// Forgets about blocks that were pruned or superseded and asks the client to
/// unpin them.
async fn release_blocks<C: ChainClient>(
    state: &mut TrackerState,
    client: &C,
    config: &TrackerConfig,
    blkids: &[BlockHash],
) {
    if blkids.is_empty() {
        return;
    }

    state.ledger.drop_settlements_in(blkids);
    state.cache.evict_blocks(blkids);
    state.tree.mark_unpinned(blkids);
    for b in blkids {
        state.unsettled.remove(b);
    }

    if !config.unpin_blocks {
        return;
    }

    // Best-effort, if this fails the blocks just stay pinned on their side.
    if let Err(e) = client.unpin(blkids).await {
        warn!(err = %e, count = blkids.len(), "failed to unpin blocks");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        errors::TrackerError,
        settlement::process_new_block,
        test_utils::{Notification, RecordingSink, TestChainClient},
    };

    fn blk(s: &str) -> BlockHash {
        BlockHash::from(s)
    }

    fn tx(s: &str) -> TxId {
        TxId::from(s)
    }

    struct Harness {
        state: TrackerState,
        client: TestChainClient,
        sink: RecordingSink,
        config: TrackerConfig,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                state: TrackerState::new(),
                client: TestChainClient::new(),
                sink: RecordingSink::default(),
                config: TrackerConfig::default(),
            }
        }

        fn register(&mut self, t: &str) {
            self.state.ledger.register(tx(t));
        }

        async fn block(&mut self, b: &str, p: &str) {
            process_new_block(
                &mut self.state,
                &self.client,
                &mut self.sink,
                &self.config,
                blk(b),
                blk(p),
            )
            .await
            .unwrap();
        }

        async fn finalize(&mut self, b: &str) -> TrackerResult<FinalizeReport> {
            process_finalized(
                &mut self.state,
                &self.client,
                &mut self.sink,
                &self.config,
                blk(b),
            )
            .await
        }
    }

    #[tokio::test]
    async fn test_sparse_finalization() {
        let mut h = Harness::new();
        h.client.add_block("b1", &["t2"]);
        h.client.add_block("b2", &["t3", "t1"]);
        h.client.add_block("b3", &["t4"]);
        for t in ["t1", "t2", "t3", "t4"] {
            h.register(t);
        }

        h.block("b1", "b0").await;
        h.block("b2", "b1").await;
        h.block("b3", "b2").await;
        h.sink.events.clear();

        let report = h.finalize("b3").await.unwrap();
        assert_eq!(report.finalized(), [blk("b1"), blk("b2"), blk("b3")]);

        assert_eq!(
            h.sink.events,
            vec![
                Notification::done("t2", TxSettlement::valid(blk("b1"), true)),
                Notification::done("t1", TxSettlement::valid(blk("b2"), true)),
                Notification::done("t3", TxSettlement::valid(blk("b2"), true)),
                Notification::done("t4", TxSettlement::valid(blk("b3"), true)),
            ]
        );
        assert!(h.state.ledger.is_empty());
        assert_eq!(h.state.cache.tx_entry_count(), 0);
    }

    #[tokio::test]
    async fn test_done_for_invalid() {
        let mut h = Harness::new();
        h.client.add_block("b1", &[]);
        h.client.set_invalid("b1", "t1");
        h.register("t1");

        h.block("b1", "b0").await;
        h.finalize("b1").await.unwrap();

        assert_eq!(
            h.sink.events,
            vec![
                Notification::settled("t1", TxSettlement::invalid(blk("b1"))),
                Notification::done("t1", TxSettlement::invalid(blk("b1"))),
            ]
        );
    }

    #[tokio::test]
    async fn test_unpins_forks_and_superseded() {
        // g -> a1 -> a2 -> a3
        //       \-> b2
        //  \-> c1
        let mut h = Harness::new();
        h.register("t1");
        for (b, p) in [
            ("g", "pre"),
            ("a1", "g"),
            ("c1", "g"),
            ("a2", "a1"),
            ("b2", "a1"),
            ("a3", "a2"),
        ] {
            h.client.add_block(b, &[]);
            h.block(b, p).await;
        }

        let report = h.finalize("a1").await.unwrap();
        assert_eq!(report.rejected(), [blk("c1")]);

        let report = h.finalize("a3").await.unwrap();
        assert_eq!(report.prev_tip(), Some(&blk("a1")));
        assert_eq!(report.rejected(), [blk("b2"), blk("g")]);

        assert_eq!(
            h.client.unpin_batches(),
            vec![vec![blk("c1")], vec![blk("b2"), blk("g")]]
        );
        assert!(h.state.cache.get_body(&blk("b2")).is_none());
        assert!(h.state.cache.get_body(&blk("a2")).is_some());
    }

    #[tokio::test]
    async fn test_unpin_disabled() {
        let mut h = Harness::new();
        h.config.unpin_blocks = false;
        h.block("g", "pre").await;
        h.block("a1", "g").await;
        h.block("c1", "g").await;

        let report = h.finalize("a1").await.unwrap();
        assert_eq!(report.rejected(), [blk("c1")]);
        assert!(h.client.unpin_batches().is_empty());
        assert!(!h.state.tree.is_pinned(&blk("c1")));
    }

    #[tokio::test]
    async fn test_fork_settlement_dropped_on_prune() {
        let mut h = Harness::new();
        h.client.add_block("a1", &["t1"]);
        h.client.add_block("b1", &[]);
        h.client.add_block("b2", &["t1"]);
        h.register("t1");

        h.block("g", "pre").await;
        h.block("a1", "g").await;
        h.block("b1", "g").await;

        // b1 wins, a1's settlement is gone.
        h.finalize("b1").await.unwrap();
        let entry = h.state.ledger.get(&tx("t1")).unwrap();
        assert!(entry.settlements().is_empty());

        h.block("b2", "b1").await;
        h.finalize("b2").await.unwrap();

        assert_eq!(
            h.sink.events,
            vec![
                Notification::settled("t1", TxSettlement::valid(blk("a1"), true)),
                Notification::settled("t1", TxSettlement::valid(blk("b2"), true)),
                Notification::done("t1", TxSettlement::valid(blk("b2"), true)),
            ]
        );
    }

    #[tokio::test]
    async fn test_unseen_finalized_block_settles_first() {
        let mut h = Harness::new();
        h.client.add_block("f1", &["t1"]);
        h.register("t1");

        h.finalize("f1").await.unwrap();

        assert_eq!(
            h.sink.events,
            vec![
                Notification::settled("t1", TxSettlement::valid(blk("f1"), true)),
                Notification::done("t1", TxSettlement::valid(blk("f1"), true)),
            ]
        );
        assert_eq!(h.client.body_calls(), vec![blk("f1")]);
    }

    #[tokio::test]
    async fn test_unseen_finalized_without_settle() {
        let mut h = Harness::new();
        h.config.settle_unseen_finalized = false;
        h.client.add_block("f1", &["t1"]);
        h.register("t1");

        let report = h.finalize("f1").await.unwrap();
        assert_eq!(report.finalized(), [blk("f1")]);
        assert!(h.sink.events.is_empty());
        assert!(h.client.body_calls().is_empty());
    }

    #[tokio::test]
    async fn test_pruned_block_finalization_rejected() {
        let mut h = Harness::new();
        h.block("g", "pre").await;
        h.block("a1", "g").await;
        h.block("b1", "g").await;

        h.finalize("a1").await.unwrap();
        let res = h.finalize("b1").await;
        assert!(matches!(res, Err(TrackerError::ConflictingFinality(_))));
    }

    #[tokio::test]
    async fn test_repeated_finalized_is_noop() {
        let mut h = Harness::new();
        h.client.add_block("b1", &["t1"]);
        h.register("t1");
        h.block("b1", "b0").await;

        h.finalize("b1").await.unwrap();
        let report = h.finalize("b1").await.unwrap();
        assert!(report.finalized().is_empty());
        assert_eq!(h.sink.done_count(&tx("t1")), 1);
    }
}
