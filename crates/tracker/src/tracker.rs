//! Event dispatcher that owns all tracking state.

use tracing::*;
use txwatch_config::tracker::TrackerConfig;
use txwatch_primitives::prelude::*;

use crate::{
    client::{ChainClient, TxStatusSink},
    errors::TrackerResult,
    finalization, settlement,
    state::TrackerState,
};

/// Tracks submitted transactions through settlement and finality.
///
/// Events must be fed in the order the source delivers them, one at a time.
/// Each call to [`Self::handle_event`] finishes all of its chain queries and
/// notifications before returning.
pub struct TxTracker<C, S> {
    config: TrackerConfig,
    client: C,
    sink: S,
    state: TrackerState,
}

impl<C: ChainClient, S: TxStatusSink> TxTracker<C, S> {
    pub fn new(config: TrackerConfig, client: C, sink: S) -> Self {
        Self {
            config,
            client,
            sink,
            state: TrackerState::new(),
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Handles a single event.  Errors are logged here and returned; the
    /// tracker stays usable afterwards.
    pub async fn handle_event(&mut self, event: ChainEvent) -> TrackerResult<()> {
        let span = debug_span!("event", kind = event.kind());
        let res = self.handle_event_inner(event).instrument(span).await;
        if let Err(e) = &res {
            error!(err = %e, "failed to handle event");
        }
        res
    }

    async fn handle_event_inner(&mut self, event: ChainEvent) -> TrackerResult<()> {
        let Self {
            config,
            client,
            sink,
            state,
        } = self;

        match event {
            ChainEvent::NewBlock {
                block_hash,
                parent_hash,
            } => {
                let report = settlement::process_new_block(
                    state,
                    client,
                    sink,
                    config,
                    block_hash,
                    parent_hash,
                )
                .await?;
                trace!(?report, "processed new block");
            }

            ChainEvent::NewTransaction { value } => {
                if let Some(seq) = state.ledger.register(value.clone()) {
                    debug!(txid = %value, %seq, "tracking new tx");
                }
            }

            ChainEvent::Finalized { block_hash } => {
                finalization::process_finalized(state, client, sink, config, block_hash).await?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ledger::TxState,
        test_utils::{Notification, RecordingSink, TestChainClient},
    };

    fn blk(s: &str) -> BlockHash {
        BlockHash::from(s)
    }

    fn tx(s: &str) -> TxId {
        TxId::from(s)
    }

    fn new_tracker() -> (TxTracker<TestChainClient, RecordingSink>, TestChainClient) {
        let client = TestChainClient::new();
        let tracker = TxTracker::new(
            TrackerConfig::default(),
            client.clone(),
            RecordingSink::default(),
        );
        (tracker, client)
    }

    async fn feed(
        tracker: &mut TxTracker<TestChainClient, RecordingSink>,
        events: impl IntoIterator<Item = ChainEvent>,
    ) {
        for ev in events {
            tracker.handle_event(ev).await.unwrap();
        }
    }

    #[tokio::test]
    async fn test_body_order_does_not_matter() {
        let (mut tracker, client) = new_tracker();
        client.add_block("x", &["t2", "t1"]);

        feed(
            &mut tracker,
            [
                ChainEvent::new_transaction("t1"),
                ChainEvent::new_transaction("t2"),
                ChainEvent::new_block("x", "g"),
            ],
        )
        .await;

        assert_eq!(
            tracker.sink().events,
            vec![
                Notification::settled("t1", TxSettlement::valid(blk("x"), true)),
                Notification::settled("t2", TxSettlement::valid(blk("x"), true)),
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_new_block() {
        let (mut tracker, client) = new_tracker();
        client.add_block("b1", &["t1"]);

        feed(
            &mut tracker,
            [
                ChainEvent::new_transaction("t1"),
                ChainEvent::new_transaction("t2"),
                ChainEvent::new_block("b1", "b0"),
                ChainEvent::new_block("b1", "b0"),
            ],
        )
        .await;

        assert_eq!(tracker.sink().settled_count(&tx("t1")), 1);
        assert_eq!(client.body_calls(), vec![blk("b1")]);
        assert_eq!(client.success_calls(), vec![(blk("b1"), tx("t1"))]);
        assert_eq!(client.validity_calls(), vec![(blk("b1"), tx("t2"))]);
    }

    #[tokio::test]
    async fn test_duplicate_new_transaction() {
        let (mut tracker, client) = new_tracker();
        client.add_block("b1", &["t1"]);

        feed(
            &mut tracker,
            [
                ChainEvent::new_transaction("t1"),
                ChainEvent::new_transaction("t1"),
                ChainEvent::new_block("b1", "b0"),
                ChainEvent::finalized("b1"),
                // Resubmitted after it's done.
                ChainEvent::new_transaction("t1"),
                ChainEvent::new_block("b2", "b1"),
                ChainEvent::finalized("b2"),
            ],
        )
        .await;

        assert_eq!(tracker.sink().settled_count(&tx("t1")), 1);
        assert_eq!(tracker.sink().done_count(&tx("t1")), 1);
        assert!(tracker.state().ledger().is_empty());
    }

    #[tokio::test]
    async fn test_no_queries_without_transactions() {
        let (mut tracker, client) = new_tracker();

        feed(
            &mut tracker,
            [
                ChainEvent::new_block("b1", "b0"),
                ChainEvent::new_block("b2", "b1"),
                ChainEvent::finalized("b2"),
            ],
        )
        .await;

        assert!(client.body_calls().is_empty());
        assert!(client.validity_calls().is_empty());
        assert!(tracker.sink().events.is_empty());
    }

    #[tokio::test]
    async fn test_invalid_then_descendant_not_requeried() {
        let (mut tracker, client) = new_tracker();
        client.set_invalid("x", "t1");

        feed(
            &mut tracker,
            [
                ChainEvent::new_transaction("t1"),
                ChainEvent::new_block("x", "g"),
                ChainEvent::new_block("y", "x"),
                ChainEvent::new_block("z", "y"),
            ],
        )
        .await;

        assert_eq!(client.validity_calls(), vec![(blk("x"), tx("t1"))]);
        assert_eq!(
            tracker.sink().events,
            vec![Notification::settled(
                "t1",
                TxSettlement::invalid(blk("x"))
            )]
        );
    }

    #[tokio::test]
    async fn test_invalid_reevaluated_on_other_fork() {
        let (mut tracker, client) = new_tracker();
        client.set_invalid("x", "t1");
        client.add_block("w", &["t1"]);

        feed(
            &mut tracker,
            [
                ChainEvent::new_transaction("t1"),
                ChainEvent::new_block("g", "pre"),
                ChainEvent::new_block("x", "g"),
                ChainEvent::new_block("w", "g"),
                ChainEvent::finalized("w"),
            ],
        )
        .await;

        assert_eq!(
            tracker.sink().events,
            vec![
                Notification::settled("t1", TxSettlement::invalid(blk("x"))),
                Notification::settled("t1", TxSettlement::valid(blk("w"), true)),
                Notification::done("t1", TxSettlement::valid(blk("w"), true)),
            ]
        );
        assert_eq!(client.unpinned(), vec![blk("x")]);
    }

    #[tokio::test]
    async fn test_competing_fork_inclusions() {
        let (mut tracker, client) = new_tracker();
        client.add_block("a1", &["t1"]);
        client.add_block("b1", &["t1"]);

        feed(
            &mut tracker,
            [
                ChainEvent::new_transaction("t1"),
                ChainEvent::new_block("g", "pre"),
                ChainEvent::new_block("a1", "g"),
                ChainEvent::new_block("b1", "g"),
                ChainEvent::new_block("a2", "a1"),
                ChainEvent::finalized("a2"),
            ],
        )
        .await;

        assert_eq!(
            tracker.sink().events,
            vec![
                Notification::settled("t1", TxSettlement::valid(blk("a1"), true)),
                Notification::settled("t1", TxSettlement::valid(blk("b1"), true)),
                Notification::done("t1", TxSettlement::valid(blk("a1"), true)),
            ]
        );

        // a2 descends from a1, so t1 needn't be looked at again there.
        assert!(!client.body_calls().contains(&blk("a2")));
    }

    #[tokio::test]
    async fn test_unpin_property() {
        // g -> b1 -> b2 -> b3 -> b4, with a fork b2 -> f3
        let (mut tracker, client) = new_tracker();

        feed(
            &mut tracker,
            [
                ChainEvent::new_block("g", "pre"),
                ChainEvent::new_block("b1", "g"),
                ChainEvent::new_block("b2", "b1"),
                ChainEvent::new_block("b3", "b2"),
                ChainEvent::new_block("f3", "b2"),
                ChainEvent::new_block("b4", "b3"),
                ChainEvent::finalized("b2"),
            ],
        )
        .await;

        // Nothing is behind a previous tip yet.
        assert!(client.unpinned().is_empty());

        feed(&mut tracker, [ChainEvent::finalized("b4")]).await;
        let unpinned = client.unpinned();

        // Strict ancestors of the old tip go, as does the dead fork.
        assert_eq!(unpinned, vec![blk("b1"), blk("f3"), blk("g")]);

        // The old tip and the new stretch stay.
        for b in ["b2", "b3", "b4"] {
            assert!(!unpinned.contains(&blk(b)));
        }
    }

    #[tokio::test]
    async fn test_settled_before_done_always() {
        let (mut tracker, client) = new_tracker();
        client.add_block("b1", &["t1"]);
        client.add_block("b2", &["t2"]);
        client.add_block("b3", &["t3"]);

        feed(
            &mut tracker,
            [
                ChainEvent::new_transaction("t1"),
                ChainEvent::new_transaction("t2"),
                ChainEvent::new_block("b1", "b0"),
                ChainEvent::new_block("b2", "b1"),
                ChainEvent::new_transaction("t3"),
                ChainEvent::new_block("b3", "b2"),
                ChainEvent::finalized("b2"),
                ChainEvent::finalized("b3"),
            ],
        )
        .await;

        let events = &tracker.sink().events;
        for (i, n) in events.iter().enumerate() {
            if let Notification::Done(txid, s) = n {
                let settled_before = events[..i]
                    .iter()
                    .any(|m| *m == Notification::Settled(txid.clone(), s.clone()));
                assert!(settled_before, "done without settled for {txid}");
            }
        }

        for t in ["t1", "t2", "t3"] {
            assert_eq!(tracker.sink().done_count(&tx(t)), 1);
        }
    }

    #[tokio::test]
    async fn test_error_leaves_tracker_usable() {
        let (mut tracker, client) = new_tracker();
        client.fail_body("b1");
        client.add_block("b2", &["t1"]);

        tracker
            .handle_event(ChainEvent::new_transaction("t1"))
            .await
            .unwrap();
        assert!(tracker
            .handle_event(ChainEvent::new_block("b1", "b0"))
            .await
            .is_err());
        tracker
            .handle_event(ChainEvent::new_block("b2", "b1"))
            .await
            .unwrap();

        let entry = tracker.state().ledger().get(&tx("t1")).unwrap();
        assert_eq!(entry.state(), TxState::Settled);
    }

    #[tokio::test]
    async fn test_redelivered_block_after_body_failure() {
        let (mut tracker, client) = new_tracker();
        client.add_block("b1", &["t1"]);
        client.fail_body("b1");

        tracker
            .handle_event(ChainEvent::new_transaction("t1"))
            .await
            .unwrap();
        assert!(tracker
            .handle_event(ChainEvent::new_block("b1", "b0"))
            .await
            .is_err());

        client.restore_body("b1");
        feed(
            &mut tracker,
            [
                ChainEvent::new_block("b1", "b0"),
                ChainEvent::finalized("b1"),
            ],
        )
        .await;

        assert_eq!(
            tracker.sink().events,
            vec![
                Notification::settled("t1", TxSettlement::valid(blk("b1"), true)),
                Notification::done("t1", TxSettlement::valid(blk("b1"), true)),
            ]
        );
        assert_eq!(client.body_calls(), vec![blk("b1"), blk("b1")]);
    }

    #[tokio::test]
    async fn test_finalized_block_settles_after_body_failure() {
        let (mut tracker, client) = new_tracker();
        client.add_block("b1", &["t1"]);
        client.add_block("b2", &["t2"]);
        client.fail_body("b1");

        feed(
            &mut tracker,
            [
                ChainEvent::new_transaction("t1"),
                ChainEvent::new_transaction("t2"),
            ],
        )
        .await;
        assert!(tracker
            .handle_event(ChainEvent::new_block("b1", "b0"))
            .await
            .is_err());
        feed(&mut tracker, [ChainEvent::new_block("b2", "b1")]).await;

        // Still broken, so finality can't go through yet.
        assert!(tracker
            .handle_event(ChainEvent::finalized("b2"))
            .await
            .is_err());
        assert!(tracker.state().tree().finalized_tip().is_none());

        client.restore_body("b1");
        feed(&mut tracker, [ChainEvent::finalized("b2")]).await;

        assert_eq!(
            tracker.sink().events,
            vec![
                Notification::settled("t2", TxSettlement::valid(blk("b2"), true)),
                Notification::settled("t1", TxSettlement::valid(blk("b1"), true)),
                Notification::done("t1", TxSettlement::valid(blk("b1"), true)),
                Notification::done("t2", TxSettlement::valid(blk("b2"), true)),
            ]
        );
        assert!(!tracker.state().is_unsettled(&blk("b1")));
    }

    #[tokio::test]
    async fn test_old_tip_released_after_disconnected_finalization() {
        let (mut tracker, client) = new_tracker();

        feed(
            &mut tracker,
            [
                ChainEvent::new_block("g", "pre"),
                ChainEvent::new_block("a1", "g"),
                ChainEvent::finalized("a1"),
                // Never announced, so it doesn't hang off a1.
                ChainEvent::finalized("f9"),
                ChainEvent::new_block("f10", "f9"),
                ChainEvent::finalized("f10"),
                ChainEvent::new_block("f11", "f10"),
                ChainEvent::finalized("f11"),
            ],
        )
        .await;

        assert_eq!(client.unpinned(), vec![blk("a1"), blk("g"), blk("f9")]);
        assert!(!tracker.state().tree().is_pinned(&blk("a1")));
        assert!(tracker.state().tree().is_pinned(&blk("f10")));
    }
}
