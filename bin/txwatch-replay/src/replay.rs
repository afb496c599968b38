use tracing::*;
use txwatch_config::tracker::TrackerConfig;
use txwatch_primitives::prelude::*;
use txwatch_tracker::{ChainClient, TrackerError, TxStatusSink, TxTracker};

/// Totals for a finished replay.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub events: usize,
    pub failed_events: usize,
}

/// Feeds events to a fresh tracker in order.  Stops at the first failing
/// event unless `keep_going` is set, in which case failures are only
/// counted.
pub async fn replay<C: ChainClient, S: TxStatusSink>(
    config: TrackerConfig,
    client: C,
    sink: S,
    events: impl IntoIterator<Item = ChainEvent>,
    keep_going: bool,
) -> Result<(ReplaySummary, S), TrackerError> {
    let mut tracker = TxTracker::new(config, client, sink);
    let mut summary = ReplaySummary::default();

    for (idx, ev) in events.into_iter().enumerate() {
        summary.events += 1;
        if let Err(e) = tracker.handle_event(ev).await {
            if !keep_going {
                return Err(e);
            }

            warn!(%idx, "continuing past failed event");
            summary.failed_events += 1;
        }
    }

    info!(
        events = summary.events,
        failed = summary.failed_events,
        still_tracked = tracker.state().ledger().len(),
        "replay finished"
    );

    Ok((summary, tracker.into_sink()))
}
