use serde::{Deserialize, Serialize};

/// Default value for `max_concurrent_queries` in [`TrackerConfig`].
const DEFAULT_MAX_CONCURRENT_QUERIES: usize = 16;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Whether to ask the chain API to unpin pruned and superseded blocks
    /// after each finalization.
    #[serde(default = "default_true")]
    pub unpin_blocks: bool,

    /// Upper bound on chain queries in flight while evaluating one block.
    #[serde(default = "default_max_concurrent_queries")]
    pub max_concurrent_queries: usize,

    /// If a finalized block was never announced as a new block, run the
    /// settlement pass on it before completing transactions.
    #[serde(default = "default_true")]
    pub settle_unseen_finalized: bool,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            unpin_blocks: true,
            max_concurrent_queries: DEFAULT_MAX_CONCURRENT_QUERIES,
            settle_unseen_finalized: true,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_concurrent_queries() -> usize {
    DEFAULT_MAX_CONCURRENT_QUERIES
}
