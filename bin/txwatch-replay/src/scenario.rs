//! Recorded chain scenarios and a chain client that answers from them.

use std::{
    collections::{HashMap, HashSet},
    fs,
    path::Path,
    sync::Arc,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tracing::*;
use txwatch_primitives::prelude::*;
use txwatch_tracker::ChainClient;

use crate::errors::InitError;

/// What the chain says about a single block.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct BlockSpec {
    /// Transactions included in the block.
    #[serde(default)]
    pub body: Vec<TxId>,

    /// Transactions that can't be included anymore as of this block.
    #[serde(default)]
    pub invalid: HashSet<TxId>,

    /// Included transactions that failed execution.
    #[serde(default)]
    pub failed: HashSet<TxId>,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub blocks: HashMap<BlockHash, BlockSpec>,

    /// Events in delivery order.
    pub events: Vec<ChainEvent>,
}

impl Scenario {
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

pub fn load_scenario(path: &Path) -> Result<Scenario, InitError> {
    let raw = fs::read_to_string(path)?;
    let scenario = Scenario::from_json(&raw)
        .map_err(|e| InitError::MalformedScenario(path.to_path_buf(), e))?;
    debug!(
        blocks = scenario.blocks.len(),
        events = scenario.events.len(),
        "loaded scenario"
    );
    Ok(scenario)
}

/// Chain client backed by a scenario's block table.  Blocks missing from the
/// table are empty and everything not listed as invalid is valid.
#[derive(Clone, Debug)]
pub struct ScenarioClient {
    blocks: Arc<HashMap<BlockHash, BlockSpec>>,
    unpinned: Arc<Mutex<Vec<BlockHash>>>,
}

impl ScenarioClient {
    pub fn new(blocks: HashMap<BlockHash, BlockSpec>) -> Self {
        Self {
            blocks: Arc::new(blocks),
            unpinned: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every block we were asked to unpin, in request order.
    pub fn unpinned(&self) -> Vec<BlockHash> {
        self.unpinned.lock().clone()
    }
}

#[async_trait]
impl ChainClient for ScenarioClient {
    async fn get_body(&self, blkid: &BlockHash) -> anyhow::Result<Vec<TxId>> {
        Ok(self
            .blocks
            .get(blkid)
            .map(|b| b.body.clone())
            .unwrap_or_default())
    }

    async fn is_tx_valid(&self, blkid: &BlockHash, txid: &TxId) -> anyhow::Result<bool> {
        Ok(!self
            .blocks
            .get(blkid)
            .is_some_and(|b| b.invalid.contains(txid)))
    }

    async fn is_tx_successful(&self, blkid: &BlockHash, txid: &TxId) -> anyhow::Result<bool> {
        let Some(block) = self.blocks.get(blkid) else {
            anyhow::bail!("scenario: no block {blkid}");
        };

        if !block.body.contains(txid) {
            anyhow::bail!("scenario: {txid} not in {blkid}");
        }

        Ok(!block.failed.contains(txid))
    }

    async fn unpin(&self, blkids: &[BlockHash]) -> anyhow::Result<()> {
        self.unpinned.lock().extend_from_slice(blkids);
        Ok(())
    }
}
