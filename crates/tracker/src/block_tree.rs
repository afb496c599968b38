//! Tracker for keeping track of the forest of blocks we've seen.

use std::collections::*;

use tracing::*;
use txwatch_primitives::prelude::*;

use crate::errors::{TrackerError, TrackerResult};

/// Entry in block tracker table we use to relate a block with its parent.
/// Children are never stored, we only ever walk towards the root.
#[derive(Clone, Debug)]
struct BlockEntry {
    /// Parent as announced.  It may not be in the table, in which case this
    /// block is a root.  `None` for blocks we learned about only through a
    /// finalization.
    parent: Option<BlockHash>,

    finalized: bool,

    /// Cleared once the block has been handed back to the chain API.
    pinned: bool,
}

/// Forest of observed blocks, keyed by hash.
#[derive(Debug, Default)]
pub struct BlockTree {
    blocks: HashMap<BlockHash, BlockEntry>,

    /// Most recent block we were told is finalized.
    finalized_tip: Option<BlockHash>,
}

impl BlockTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the newest finalized block, if there's been any finalization.
    pub fn finalized_tip(&self) -> Option<&BlockHash> {
        self.finalized_tip.as_ref()
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Returns `true` if the block is already known to the tracker.
    pub fn is_seen_block(&self, id: &BlockHash) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn is_finalized(&self, id: &BlockHash) -> bool {
        self.blocks.get(id).is_some_and(|ent| ent.finalized)
    }

    pub fn is_pinned(&self, id: &BlockHash) -> bool {
        self.blocks.get(id).is_some_and(|ent| ent.pinned)
    }

    /// Gets the announced parent of a block.  Returns `None` if the block
    /// isn't in the tree or came without a parent.
    pub fn get_parent(&self, id: &BlockHash) -> Option<&BlockHash> {
        self.blocks.get(id).and_then(|ent| ent.parent.as_ref())
    }

    /// Like [`Self::get_parent`], but only if the parent is itself in the tree.
    fn parent_in_tree(&self, id: &BlockHash) -> Option<&BlockHash> {
        self.get_parent(id).filter(|p| self.blocks.contains_key(*p))
    }

    /// Adds a block if we haven't seen it.  Returns if it was new.
    pub fn insert(&mut self, blkid: BlockHash, parent: Option<BlockHash>) -> bool {
        if self.blocks.contains_key(&blkid) {
            trace!(%blkid, "block already in tree");
            return false;
        }

        if let Some(p) = &parent {
            if !self.blocks.contains_key(p) {
                debug!(%blkid, parent = %p, "parent not in tree, inserting as root");
            }
        }

        self.blocks.insert(
            blkid,
            BlockEntry {
                parent,
                finalized: false,
                pinned: true,
            },
        );
        true
    }

    /// Iterates over the strict ancestors of a block that are in the tree,
    /// nearest first.  Bounded by the table size so a bogus parent cycle
    /// can't spin forever.
    fn iter_ancestors<'a>(&'a self, blkid: &'a BlockHash) -> impl Iterator<Item = &'a BlockHash> {
        let mut cur = blkid;
        let mut budget = self.blocks.len();
        std::iter::from_fn(move || {
            if budget == 0 {
                return None;
            }
            budget -= 1;
            let parent = self.parent_in_tree(cur)?;
            cur = parent;
            Some(parent)
        })
    }

    /// Returns the blocks from `to` back to, but not including, `from`,
    /// newest first.  Returns `None` if `to` does not descend from `from`.
    pub fn ancestor_path(&self, from: &BlockHash, to: &BlockHash) -> Option<Vec<BlockHash>> {
        if from == to {
            return Some(Vec::new());
        }

        if !self.blocks.contains_key(to) {
            return None;
        }

        let mut path = vec![to.clone()];
        for anc in self.iter_ancestors(to) {
            if anc == from {
                return Some(path);
            }
            path.push(anc.clone());
        }

        None
    }

    /// Checks if `ancestor` is a strict ancestor of `blkid`.
    pub fn is_descendant(&self, ancestor: &BlockHash, blkid: &BlockHash) -> bool {
        // Finalized blocks are never below unfinalized ones, so if we're
        // looking for an unfinalized ancestor we can stop at finality.
        let anc_finalized = self.is_finalized(ancestor);

        for anc in self.iter_ancestors(blkid) {
            if anc == ancestor {
                return true;
            }

            if !anc_finalized && self.is_finalized(anc) {
                return false;
            }
        }

        false
    }

    /// Returns the blocks that become finalized if `blkid` is, oldest first.
    /// Empty if the block is unknown or already finalized.
    pub fn finalization_path(&self, blkid: &BlockHash) -> Vec<BlockHash> {
        if !self.blocks.contains_key(blkid) || self.is_finalized(blkid) {
            return Vec::new();
        }

        if let Some(tip) = &self.finalized_tip {
            if let Some(mut path) = self.ancestor_path(tip, blkid) {
                path.reverse();
                return path;
            }

            debug!(%blkid, %tip, "finalized block doesn't descend from finalized tip");
        }

        // Finalization events are sparse, so walk up to whatever's already
        // finalized or to a root.
        let mut path = vec![blkid.clone()];
        for anc in self.iter_ancestors(blkid) {
            if self.is_finalized(anc) {
                break;
            }
            path.push(anc.clone());
        }

        path.reverse();
        path
    }

    /// Updates the finalized block tip, returning a report that includes the
    /// precise blocks that were finalized transitively and the blocks that
    /// are no longer needed.
    pub fn update_finalized_tip(&mut self, blkid: &BlockHash) -> TrackerResult<FinalizeReport> {
        let Some(ent) = self.blocks.get(blkid) else {
            return Err(TrackerError::UnknownBlock(blkid.clone()));
        };

        let prev_tip = self.finalized_tip.clone();

        // Superseded finalized blocks are unpinned too, so check this first.
        if ent.finalized {
            debug!(%blkid, "block already finalized");
            return Ok(FinalizeReport {
                prev_tip,
                finalized: Vec::new(),
                rejected: Vec::new(),
            });
        }

        if !ent.pinned {
            return Err(TrackerError::ConflictingFinality(blkid.clone()));
        }

        let finalized = self.finalization_path(blkid);

        // If the new tip doesn't connect to the old one we can't prove which
        // forks are dead yet, so only drop what's behind the old tip.
        let connected = match (&prev_tip, finalized.first()) {
            (Some(tip), Some(oldest)) => self.parent_in_tree(oldest) == Some(tip),
            _ => true,
        };
        if !connected {
            warn!(%blkid, "finalized block not connected to previous tip, deferring fork pruning");
        }

        for b in &finalized {
            if let Some(ent) = self.blocks.get_mut(b) {
                ent.finalized = true;
            }
        }

        self.finalized_tip = Some(blkid.clone());

        let rejected = self.prune_candidates(blkid, prev_tip.as_ref(), connected);

        Ok(FinalizeReport {
            prev_tip,
            finalized,
            rejected,
        })
    }

    /// Returns the pinned blocks we no longer need after finalizing
    /// `new_tip`: blocks on forks competing with the finalized chain, and
    /// finalized blocks strictly older than `prev_tip`.  Sorted by hash.
    ///
    /// If `new_tip` isn't `connected` to `prev_tip`, the old tip is
    /// superseded as well, and fork pruning waits for a finalization that
    /// does connect.
    ///
    /// Must be called after the new finalized path has been marked.
    pub fn prune_candidates(
        &self,
        new_tip: &BlockHash,
        prev_tip: Option<&BlockHash>,
        connected: bool,
    ) -> Vec<BlockHash> {
        let mut superseded: HashSet<&BlockHash> = HashSet::new();
        if let Some(tip) = prev_tip {
            superseded.extend(self.iter_ancestors(tip));
            if !connected && tip != new_tip {
                superseded.insert(tip);
            }
        }

        let mut out = self
            .blocks
            .iter()
            .filter(|(_, ent)| ent.pinned)
            .filter(|(id, ent)| {
                if ent.finalized {
                    superseded.contains(id)
                } else {
                    connected && self.is_abandoned(id, new_tip)
                }
            })
            .map(|(id, _)| id.clone())
            .collect::<Vec<_>>();

        out.sort();
        out
    }

    /// Checks if an unfinalized block hangs off the finalized chain somewhere
    /// other than the tip.  Blocks whose ancestry runs into an unknown parent
    /// are still waiting to be resolved and aren't abandoned.
    fn is_abandoned(&self, blkid: &BlockHash, tip: &BlockHash) -> bool {
        for anc in self.iter_ancestors(blkid) {
            if anc == tip {
                return false;
            }

            if self.is_finalized(anc) {
                return true;
            }
        }

        false
    }

    /// Marks blocks as released.  We keep the entries around so late children
    /// of pruned blocks still resolve to a pruned fork.
    pub fn mark_unpinned(&mut self, blkids: &[BlockHash]) {
        for b in blkids {
            if let Some(ent) = self.blocks.get_mut(b) {
                ent.pinned = false;
            }
        }
    }
}

/// Report of blocks that we finalized when finalizing a new tip and blocks
/// that we no longer need.
#[derive(Clone, Debug)]
pub struct FinalizeReport {
    /// Previous tip.
    prev_tip: Option<BlockHash>,

    /// Blocks we've newly finalized, oldest first.  The last one is the new
    /// tip.
    finalized: Vec<BlockHash>,

    /// Blocks on competing chains, and finalized blocks older than the
    /// previous tip.
    rejected: Vec<BlockHash>,
}

impl FinalizeReport {
    /// Returns the blkid that was the previously finalized tip.  It's still
    /// finalized, but there's newer blocks that are also finalized now.
    pub fn prev_tip(&self) -> Option<&BlockHash> {
        self.prev_tip.as_ref()
    }

    /// The new chain tip that's finalized now.
    pub fn new_tip(&self) -> Option<&BlockHash> {
        self.finalized.last().or(self.prev_tip.as_ref())
    }

    /// Returns a slice of the blkids that were newly finalized, oldest first.
    pub fn finalized(&self) -> &[BlockHash] {
        &self.finalized
    }

    /// Returns a slice of the blkids that were rejected.
    pub fn rejected(&self) -> &[BlockHash] {
        &self.rejected
    }
}
