use async_trait::async_trait;
use txwatch_primitives::prelude::*;

/// Chain query API the tracker consults.  Implementations are expected to
/// be cheap to call repeatedly, but the tracker memoizes results anyway.
#[async_trait]
pub trait ChainClient: Sync + Send + 'static {
    /// Transactions included in the block, empty if the block is unknown.
    async fn get_body(&self, blkid: &BlockHash) -> anyhow::Result<Vec<TxId>>;

    /// Whether the transaction could still be included on top of the block.
    async fn is_tx_valid(&self, blkid: &BlockHash, txid: &TxId) -> anyhow::Result<bool>;

    /// Whether the transaction executed successfully in the block.
    async fn is_tx_successful(&self, blkid: &BlockHash, txid: &TxId) -> anyhow::Result<bool>;

    /// Releases blocks we won't query again.  Best-effort.
    async fn unpin(&self, blkids: &[BlockHash]) -> anyhow::Result<()>;
}

/// Receives lifecycle notifications.  Each method is called at most once per
/// milestone, in transaction arrival order within a single event.
pub trait TxStatusSink {
    /// The transaction was included in, or became invalid at, a block.
    fn on_tx_settled(&mut self, txid: &TxId, settlement: &TxSettlement);

    /// The block the transaction settled in was finalized.
    fn on_tx_done(&mut self, txid: &TxId, settlement: &TxSettlement);
}
