//! The external chain source collaborator (spec.md §4.7 "ChainSource").
//!
//! Modeled the same way the teacher models its celestia/sequencer readers: a trait describing
//! the capability set the synchronizer needs (subscribe to new blocks, catch up on history, read
//! chain-level facts), with dynamic dispatch at the synchronizer's boundary so the concrete
//! transport (an RPC client, a local devnet fixture, ...) never leaks into synchronizer logic.

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::{
    block_queue::BlockQueue,
    types::Block,
};

#[derive(Debug, thiserror::Error)]
pub enum ChainSourceError {
    #[error("chain source is not connected")]
    NotConnected,
    #[error("no block exists at rollup id {0}")]
    NoSuchBlock(u64),
}

/// The contract the synchronizer requires of a chain source (spec.md §4.7). `start` begins
/// delivering new blocks into `queue` as they are observed on-chain from `from_rollup_id`
/// onward; it is the producer side of the [`BlockQueue`] (spec.md §4.3).
#[async_trait]
pub trait ChainSource: Send + Sync {
    async fn start(&self, from_rollup_id: u64, queue: BlockQueue) -> Result<(), ChainSourceError>;
    async fn stop(&self);

    fn get_chain_id(&self) -> u64;

    /// Returns all blocks from `from_rollup_id` (inclusive) known to the chain source right now,
    /// used for the startup "sync from chain" sweep (spec.md §4.5.2).
    async fn get_blocks(&self, from_rollup_id: u64) -> Result<Vec<Block>, ChainSourceError>;

    /// The rollup contract's own on-chain balance for `asset_id`, used to cross-check
    /// `AssetMetricsDao::contract_balance` (spec.md §4.5.8).
    async fn get_rollup_balance(&self, asset_id: u32) -> Result<u128, ChainSourceError>;
}

/// A fixed-fixture chain source for tests and local development: `blocks` is the full history
/// the source will ever serve, and `start` simply drains everything from `from_rollup_id`
/// onward into the queue without simulating further on-chain activity.
#[derive(Debug, Default)]
pub struct FixtureChainSource {
    chain_id: u64,
    blocks: Mutex<Vec<Block>>,
}

impl FixtureChainSource {
    #[must_use]
    pub fn new(chain_id: u64, blocks: Vec<Block>) -> Self {
        Self {
            chain_id,
            blocks: Mutex::new(blocks),
        }
    }
}

#[async_trait]
impl ChainSource for FixtureChainSource {
    async fn start(&self, from_rollup_id: u64, queue: BlockQueue) -> Result<(), ChainSourceError> {
        let blocks = self.blocks.lock().await;
        for block in blocks
            .iter()
            .filter(|b| b.rollup_id >= from_rollup_id)
            .cloned()
        {
            debug!(rollup_id = block.rollup_id, "fixture chain source delivering block");
            queue.put(block);
        }
        Ok(())
    }

    async fn stop(&self) {}

    fn get_chain_id(&self) -> u64 {
        self.chain_id
    }

    async fn get_blocks(&self, from_rollup_id: u64) -> Result<Vec<Block>, ChainSourceError> {
        Ok(self
            .blocks
            .lock()
            .await
            .iter()
            .filter(|b| b.rollup_id >= from_rollup_id)
            .cloned()
            .collect())
    }

    async fn get_rollup_balance(&self, _asset_id: u32) -> Result<u128, ChainSourceError> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn block(rollup_id: u64) -> Block {
        Block {
            rollup_id,
            created: chrono::Utc::now(),
            eth_tx_hash: [0; 32],
            rollup_size: 1,
            rollup_proof_data: bytes::Bytes::new(),
            offchain_tx_data: vec![],
            interaction_result: vec![],
            gas_used: 0,
            gas_price: 0,
        }
    }

    #[tokio::test]
    async fn start_delivers_only_blocks_at_or_after_from() {
        let source = FixtureChainSource::new(1, vec![block(0), block(1), block(2)]);
        let (queue, consumer) = BlockQueue::new();
        source.start(1, queue.clone()).await.unwrap();
        queue.cancel();

        let seen = std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen_clone = seen.clone();
        consumer
            .process(move |b| {
                let seen = seen_clone.clone();
                async move {
                    seen.lock().unwrap().push(b.rollup_id);
                }
            })
            .await;
        assert_eq!(*seen.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn get_blocks_is_inclusive_of_from() {
        let source = FixtureChainSource::new(1, vec![block(0), block(1)]);
        let blocks = source.get_blocks(1).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].rollup_id, 1);
    }
}
