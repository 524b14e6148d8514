//! Operator surface (SPEC_FULL.md C10 / spec.md §6): a thin, cheaply-`Clone`-able handle exposing
//! the five operations spec.md names as "exposed by the enclosing service, not by the core" —
//! `flush_txs`, `reset_pipeline`, `get_next_publish_time`, `get_tx_pool_profile`,
//! `get_block_buffers`. HTTP (or any other transport) binding these to an operator-facing API is
//! out of scope; this handle is the concrete seam such a binding would call into.
//!
//! Grounded on the teacher's `executor/mod.rs` `Handle<TStateInit>` pattern: a small `Clone`
//! struct wrapping `Arc`s to the components it delegates to, safe to hand out to multiple callers
//! concurrently since every method it forwards to is itself already safe to call concurrently
//! (spec.md §5: "`get_next_publish_time`, `get_tx_pool_profile`, and `get_block_buffers` are
//! read-only and concurrent-safe").

use std::sync::Arc;

use bytes::Bytes;

use crate::{
    pipeline::{
        PublishTimeProfile,
        TxPoolProfile,
    },
    synchronizer::Synchronizer,
};

/// Operator-facing handle to a running synchronizer/pipeline pair.
#[derive(Clone)]
pub struct SynchronizerHandle {
    synchronizer: Arc<Synchronizer>,
}

impl SynchronizerHandle {
    #[must_use]
    pub fn new(synchronizer: Arc<Synchronizer>) -> Self {
        Self {
            synchronizer,
        }
    }

    /// Requests the pipeline publish whatever is pending at its next safe point.
    pub fn flush_txs(&self) {
        self.synchronizer.pipeline().flush_txs();
    }

    /// Stops the pipeline, rolls back any staged (unsettled) writes, clears unsettled
    /// rollups/orphaned proofs/pending txs, and restarts the pipeline clean.
    pub async fn reset_pipeline(&self) {
        self.synchronizer.reset_pipeline().await;
    }

    #[must_use]
    pub fn get_next_publish_time(&self) -> PublishTimeProfile {
        self.synchronizer.pipeline().get_next_publish_time()
    }

    pub async fn get_tx_pool_profile(&self) -> TxPoolProfile {
        self.synchronizer.pipeline().get_tx_pool_profile().await
    }

    /// Settled blocks from `from` onward, serialized the same way they're appended to the block
    /// cache (spec.md §6 `getBlockBuffers(from)`).
    pub async fn get_block_buffers(&self, from: u64) -> Vec<Bytes> {
        self.synchronizer.block_cache().get_from(from).await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::SynchronizerHandle;
    use crate::{
        block_cache::BlockCache,
        chain_source::FixtureChainSource,
        init_state::EmptyInitState,
        metrics::NoopMetricsSink,
        note_algorithms::HashNoteAlgorithms,
        pipeline::{
            NullProofConstructor,
            Pipeline,
        },
        relational_store::InMemoryRelationalStore,
        synchronizer::Synchronizer,
        tree_store::InMemoryTreeStore,
    };

    fn handle() -> SynchronizerHandle {
        let relational_store = Arc::new(InMemoryRelationalStore::new());
        let pipeline = Arc::new(Pipeline::new(
            relational_store.clone(),
            Arc::new(NullProofConstructor),
            4,
            8,
        ));
        let (synchronizer, _consumer) = Synchronizer::new(
            Arc::new(InMemoryTreeStore::new()),
            relational_store,
            Arc::new(FixtureChainSource::new(1, Vec::new())),
            Arc::new(NoopMetricsSink),
            Arc::new(HashNoteAlgorithms::new()),
            Arc::new(EmptyInitState),
            Arc::new(BlockCache::new()),
            pipeline,
            32,
        );
        SynchronizerHandle::new(Arc::new(synchronizer))
    }

    #[tokio::test]
    async fn fresh_handle_reports_an_empty_pool_and_no_blocks() {
        let handle = handle();
        let profile = handle.get_tx_pool_profile().await;
        assert_eq!(profile.pending_tx_count, 0);
        assert!(handle.get_block_buffers(0).await.is_empty());
    }

    #[tokio::test]
    async fn flush_txs_does_not_panic_with_no_pipeline_running() {
        let handle = handle();
        handle.flush_txs();
    }
}
