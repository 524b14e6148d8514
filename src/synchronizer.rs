//! The world-state synchronizer (spec.md §4.5): startup recovery, block ingestion, and the
//! per-block reconciliation core (`update-dbs`).
//!
//! Structured like the teacher's `Executor`/`driver.rs`: one struct owning every external
//! collaborator by `Arc<dyn Trait>`, a `start()` that performs startup recovery then installs the
//! block-queue consumer as the steady-state handler, and `#[instrument]`-annotated steps that
//! attach block height/hash fields the same way `execute_soft`/`execute_firm` do.

use std::sync::Arc;

use bytes::{
    Buf,
    Bytes,
};
use tracing::{
    debug,
    info,
    instrument,
    warn,
};

use crate::{
    block_cache::BlockCache,
    block_queue::{
        BlockQueue,
        BlockQueueConsumer,
    },
    chain_source::ChainSource,
    init_state::InitStateReader,
    metrics::MetricsSink,
    note_algorithms::{
        ClaimNoteInput,
        NoteAlgorithms,
    },
    pipeline::Pipeline,
    relational_store::{
        AssetMetricsDao,
        ClaimDao,
        RelationalStore,
        RollupDao,
        RollupProofDao,
        TxDao,
    },
    tree_store::TreeStore,
    types::{
        decode_rollup_proof_data,
        defi_claim_fee,
        encode_one,
        is_zero_hash,
        nullifier_to_index,
        Block,
        DecodeError,
        Hash,
        ProofId,
        RollupProofData,
        TreeTag,
        TxType,
        UNUSED_ASSET_ID,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum SynchronizerError {
    #[error("tree store failed during startup: {0}")]
    TreeStore(#[from] crate::tree_store::TreeStoreError),
    #[error("init-from-files failed: {0}")]
    InitFailed(#[from] crate::init_state::InitStateError),
    #[error(
        "init-from-files root mismatch for tag {tag}: expected {expected}, computed {computed}"
    )]
    InitRootMismatch {
        tag: TreeTag,
        expected: String,
        computed: String,
    },
    #[error("failed to decode rollupProofData for block {rollup_id}: {source}")]
    BadProofData {
        rollup_id: u64,
        #[source]
        source: DecodeError,
    },
    #[error("chain source error: {0}")]
    ChainSource(#[from] crate::chain_source::ChainSourceError),
    #[error("relational store error: {0}")]
    RelationalStore(#[from] crate::relational_store::RelationalStoreError),
    #[error("offchain defi deposit data at offchain index {offchain_index} is malformed: {source}")]
    BadOffchainDefiDepositData {
        offchain_index: usize,
        #[source]
        source: DecodeError,
    },
    #[error("inner proof references bridge id {bridge_id} which is not in this rollup's bridgeIds")]
    UnknownBridgeId { bridge_id: u32 },
    #[error("block cache append rejected: {0}")]
    BlockCacheAppend(#[from] crate::block_cache::BlockCacheError),
}

fn hex_string(h: &Hash) -> String {
    hex::encode(h)
}

/// The `OffchainDefiDepositData` fields the core reads (spec.md §4.5.6); the rest of the
/// off-chain blob's layout is a non-goal.
struct OffchainDefiDepositData {
    bridge_id: u32,
    tx_fee: u64,
    deposit_value: u128,
    partial_state: Hash,
    partial_state_secret_eph_pub_key: Hash,
}

fn decode_offchain_defi_deposit_data(mut buf: Bytes) -> Result<OffchainDefiDepositData, DecodeError> {
    let needed = 4 + 8 + 16 + 32 + 32;
    if buf.len() < needed {
        return Err(DecodeError::TooShort {
            needed,
            had: buf.len(),
        });
    }
    let bridge_id = buf.get_u32();
    let tx_fee = buf.get_u64();
    let deposit_value = buf.get_u128();
    let mut partial_state = [0u8; 32];
    buf.copy_to_slice(&mut partial_state);
    let mut partial_state_secret_eph_pub_key = [0u8; 32];
    buf.copy_to_slice(&mut partial_state_secret_eph_pub_key);
    Ok(OffchainDefiDepositData {
        bridge_id,
        tx_fee,
        deposit_value,
        partial_state,
        partial_state_secret_eph_pub_key,
    })
}

/// A minimal big-endian framing for block-cache entries: `rollupId(8) || dataRoot(32) ||
/// ethTxHash(32) || minedAtUnixMillis(8)`. Clients needing the full rollup should look it up by
/// id through the relational store; the cache exists only for cheap catch-up (spec.md §4.6).
fn serialize_settled_rollup(rollup: &RollupDao) -> Bytes {
    let mut buf = Vec::with_capacity(8 + 32 + 32 + 8);
    buf.extend_from_slice(&rollup.rollup_id.to_be_bytes());
    buf.extend_from_slice(&rollup.data_root);
    buf.extend_from_slice(&rollup.eth_tx_hash);
    buf.extend_from_slice(
        &rollup
            .mined
            .map(|t| t.timestamp_millis())
            .unwrap_or_default()
            .to_be_bytes(),
    );
    Bytes::from(buf)
}

pub struct Synchronizer {
    tree_store: Arc<dyn TreeStore>,
    relational_store: Arc<dyn RelationalStore>,
    chain_source: Arc<dyn ChainSource>,
    metrics: Arc<dyn MetricsSink>,
    note_algorithms: Arc<dyn NoteAlgorithms>,
    init_state: Arc<dyn InitStateReader>,
    block_cache: Arc<BlockCache>,
    pipeline: Arc<Pipeline>,
    bridge_calls_per_block: usize,
    queue: BlockQueue,
}

impl Synchronizer {
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tree_store: Arc<dyn TreeStore>,
        relational_store: Arc<dyn RelationalStore>,
        chain_source: Arc<dyn ChainSource>,
        metrics: Arc<dyn MetricsSink>,
        note_algorithms: Arc<dyn NoteAlgorithms>,
        init_state: Arc<dyn InitStateReader>,
        block_cache: Arc<BlockCache>,
        pipeline: Arc<Pipeline>,
        bridge_calls_per_block: usize,
    ) -> (Self, BlockQueueConsumer) {
        let (queue, consumer) = BlockQueue::new();
        (
            Self {
                tree_store,
                relational_store,
                chain_source,
                metrics,
                note_algorithms,
                init_state,
                block_cache,
                pipeline,
                bridge_calls_per_block,
                queue,
            },
            consumer,
        )
    }

    /// Startup recovery (spec.md §4.5 steps 1-9). `consumer` is the other half of the block
    /// queue returned by [`Synchronizer::new`]; the caller is expected to spawn
    /// `consumer.process(|block| self.handle_block(block))` after `start()` returns, since
    /// `Synchronizer` itself does not own a task runtime handle back to itself.
    #[instrument(skip_all)]
    pub async fn start(&self) -> Result<(), SynchronizerError> {
        self.tree_store.start().await?;
        let next_rollup_id = self.relational_store.get_next_rollup_id().await;

        if next_rollup_id == 0 {
            self.init_from_files().await?;
        }

        self.sync_from_chain(self.relational_store.get_next_rollup_id().await)
            .await?;

        let unsettled = self.relational_store.delete_unsettled_rollups().await;
        let orphaned = self.relational_store.delete_orphaned_rollup_proofs().await;
        if unsettled > 0 || orphaned > 0 {
            info!(unsettled, orphaned, "swept stale rows during startup recovery");
        }

        let settled = self.relational_store.get_settled_rollups(0).await;
        self.block_cache
            .rebuild(settled.iter().map(serialize_settled_rollup).collect())
            .await;

        let from = self.relational_store.get_next_rollup_id().await;
        self.chain_source.start(from, self.queue.clone()).await?;

        self.pipeline.start().await;
        info!(from, "synchronizer startup recovery complete");
        Ok(())
    }

    /// Stops every owned component at a safe point (spec.md §5 "Cancellation").
    pub async fn stop(&self) {
        self.queue.cancel();
        self.chain_source.stop().await;
        self.pipeline.stop().await;
        if let Err(error) = self.tree_store.stop().await {
            warn!(%error, "tree store did not stop cleanly");
        }
        info!("synchronizer stopped");
    }

    /// Init-from-files (spec.md §4.5.1).
    #[instrument(skip_all)]
    async fn init_from_files(&self) -> Result<(), SynchronizerError> {
        if self.init_state.get_account_data_file().is_none() {
            debug!("no init account data file configured; starting from empty state");
            return Ok(());
        }

        let roots = self.init_state.get_init_roots().await?;
        self.init_state
            .populate_data_and_roots_trees(self.tree_store.as_ref())
            .await?;
        self.init_state
            .populate_nullifier_tree(self.tree_store.as_ref())
            .await?;

        for tag in [TreeTag::Data, TreeTag::Root, TreeTag::Null] {
            let computed = self.tree_store.get_root(tag);
            let expected = roots.get(tag);
            if computed != expected {
                return Err(SynchronizerError::InitRootMismatch {
                    tag,
                    expected: hex_string(&expected),
                    computed: hex_string(&computed),
                });
            }
        }

        self.tree_store.commit().await?;
        let accounts = self.init_state.read_account_tree_data().await?;
        let count = accounts.len();
        self.relational_store.add_accounts(accounts).await;
        info!(accounts = count, "seeded state from init account data file");
        Ok(())
    }

    /// Sync-from-chain (spec.md §4.5.2).
    #[instrument(skip_all, fields(from))]
    async fn sync_from_chain(&self, from: u64) -> Result<(), SynchronizerError> {
        let blocks = self.chain_source.get_blocks(from).await?;
        debug!(count = blocks.len(), "replaying blocks observed since last shutdown");
        for block in blocks {
            self.update_dbs(&block).await?;
        }
        Ok(())
    }

    /// Handle-block (spec.md §4.5.3): the block-queue consumer's handler.
    pub async fn handle_block(&self, block: Block) {
        self.pipeline.stop().await;
        let rollup_id = block.rollup_id;
        if let Err(error) = self.update_dbs(&block).await {
            warn!(rollup_id, %error, "update_dbs failed for incoming block");
        }
        self.pipeline.start().await;
    }

    /// Update-dbs, the reconciliation core (spec.md §4.5.4).
    #[instrument(skip_all, fields(rollup_id = block.rollup_id))]
    async fn update_dbs(&self, block: &Block) -> Result<(), SynchronizerError> {
        let _timer = self.metrics.process_block_timer();
        let proof = decode_rollup_proof_data(block.rollup_proof_data.clone(), self.bridge_calls_per_block)
            .map_err(|source| SynchronizerError::BadProofData {
                rollup_id: block.rollup_id,
                source,
            })?;

        let ours = self.tree_store.get_root(TreeTag::Data) == proof.new_data_root
            && self.tree_store.get_root(TreeTag::Null) == proof.new_null_root
            && self.tree_store.get_root(TreeTag::Root) == proof.new_data_roots_root
            && self.tree_store.get_root(TreeTag::Defi) == proof.new_defi_root;

        if ours {
            self.tree_store.commit().await?;
            debug!("block matches our staged rollup; committed");
        } else {
            self.tree_store.rollback();
            self.apply_rollup_to_trees(block, &proof).await?;
        }

        self.process_defi_proofs(block, &proof).await?;
        let rollup = self.confirm_or_add_rollup(block, &proof).await?;

        self.block_cache
            .append(rollup.rollup_id, serialize_settled_rollup(&rollup))
            .await?;
        Ok(())
    }

    /// Apply-rollup-to-trees (spec.md §4.5.5).
    async fn apply_rollup_to_trees(
        &self,
        block: &Block,
        proof: &RollupProofData,
    ) -> Result<(), SynchronizerError> {
        if self.tree_store.get_size(TreeTag::Data) > proof.data_start_index {
            debug!("data tree already contains this rollup's leaves; skipping replay");
            return Ok(());
        }

        for (i, inner) in proof.non_padding_proofs() {
            let idx = proof.data_start_index + 2 * i as u64;
            self.tree_store.put(TreeTag::Data, idx, &inner.note_commitment_1)?;
            self.tree_store.put(TreeTag::Data, idx + 1, &inner.note_commitment_2)?;
            if !is_zero_hash(&inner.nullifier_1) {
                self.tree_store.put(
                    TreeTag::Null,
                    nullifier_to_index(&inner.nullifier_1),
                    &encode_one(32),
                )?;
            }
            if !is_zero_hash(&inner.nullifier_2) {
                self.tree_store.put(
                    TreeTag::Null,
                    nullifier_to_index(&inner.nullifier_2),
                    &encode_one(32),
                )?;
            }
        }

        let new_data_root = self.tree_store.get_root(TreeTag::Data);
        self.tree_store
            .put(TreeTag::Root, block.rollup_id + 1, &new_data_root)?;

        for i in 0..self.bridge_calls_per_block {
            let note = &proof.defi_interaction_notes[i];
            if note.is_zero() {
                continue;
            }
            let idx = block.rollup_id * self.bridge_calls_per_block as u64 + i as u64;
            self.tree_store.put(TreeTag::Defi, idx, &note.encode())?;
        }

        self.tree_store.commit().await?;
        Ok(())
    }

    /// Process-defi-proofs (spec.md §4.5.6).
    async fn process_defi_proofs(
        &self,
        block: &Block,
        proof: &RollupProofData,
    ) -> Result<(), SynchronizerError> {
        let mut offchain_index = 0usize;
        for (i, inner) in proof.non_padding_proofs() {
            let offchain_bytes = block
                .offchain_tx_data
                .get(offchain_index)
                .cloned()
                .unwrap_or_default();

            match inner.proof_id {
                ProofId::DefiDeposit => {
                    let deposit =
                        decode_offchain_defi_deposit_data(offchain_bytes).map_err(|source| {
                            SynchronizerError::BadOffchainDefiDepositData {
                                offchain_index,
                                source,
                            }
                        })?;
                    let bridge_index = proof
                        .bridge_ids
                        .iter()
                        .position(|&id| id == deposit.bridge_id)
                        .ok_or(SynchronizerError::UnknownBridgeId {
                            bridge_id: deposit.bridge_id,
                        })?;
                    let interaction_nonce =
                        bridge_index as u64 + block.rollup_id * self.bridge_calls_per_block as u64;
                    let fee = defi_claim_fee(deposit.tx_fee);

                    let commitment = self.note_algorithms.compute_claim_note_commitment(&ClaimNoteInput {
                        bridge_id: deposit.bridge_id,
                        deposit_value: deposit.deposit_value,
                        partial_state: deposit.partial_state,
                        partial_state_secret_eph_pub_key: deposit.partial_state_secret_eph_pub_key,
                        input_nullifier: inner.nullifier_1,
                        interaction_nonce,
                        fee,
                    });
                    let nullifier = self.note_algorithms.compute_claim_nullifier(commitment);

                    self.relational_store
                        .add_claim(ClaimDao {
                            leaf_index: proof.data_start_index + 2 * i as u64,
                            nullifier,
                            bridge_id: deposit.bridge_id,
                            deposit_value: deposit.deposit_value,
                            partial_state: deposit.partial_state,
                            partial_state_secret_eph_pub_key: deposit.partial_state_secret_eph_pub_key,
                            input_nullifier: inner.nullifier_1,
                            interaction_nonce,
                            fee,
                            created: block.created,
                            settled: None,
                            result_rollup_id: None,
                        })
                        .await;
                }
                ProofId::DefiClaim => {
                    self.relational_store
                        .confirm_claimed(inner.nullifier_1, block.created)
                        .await;
                }
                _ => {}
            }
            offchain_index += 1;
        }

        for note in &block.interaction_result {
            self.relational_store
                .update_claims_with_result_rollup_id(note.nonce, block.rollup_id)
                .await;
        }
        Ok(())
    }

    /// Confirm-or-add-rollup (spec.md §4.5.7).
    async fn confirm_or_add_rollup(
        &self,
        block: &Block,
        proof: &RollupProofData,
    ) -> Result<RollupDao, SynchronizerError> {
        let asset_metrics = self.compute_asset_metrics(block, proof).await;

        let rollup = if let Some(existing) = self
            .relational_store
            .get_rollup_proof(proof.rollup_hash, true)
            .await
        {
            let rollup = self
                .relational_store
                .confirm_mined(
                    block.rollup_id,
                    block.gas_used,
                    block.gas_price,
                    block.created,
                    block.eth_tx_hash,
                    block.interaction_result.clone(),
                    existing.tx_ids.clone(),
                    asset_metrics,
                )
                .await?;
            for tx_id in &existing.tx_ids {
                if let Some(tx) = self.relational_store.get_tx(*tx_id).await {
                    let millis = (block.created - tx.created).num_milliseconds().max(0) as u64;
                    self.metrics.tx_settlement_duration(millis);
                }
            }
            rollup
        } else {
            let mut tx_ids = Vec::with_capacity(proof.inner_proofs.len());
            let mut txs = Vec::with_capacity(proof.inner_proofs.len());
            let mut offchain_index = 0usize;
            for (_, inner) in proof.non_padding_proofs() {
                let offchain_bytes = block
                    .offchain_tx_data
                    .get(offchain_index)
                    .cloned()
                    .unwrap_or_default();
                let Some(tx_type) = TxType::from_proof_id(inner.proof_id) else {
                    offchain_index += 1;
                    continue;
                };
                let tx = TxDao {
                    tx_id: inner.tx_id,
                    proof_data: block.rollup_proof_data.clone(),
                    offchain_tx_data: offchain_bytes,
                    nullifier_1: inner.nullifier_1,
                    nullifier_2: inner.nullifier_2,
                    tx_type,
                    created: block.created,
                    mined: Some(block.created),
                    excess_gas: 0,
                };
                tx_ids.push(tx.tx_id);
                txs.push(tx);
                offchain_index += 1;
            }

            self.relational_store
                .add_rollup_proof(
                    RollupProofDao {
                        rollup_hash: proof.rollup_hash,
                        tx_ids: tx_ids.clone(),
                        rollup_size: block.rollup_size,
                        data_start_index: proof.data_start_index,
                        proof_data: block.rollup_proof_data.clone(),
                    },
                    txs,
                )
                .await;

            let rollup = RollupDao {
                rollup_id: block.rollup_id,
                data_root: proof.new_data_root,
                rollup_proof_hash: proof.rollup_hash,
                eth_tx_hash: block.eth_tx_hash,
                created: block.created,
                mined: Some(block.created),
                interaction_result: block.interaction_result.clone(),
                gas_used: block.gas_used,
                gas_price: block.gas_price,
                asset_metrics,
            };
            self.relational_store.add_rollup(rollup.clone()).await;
            rollup
        };

        self.metrics.rollup_received(&rollup);
        Ok(rollup)
    }

    /// Asset metrics (spec.md §4.5.8). `InnerProof` in this data model carries no per-tx value or
    /// asset id, so deposit/withdraw/fee accumulation is necessarily driven off the rollup's defi
    /// bridge-call slots (`assetIds`/`defiInteractionNotes`, both length `K`) rather than off
    /// individual deposit/withdraw proofs; see `DESIGN.md` for this Open Question's resolution.
    async fn compute_asset_metrics(&self, block: &Block, proof: &RollupProofData) -> Vec<AssetMetricsDao> {
        let mut out = Vec::new();
        for i in 0..self.bridge_calls_per_block.min(proof.asset_ids.len()) {
            let asset_id = proof.asset_ids[i];
            if asset_id == UNUSED_ASSET_ID {
                continue;
            }
            let note = &proof.defi_interaction_notes[i];
            let mut metrics = self
                .relational_store
                .get_asset_metrics(asset_id)
                .await
                .unwrap_or_else(|| AssetMetricsDao {
                    rollup_id: block.rollup_id,
                    asset_id,
                    ..Default::default()
                });
            metrics.rollup_id = block.rollup_id;
            metrics.contract_balance = match self.chain_source.get_rollup_balance(asset_id).await {
                Ok(balance) => balance,
                Err(error) => {
                    warn!(asset_id, %error, "failed to read on-chain balance; keeping previous value");
                    metrics.contract_balance
                }
            };
            metrics.total_deposited += note.total_input_value;
            metrics.total_defi_deposited += note.total_input_value;
            if note.result {
                metrics.total_withdrawn += note.total_output_value_a + note.total_output_value_b;
                metrics.total_defi_claimed += note.total_output_value_a + note.total_output_value_b;
            }
            out.push(metrics);
        }
        out
    }

    /// Reset-pipeline (spec.md §4.5.9): operator-initiated recovery without a restart.
    #[instrument(skip_all)]
    pub async fn reset_pipeline(&self) {
        self.pipeline.stop().await;
        self.tree_store.rollback();
        let unsettled = self.relational_store.delete_unsettled_rollups().await;
        let orphaned = self.relational_store.delete_orphaned_rollup_proofs().await;
        let pending = self.relational_store.delete_pending_txs().await;
        info!(unsettled, orphaned, pending, "reset pipeline state");
        self.pipeline.start().await;
    }

    #[must_use]
    pub fn queue(&self) -> BlockQueue {
        self.queue.clone()
    }

    #[must_use]
    pub fn block_cache(&self) -> Arc<BlockCache> {
        self.block_cache.clone()
    }

    #[must_use]
    pub fn pipeline(&self) -> Arc<Pipeline> {
        self.pipeline.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chain_source::FixtureChainSource,
        init_state::EmptyInitState,
        metrics::NoopMetricsSink,
        note_algorithms::HashNoteAlgorithms,
        pipeline::NullProofConstructor,
        relational_store::InMemoryRelationalStore,
        tree_store::InMemoryTreeStore,
        types::{
            DefiInteractionNote,
            InnerProof,
        },
    };

    fn k() -> usize {
        4
    }

    fn empty_proof_bytes(rollup_id: u64, data_start_index: u64, roots: [Hash; 4]) -> Bytes {
        let proof = RollupProofData {
            rollup_id,
            rollup_hash: crate::types::sha256(&rollup_id.to_be_bytes()),
            data_start_index,
            new_data_root: roots[0],
            new_null_root: roots[1],
            new_data_roots_root: roots[2],
            new_defi_root: roots[3],
            bridge_ids: vec![0; k()],
            asset_ids: vec![UNUSED_ASSET_ID; k()],
            defi_interaction_notes: vec![DefiInteractionNote::zero(); k()],
            inner_proofs: vec![InnerProof {
                proof_id: ProofId::Padding,
                tx_id: crate::types::ZERO_HASH,
                note_commitment_1: crate::types::ZERO_HASH,
                note_commitment_2: crate::types::ZERO_HASH,
                nullifier_1: crate::types::ZERO_HASH,
                nullifier_2: crate::types::ZERO_HASH,
            }],
        };
        encode_fixture_proof(&proof)
    }

    /// Test-only encoder matching `decode_rollup_proof_data`'s layout, since the production
    /// codec only decodes (it is fed bytes produced on-chain, never asked to produce them).
    fn encode_fixture_proof(proof: &RollupProofData) -> Bytes {
        let mut buf = Vec::new();
        buf.extend_from_slice(&proof.rollup_id.to_be_bytes());
        buf.extend_from_slice(&proof.rollup_hash);
        buf.extend_from_slice(&proof.data_start_index.to_be_bytes());
        buf.extend_from_slice(&proof.new_data_root);
        buf.extend_from_slice(&proof.new_null_root);
        buf.extend_from_slice(&proof.new_data_roots_root);
        buf.extend_from_slice(&proof.new_defi_root);
        for id in &proof.bridge_ids {
            buf.extend_from_slice(&id.to_be_bytes());
        }
        for id in &proof.asset_ids {
            buf.extend_from_slice(&id.to_be_bytes());
        }
        for note in &proof.defi_interaction_notes {
            buf.extend_from_slice(&note.encode());
        }
        buf.extend_from_slice(&(proof.inner_proofs.len() as u32).to_be_bytes());
        for inner in &proof.inner_proofs {
            let id_byte = match inner.proof_id {
                ProofId::Padding => 0u8,
                ProofId::Deposit => 1,
                ProofId::Withdraw => 2,
                ProofId::Send => 3,
                ProofId::Account => 4,
                ProofId::DefiDeposit => 5,
                ProofId::DefiClaim => 6,
            };
            buf.push(id_byte);
            buf.extend_from_slice(&inner.tx_id);
            buf.extend_from_slice(&inner.note_commitment_1);
            buf.extend_from_slice(&inner.note_commitment_2);
            buf.extend_from_slice(&inner.nullifier_1);
            buf.extend_from_slice(&inner.nullifier_2);
        }
        Bytes::from(buf)
    }

    fn block(rollup_id: u64, proof_bytes: Bytes) -> Block {
        Block {
            rollup_id,
            created: chrono::Utc::now(),
            eth_tx_hash: [9; 32],
            rollup_size: 1,
            rollup_proof_data: proof_bytes,
            offchain_tx_data: vec![],
            interaction_result: vec![],
            gas_used: 1_000_000,
            gas_price: 30_000_000_000,
        }
    }

    async fn harness() -> (Synchronizer, BlockQueueConsumer, Arc<InMemoryTreeStore>) {
        let tree_store = Arc::new(InMemoryTreeStore::new());
        let relational_store = Arc::new(InMemoryRelationalStore::new());
        let chain_source = Arc::new(FixtureChainSource::new(1, vec![]));
        let metrics = Arc::new(NoopMetricsSink);
        let note_algorithms = Arc::new(HashNoteAlgorithms::new());
        let init_state = Arc::new(EmptyInitState);
        let block_cache = Arc::new(BlockCache::new());
        let pipeline = Arc::new(Pipeline::new(
            relational_store.clone(),
            Arc::new(NullProofConstructor),
            1,
            8,
        ));
        let (sync, consumer) = Synchronizer::new(
            tree_store.clone(),
            relational_store,
            chain_source,
            metrics,
            note_algorithms,
            init_state,
            block_cache,
            pipeline,
            k(),
        );
        (sync, consumer, tree_store)
    }

    #[tokio::test]
    async fn cold_start_with_no_blocks_leaves_empty_roots() {
        let (sync, _consumer, tree_store) = harness().await;
        sync.start().await.unwrap();
        for tag in TreeTag::ALL {
            assert_eq!(tree_store.get_root(tag), crate::types::ZERO_HASH);
        }
        assert_eq!(sync.block_cache().len().await, 0);
        sync.stop().await;
    }

    #[tokio::test]
    async fn genesis_block_is_applied_and_cached() {
        let (sync, _consumer, tree_store) = harness().await;
        sync.start().await.unwrap();

        tree_store.start().await.unwrap();
        let empty_roots = [crate::types::ZERO_HASH; 4];
        let proof_bytes = empty_proof_bytes(0, 0, empty_roots);
        let block0 = block(0, proof_bytes);

        sync.handle_block(block0).await;

        assert_eq!(sync.block_cache().len().await, 1);
        sync.stop().await;
    }

    #[tokio::test]
    async fn replaying_the_same_block_is_a_no_op_on_the_second_pass() {
        let (sync, _consumer, tree_store) = harness().await;
        sync.start().await.unwrap();
        tree_store.start().await.unwrap();

        let proof_bytes = empty_proof_bytes(0, 0, [crate::types::ZERO_HASH; 4]);
        sync.update_dbs(&block(0, proof_bytes.clone())).await.unwrap();
        let root_after_first = tree_store.get_root(TreeTag::Data);
        let size_after_first = tree_store.get_size(TreeTag::Data);

        sync.update_dbs(&block(0, proof_bytes)).await.unwrap();
        // The second pass is a no-op throughout: apply-rollup-to-trees' size guard skips
        // reapplying leaves, confirm-or-add-rollup takes the existing-proof branch, and the
        // block cache's append treats the already-present position as already applied rather
        // than a gap — so the whole call succeeds without changing any state.
        assert_eq!(tree_store.get_root(TreeTag::Data), root_after_first);
        assert_eq!(tree_store.get_size(TreeTag::Data), size_after_first);
        assert_eq!(sync.block_cache().len().await, 1);
        sync.stop().await;
    }
}
