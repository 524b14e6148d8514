//! Durable records for transactions, rollup proofs, settled rollups, claims, accounts, and
//! asset metrics (spec.md §3, §4.2).
//!
//! The spec deliberately does not prescribe a backing storage engine ("only the contracts the
//! core requires of them"); this module defines that contract as a trait
//! ([`RelationalStore`]) in the teacher's dynamic-dispatch idiom (spec.md §9) and ships an
//! in-memory implementation sufficient to drive the synchronizer and tests. A SQL-backed
//! implementation would implement the same trait.

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use crate::types::{
    DefiInteractionNote,
    Hash,
    TxType,
};

/// A pending or mined transaction (spec.md §3 "TxDao").
#[derive(Debug, Clone)]
pub struct TxDao {
    pub tx_id: Hash,
    pub proof_data: bytes::Bytes,
    pub offchain_tx_data: bytes::Bytes,
    pub nullifier_1: Hash,
    pub nullifier_2: Hash,
    pub tx_type: TxType,
    pub created: chrono::DateTime<chrono::Utc>,
    pub mined: Option<chrono::DateTime<chrono::Utc>>,
    /// Non-zero only for txs whose fee exceeds the minimum the pipeline required.
    pub excess_gas: u64,
}

/// A (possibly still tentative) rollup proof, keyed by its unique `rollup_hash` (spec.md §3
/// "RollupProofDao").
#[derive(Debug, Clone)]
pub struct RollupProofDao {
    pub rollup_hash: Hash,
    pub tx_ids: Vec<Hash>,
    pub rollup_size: u32,
    pub data_start_index: u64,
    pub proof_data: bytes::Bytes,
}

/// A settled rollup (spec.md §3 "RollupDao").
#[derive(Debug, Clone)]
pub struct RollupDao {
    pub rollup_id: u64,
    pub data_root: Hash,
    pub rollup_proof_hash: Hash,
    pub eth_tx_hash: Hash,
    pub created: chrono::DateTime<chrono::Utc>,
    pub mined: Option<chrono::DateTime<chrono::Utc>>,
    pub interaction_result: Vec<DefiInteractionNote>,
    pub gas_used: u64,
    pub gas_price: u64,
    pub asset_metrics: Vec<AssetMetricsDao>,
}

/// A pending defi-bridge output, redeemed later by a `DEFI_CLAIM` inner proof (spec.md §3
/// "ClaimDao").
#[derive(Debug, Clone)]
pub struct ClaimDao {
    pub leaf_index: u64,
    pub nullifier: Hash,
    pub bridge_id: u32,
    pub deposit_value: u128,
    pub partial_state: Hash,
    pub partial_state_secret_eph_pub_key: Hash,
    pub input_nullifier: Hash,
    pub interaction_nonce: u64,
    pub fee: u64,
    pub created: chrono::DateTime<chrono::Utc>,
    pub settled: Option<chrono::DateTime<chrono::Utc>>,
    /// Set once the rollup whose `interactionResult` contains this claim's nonce settles
    /// (spec.md §4.5.6 "update_claims_with_result_rollup_id").
    pub result_rollup_id: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct AccountDao {
    pub alias_hash: Hash,
    pub account_public_key: Hash,
    pub nonce: u64,
}

#[derive(Debug, Clone, Default)]
pub struct AssetMetricsDao {
    pub rollup_id: u64,
    pub asset_id: u32,
    pub total_deposited: u128,
    pub total_withdrawn: u128,
    pub total_defi_deposited: u128,
    pub total_defi_claimed: u128,
    pub total_fees: u128,
    pub contract_balance: u128,
}

#[derive(Debug, thiserror::Error)]
pub enum RelationalStoreError {
    #[error("rollup {rollup_id} was not found for confirm_mined")]
    RollupNotFound { rollup_id: u64 },
}

/// The narrow API the synchronizer and pipeline consume (spec.md §4.2). All writes within one
/// synchronizer step must be performed under one logical transaction, so that tree commit and
/// db commit succeed or fail together (spec.md §4.2, §4.5.4).
#[async_trait]
pub trait RelationalStore: Send + Sync {
    async fn get_next_rollup_id(&self) -> u64;
    async fn get_settled_rollups(&self, from: u64) -> Vec<RollupDao>;
    async fn get_rollup(&self, id: u64) -> Option<RollupDao>;
    async fn get_rollup_proof(&self, hash: Hash, include_txs: bool) -> Option<RollupProofDao>;

    async fn add_rollup(&self, rollup: RollupDao);

    #[allow(clippy::too_many_arguments)]
    async fn confirm_mined(
        &self,
        id: u64,
        gas_used: u64,
        gas_price: u64,
        mined_at: chrono::DateTime<chrono::Utc>,
        eth_tx_hash: Hash,
        interaction_results: Vec<DefiInteractionNote>,
        tx_ids: Vec<Hash>,
        asset_metrics: Vec<AssetMetricsDao>,
    ) -> Result<RollupDao, RelationalStoreError>;

    async fn delete_unsettled_rollups(&self) -> usize;
    async fn delete_orphaned_rollup_proofs(&self) -> usize;
    async fn delete_pending_txs(&self) -> usize;

    async fn add_claim(&self, claim: ClaimDao);
    async fn confirm_claimed(&self, nullifier: Hash, mined_at: chrono::DateTime<chrono::Utc>);
    async fn update_claims_with_result_rollup_id(&self, nonce: u64, rollup_id: u64);

    async fn add_accounts(&self, accounts: Vec<AccountDao>);

    async fn get_asset_metrics(&self, asset_id: u32) -> Option<AssetMetricsDao>;

    /// Adds a tentative rollup proof written by the pipeline, plus its constituent pending txs.
    /// Rows added this way are swept by [`RelationalStore::delete_unsettled_rollups`] /
    /// [`RelationalStore::delete_orphaned_rollup_proofs`] if never confirmed (spec.md §4.4).
    async fn add_rollup_proof(&self, proof: RollupProofDao, txs: Vec<TxDao>);

    async fn get_pending_txs(&self) -> Vec<TxDao>;
    async fn add_pending_tx(&self, tx: TxDao);
    async fn get_tx(&self, tx_id: Hash) -> Option<TxDao>;
}

#[derive(Debug, Default)]
struct Inner {
    txs: BTreeMap<Hash, TxDao>,
    rollup_proofs: BTreeMap<Hash, RollupProofDao>,
    rollups: BTreeMap<u64, RollupDao>,
    claims: BTreeMap<u64, ClaimDao>,
    claims_by_nullifier: BTreeMap<Hash, u64>,
    claims_by_nonce: BTreeMap<u64, Vec<u64>>,
    accounts: Vec<AccountDao>,
    asset_metrics: BTreeMap<u32, AssetMetricsDao>,
}

/// In-memory reference implementation of [`RelationalStore`]. A real deployment would back this
/// with a SQL engine and wrap each public method's body in a transaction; the single internal
/// mutex here plays the same "one logical transaction per step" role (spec.md §4.2).
#[derive(Debug, Default)]
pub struct InMemoryRelationalStore {
    inner: Mutex<Inner>,
}

impl InMemoryRelationalStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RelationalStore for InMemoryRelationalStore {
    async fn get_next_rollup_id(&self) -> u64 {
        let inner = self.inner.lock().await;
        inner
            .rollups
            .values()
            .filter(|r| r.mined.is_some())
            .map(|r| r.rollup_id)
            .next_back()
            .map_or(0, |id| id + 1)
    }

    async fn get_settled_rollups(&self, from: u64) -> Vec<RollupDao> {
        let inner = self.inner.lock().await;
        inner
            .rollups
            .range(from..)
            .map(|(_, r)| r)
            .filter(|r| r.mined.is_some())
            .cloned()
            .collect()
    }

    async fn get_rollup(&self, id: u64) -> Option<RollupDao> {
        self.inner.lock().await.rollups.get(&id).cloned()
    }

    async fn get_rollup_proof(&self, hash: Hash, _include_txs: bool) -> Option<RollupProofDao> {
        self.inner.lock().await.rollup_proofs.get(&hash).cloned()
    }

    async fn add_rollup(&self, rollup: RollupDao) {
        let mut inner = self.inner.lock().await;
        debug!(rollup_id = rollup.rollup_id, "adding settled rollup");
        inner.rollups.insert(rollup.rollup_id, rollup);
    }

    async fn confirm_mined(
        &self,
        id: u64,
        gas_used: u64,
        gas_price: u64,
        mined_at: chrono::DateTime<chrono::Utc>,
        eth_tx_hash: Hash,
        interaction_results: Vec<DefiInteractionNote>,
        tx_ids: Vec<Hash>,
        asset_metrics: Vec<AssetMetricsDao>,
    ) -> Result<RollupDao, RelationalStoreError> {
        let mut inner = self.inner.lock().await;
        for tx_id in &tx_ids {
            if let Some(tx) = inner.txs.get_mut(tx_id) {
                tx.mined = Some(mined_at);
            }
        }
        let rollup = inner
            .rollups
            .get_mut(&id)
            .ok_or(RelationalStoreError::RollupNotFound { rollup_id: id })?;
        rollup.gas_used = gas_used;
        rollup.gas_price = gas_price;
        rollup.mined = Some(mined_at);
        rollup.eth_tx_hash = eth_tx_hash;
        rollup.interaction_result = interaction_results;
        rollup.asset_metrics = asset_metrics;
        debug!(rollup_id = id, "confirmed rollup mined");
        Ok(rollup.clone())
    }

    async fn delete_unsettled_rollups(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.rollups.len();
        inner.rollups.retain(|_, r| r.mined.is_some());
        before - inner.rollups.len()
    }

    async fn delete_orphaned_rollup_proofs(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let referenced: std::collections::HashSet<Hash> =
            inner.rollups.values().map(|r| r.rollup_proof_hash).collect();
        let before = inner.rollup_proofs.len();
        inner.rollup_proofs.retain(|hash, _| referenced.contains(hash));
        before - inner.rollup_proofs.len()
    }

    async fn delete_pending_txs(&self) -> usize {
        let mut inner = self.inner.lock().await;
        let before = inner.txs.len();
        inner.txs.retain(|_, tx| tx.mined.is_some());
        before - inner.txs.len()
    }

    async fn add_claim(&self, claim: ClaimDao) {
        let mut inner = self.inner.lock().await;
        inner.claims_by_nullifier.insert(claim.nullifier, claim.leaf_index);
        inner
            .claims_by_nonce
            .entry(claim.interaction_nonce)
            .or_default()
            .push(claim.leaf_index);
        inner.claims.insert(claim.leaf_index, claim);
    }

    async fn confirm_claimed(&self, nullifier: Hash, mined_at: chrono::DateTime<chrono::Utc>) {
        let mut inner = self.inner.lock().await;
        if let Some(&leaf_index) = inner.claims_by_nullifier.get(&nullifier) {
            if let Some(claim) = inner.claims.get_mut(&leaf_index) {
                claim.settled = Some(mined_at);
            }
        }
    }

    async fn update_claims_with_result_rollup_id(&self, nonce: u64, rollup_id: u64) {
        let mut inner = self.inner.lock().await;
        let Some(leaf_indices) = inner.claims_by_nonce.get(&nonce).cloned() else {
            return;
        };
        for leaf_index in leaf_indices {
            if let Some(claim) = inner.claims.get_mut(&leaf_index) {
                claim.result_rollup_id = Some(rollup_id);
            }
        }
    }

    async fn add_accounts(&self, accounts: Vec<AccountDao>) {
        let mut inner = self.inner.lock().await;
        inner.accounts.extend(accounts);
    }

    async fn get_asset_metrics(&self, asset_id: u32) -> Option<AssetMetricsDao> {
        self.inner.lock().await.asset_metrics.get(&asset_id).cloned()
    }

    async fn add_rollup_proof(&self, proof: RollupProofDao, txs: Vec<TxDao>) {
        let mut inner = self.inner.lock().await;
        for tx in txs {
            inner.txs.insert(tx.tx_id, tx);
        }
        inner.rollup_proofs.insert(proof.rollup_hash, proof);
    }

    async fn get_pending_txs(&self) -> Vec<TxDao> {
        self.inner
            .lock()
            .await
            .txs
            .values()
            .filter(|tx| tx.mined.is_none())
            .cloned()
            .collect()
    }

    async fn add_pending_tx(&self, tx: TxDao) {
        self.inner.lock().await.txs.insert(tx.tx_id, tx);
    }

    async fn get_tx(&self, tx_id: Hash) -> Option<TxDao> {
        self.inner.lock().await.txs.get(&tx_id).cloned()
    }
}

impl InMemoryRelationalStore {
    /// Test/operator helper: write asset metrics directly rather than through `confirm_mined`.
    pub async fn set_asset_metrics(&self, metrics: AssetMetricsDao) {
        self.inner
            .lock()
            .await
            .asset_metrics
            .insert(metrics.asset_id, metrics);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> Hash {
        [byte; 32]
    }

    fn sample_rollup(id: u64, proof_hash: Hash) -> RollupDao {
        sample_rollup_with_mined(id, proof_hash, Some(chrono::Utc::now()))
    }

    fn sample_rollup_with_mined(
        id: u64,
        proof_hash: Hash,
        mined: Option<chrono::DateTime<chrono::Utc>>,
    ) -> RollupDao {
        RollupDao {
            rollup_id: id,
            data_root: hash(1),
            rollup_proof_hash: proof_hash,
            eth_tx_hash: hash(2),
            created: chrono::Utc::now(),
            mined,
            interaction_result: vec![],
            gas_used: 0,
            gas_price: 0,
            asset_metrics: vec![],
        }
    }

    #[tokio::test]
    async fn next_rollup_id_is_zero_when_empty() {
        let store = InMemoryRelationalStore::new();
        assert_eq!(store.get_next_rollup_id().await, 0);
    }

    #[tokio::test]
    async fn next_rollup_id_follows_highest_settled() {
        let store = InMemoryRelationalStore::new();
        store.add_rollup(sample_rollup(0, hash(10))).await;
        store.add_rollup(sample_rollup(5, hash(11))).await;
        assert_eq!(store.get_next_rollup_id().await, 6);
    }

    #[tokio::test]
    async fn next_rollup_id_skips_unsettled_rows() {
        let store = InMemoryRelationalStore::new();
        store.add_rollup(sample_rollup(0, hash(10))).await;
        // A tentative rollup the pipeline has written but that hasn't settled on-chain yet must
        // not advance the next id, or a restart after a crash would skip or collide with it.
        store
            .add_rollup(sample_rollup_with_mined(1, hash(11), None))
            .await;
        assert_eq!(store.get_next_rollup_id().await, 1);
    }

    #[tokio::test]
    async fn settled_rollups_exclude_unsettled_rows() {
        let store = InMemoryRelationalStore::new();
        store.add_rollup(sample_rollup(0, hash(10))).await;
        store
            .add_rollup(sample_rollup_with_mined(1, hash(11), None))
            .await;
        let settled = store.get_settled_rollups(0).await;
        assert_eq!(settled.len(), 1);
        assert_eq!(settled[0].rollup_id, 0);
    }

    #[tokio::test]
    async fn orphaned_proofs_are_those_with_no_owning_rollup() {
        let store = InMemoryRelationalStore::new();
        store
            .add_rollup_proof(
                RollupProofDao {
                    rollup_hash: hash(20),
                    tx_ids: vec![],
                    rollup_size: 1,
                    data_start_index: 0,
                    proof_data: bytes::Bytes::new(),
                },
                vec![],
            )
            .await;
        assert_eq!(store.delete_orphaned_rollup_proofs().await, 1);
        assert!(store.get_rollup_proof(hash(20), false).await.is_none());
    }

    #[tokio::test]
    async fn referenced_proofs_survive_orphan_sweep() {
        let store = InMemoryRelationalStore::new();
        store
            .add_rollup_proof(
                RollupProofDao {
                    rollup_hash: hash(20),
                    tx_ids: vec![],
                    rollup_size: 1,
                    data_start_index: 0,
                    proof_data: bytes::Bytes::new(),
                },
                vec![],
            )
            .await;
        let mut rollup = sample_rollup(0, hash(20));
        rollup.rollup_proof_hash = hash(20);
        store.add_rollup(rollup).await;
        assert_eq!(store.delete_orphaned_rollup_proofs().await, 0);
        assert!(store.get_rollup_proof(hash(20), false).await.is_some());
    }

    #[tokio::test]
    async fn claim_nonce_lookup_matches_interaction_nonce_formula() {
        let store = InMemoryRelationalStore::new();
        store
            .add_claim(ClaimDao {
                leaf_index: 14,
                nullifier: hash(1),
                bridge_id: 2,
                deposit_value: 100,
                partial_state: hash(2),
                partial_state_secret_eph_pub_key: hash(3),
                input_nullifier: hash(4),
                interaction_nonce: 10,
                fee: 5,
                created: chrono::Utc::now(),
                settled: None,
                result_rollup_id: None,
            })
            .await;
        store.update_claims_with_result_rollup_id(10, 2).await;
        let inner = store.inner.lock().await;
        assert_eq!(inner.claims[&14].result_rollup_id, Some(2));
    }
}
