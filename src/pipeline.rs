//! The rollup-construction pipeline (spec.md §4.4).
//!
//! A long-running task that repeatedly drains eligible pending txs, assembles a rollup proof via
//! the external `ProofConstructor` collaborator, publishes it, and records a tentative
//! `RollupDao`/`RollupProofDao` pair. Structured the way the teacher structures `Executor`: a
//! `start`/`stop` lifecycle around a task spawned onto the current runtime, a
//! `CancellationToken` for stop, and a `Notify` for out-of-band wakeups (`flush_txs`), rather
//! than a fixed poll interval.

use std::{
    collections::HashMap,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use tokio::{
    sync::{
        Mutex,
        Notify,
    },
    task::JoinHandle,
    time::timeout,
};
use tokio_util::sync::CancellationToken;
use tracing::{
    debug,
    error,
    info,
    instrument,
};

use crate::{
    relational_store::{
        RelationalStore,
        RollupDao,
        RollupProofDao,
        TxDao,
    },
    types::Hash,
};

#[derive(Debug, thiserror::Error)]
pub enum ProofConstructorError {
    #[error("proof construction failed: {0}")]
    ConstructionFailed(String),
    #[error("publishing the constructed rollup failed: {0}")]
    PublishFailed(String),
}

/// What the pipeline hands the relational store once a rollup has been constructed and
/// published, before the corresponding block has been observed on-chain (spec.md §4.4 "records a
/// tentative RollupProofDao").
#[derive(Debug, Clone)]
pub struct ConstructedRollup {
    pub rollup_hash: Hash,
    pub eth_tx_hash: Hash,
    pub proof: RollupProofDao,
}

/// Proof construction and bridge coordination are an external collaborator (spec.md §4.4); this
/// is its seam. A real implementation calls into the SNARK prover and the chain source's submit
/// path; the reference implementation is a deterministic test double (see [`NullProofConstructor`]).
#[async_trait]
pub trait ProofConstructor: Send + Sync {
    async fn construct_and_publish(
        &self,
        rollup_id: u64,
        data_start_index: u64,
        txs: Vec<TxDao>,
    ) -> Result<ConstructedRollup, ProofConstructorError>;
}

/// A deterministic stand-in: hashes the tx ids together for `rollup_hash`, fabricates an
/// `eth_tx_hash`, and never fails. Sufficient to exercise the pipeline's lifecycle and the
/// synchronizer's "ours" reconciliation path without a real prover.
#[derive(Debug, Default)]
pub struct NullProofConstructor;

#[async_trait]
impl ProofConstructor for NullProofConstructor {
    async fn construct_and_publish(
        &self,
        rollup_id: u64,
        data_start_index: u64,
        txs: Vec<TxDao>,
    ) -> Result<ConstructedRollup, ProofConstructorError> {
        let mut buf = Vec::new();
        buf.extend_from_slice(b"rollup");
        buf.extend_from_slice(&rollup_id.to_be_bytes());
        let tx_ids: Vec<Hash> = txs.iter().map(|tx| tx.tx_id).collect();
        for tx_id in &tx_ids {
            buf.extend_from_slice(tx_id);
        }
        let rollup_hash = crate::types::sha256(&buf);
        let eth_tx_hash = crate::types::sha256(&[buf.as_slice(), b"eth"].concat());
        Ok(ConstructedRollup {
            rollup_hash,
            eth_tx_hash,
            proof: RollupProofDao {
                rollup_hash,
                tx_ids,
                rollup_size: txs.len() as u32,
                data_start_index,
                proof_data: bytes::Bytes::new(),
            },
        })
    }
}

/// Pure-read snapshot backing `get_next_publish_time` (spec.md §4.4).
#[derive(Debug, Clone, Default)]
pub struct PublishTimeProfile {
    pub base_timeout: Duration,
    pub bridge_timeouts: HashMap<u32, Duration>,
}

/// Pure-read snapshot backing `get_tx_pool_profile` (spec.md §4.4).
#[derive(Debug, Clone, Default)]
pub struct TxPoolProfile {
    pub pending_tx_count: usize,
    pub oldest_pending_tx: Option<chrono::DateTime<chrono::Utc>>,
}

struct Inner {
    store: Arc<dyn RelationalStore>,
    constructor: Arc<dyn ProofConstructor>,
    min_txs_per_rollup: usize,
    max_txs_per_rollup: usize,
    base_timeout: Duration,
}

/// A running (or stopped) instance of the pipeline. `stop()` is idempotent: calling it twice, or
/// calling it when the task already exited on its own, both return immediately once the task
/// handle (if any) has joined.
pub struct Pipeline {
    inner: Arc<Inner>,
    cancel: Mutex<CancellationToken>,
    flush: Arc<Notify>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Pipeline {
    #[must_use]
    pub fn new(
        store: Arc<dyn RelationalStore>,
        constructor: Arc<dyn ProofConstructor>,
        min_txs_per_rollup: usize,
        max_txs_per_rollup: usize,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                constructor,
                min_txs_per_rollup,
                max_txs_per_rollup,
                base_timeout: Duration::from_secs(60),
            }),
            cancel: Mutex::new(CancellationToken::new()),
            flush: Arc::new(Notify::new()),
            handle: Mutex::new(None),
        }
    }

    /// Spawns the pipeline task. Returns immediately; any internal failure is logged from within
    /// the task and does not propagate here (spec.md §4.4 "any internal failure must log and
    /// exit without poisoning other components").
    pub async fn start(&self) {
        let cancel = CancellationToken::new();
        *self.cancel.lock().await = cancel.clone();
        let inner = self.inner.clone();
        let flush = self.flush.clone();
        let join = tokio::spawn(run(inner, cancel, flush));
        *self.handle.lock().await = Some(join);
        info!("pipeline started");
    }

    /// Cancels the task at its next safe point and waits for it to exit, bounded at 30 seconds
    /// (spec.md §4.4 "must complete within a bounded time"). Safe to call repeatedly.
    pub async fn stop(&self) {
        self.cancel.lock().await.cancel();
        let handle = self.handle.lock().await.take();
        if let Some(handle) = handle {
            if timeout(Duration::from_secs(30), handle).await.is_err() {
                error!("pipeline did not stop within the bounded shutdown window");
            }
        }
        info!("pipeline stopped");
    }

    /// Requests publishing whatever is pending at the pipeline's next safe point.
    pub fn flush_txs(&self) {
        self.flush.notify_one();
    }

    #[must_use]
    pub fn get_next_publish_time(&self) -> PublishTimeProfile {
        PublishTimeProfile {
            base_timeout: self.inner.base_timeout,
            bridge_timeouts: HashMap::new(),
        }
    }

    pub async fn get_tx_pool_profile(&self) -> TxPoolProfile {
        let pending = self.inner.store.get_pending_txs().await;
        TxPoolProfile {
            pending_tx_count: pending.len(),
            oldest_pending_tx: pending.iter().map(|tx| tx.created).min(),
        }
    }
}

#[instrument(skip_all)]
async fn run(inner: Arc<Inner>, cancel: CancellationToken, flush: Arc<Notify>) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                info!("pipeline cancelled; exiting at safe point");
                return;
            }
            () = flush.notified() => {
                debug!("pipeline flush requested");
            }
            () = tokio::time::sleep(Duration::from_millis(500)) => {}
        }

        if let Err(error) = try_publish_round(&inner).await {
            error!(%error, "pipeline round failed; will retry");
        }
    }
}

async fn try_publish_round(inner: &Inner) -> Result<(), ProofConstructorError> {
    let pending = inner.store.get_pending_txs().await;
    if pending.len() < inner.min_txs_per_rollup {
        return Ok(());
    }
    let txs: Vec<TxDao> = pending.into_iter().take(inner.max_txs_per_rollup).collect();

    let rollup_id = inner.store.get_next_rollup_id().await;
    let data_start_index = rollup_id * 2 * u64::try_from(inner.max_txs_per_rollup).unwrap_or(u64::MAX);

    let constructed = inner
        .constructor
        .construct_and_publish(rollup_id, data_start_index, txs.clone())
        .await?;

    inner
        .store
        .add_rollup_proof(constructed.proof.clone(), txs)
        .await;
    inner
        .store
        .add_rollup(RollupDao {
            rollup_id,
            data_root: crate::types::ZERO_HASH,
            rollup_proof_hash: constructed.rollup_hash,
            eth_tx_hash: constructed.eth_tx_hash,
            created: chrono::Utc::now(),
            mined: None,
            interaction_result: vec![],
            gas_used: 0,
            gas_price: 0,
            asset_metrics: vec![],
        })
        .await;
    debug!(rollup_id, "published tentative rollup");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relational_store::InMemoryRelationalStore;

    fn tx(id: u8) -> TxDao {
        TxDao {
            tx_id: [id; 32],
            proof_data: bytes::Bytes::new(),
            offchain_tx_data: bytes::Bytes::new(),
            nullifier_1: crate::types::ZERO_HASH,
            nullifier_2: crate::types::ZERO_HASH,
            tx_type: crate::types::TxType::Transfer,
            created: chrono::Utc::now(),
            mined: None,
            excess_gas: 0,
        }
    }

    #[tokio::test]
    async fn round_below_minimum_writes_nothing() {
        let store: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new());
        store.add_pending_tx(tx(1)).await;
        let inner = Inner {
            store: store.clone(),
            constructor: Arc::new(NullProofConstructor),
            min_txs_per_rollup: 2,
            max_txs_per_rollup: 8,
            base_timeout: Duration::from_secs(1),
        };
        try_publish_round(&inner).await.unwrap();
        assert_eq!(store.get_next_rollup_id().await, 0);
    }

    #[tokio::test]
    async fn round_at_or_above_minimum_publishes_a_tentative_rollup() {
        let store: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new());
        store.add_pending_tx(tx(1)).await;
        store.add_pending_tx(tx(2)).await;
        let inner = Inner {
            store: store.clone(),
            constructor: Arc::new(NullProofConstructor),
            min_txs_per_rollup: 2,
            max_txs_per_rollup: 8,
            base_timeout: Duration::from_secs(1),
        };
        try_publish_round(&inner).await.unwrap();
        let rollup = store.get_rollup(0).await.expect("tentative rollup row");
        assert!(rollup.mined.is_none());
        assert!(store.get_rollup_proof(rollup.rollup_proof_hash, false).await.is_some());
    }

    #[tokio::test]
    async fn start_then_stop_is_bounded_and_idempotent() {
        let store: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new());
        let pipeline = Pipeline::new(store, Arc::new(NullProofConstructor), 1, 8);
        pipeline.start().await;
        pipeline.stop().await;
        pipeline.stop().await;
    }

    #[tokio::test]
    async fn tx_pool_profile_reflects_pending_count() {
        let store: Arc<dyn RelationalStore> = Arc::new(InMemoryRelationalStore::new());
        store.add_pending_tx(tx(1)).await;
        let pipeline = Pipeline::new(store, Arc::new(NullProofConstructor), 100, 8);
        let profile = pipeline.get_tx_pool_profile().await;
        assert_eq!(profile.pending_tx_count, 1);
    }
}
