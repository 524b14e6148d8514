use std::{
    process::ExitCode,
    sync::Arc,
};

use eyre::WrapErr as _;
use rollup_sequencer::{
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
    tree_store::InMemoryTreeStore,
    Config,
    Service,
    Synchronizer,
    SynchronizerHandle,
};
use tokio::{
    select,
    signal::unix::{
        signal,
        SignalKind,
    },
};
use tracing::{
    error,
    info,
    warn,
};

// Following the BSD convention for failing to read config.
// See here: https://freedesktop.org/software/systemd/man/systemd.exec.html#Process%20Exit%20Codes
const EX_CONFIG: u8 = 78;

#[tokio::main]
async fn main() -> ExitCode {
    rollup_sequencer::install_error_handler().expect("error hook must be the first hook installed");

    let cfg: Config = match rollup_sequencer::config::get().wrap_err("failed reading config") {
        Err(e) => {
            eprintln!("failed to start rollup sequencer:\n{e}");
            return ExitCode::from(EX_CONFIG);
        }
        Ok(cfg) => cfg,
    };

    let telemetry_conf = rollup_sequencer::telemetry::configure()
        .set_force_stdout(cfg.force_stdout)
        .set_pretty_print(cfg.pretty_print)
        .filter_directives(&cfg.log);

    let _telemetry_guard = match telemetry_conf.try_init().wrap_err("failed to setup telemetry") {
        Err(e) => {
            eprintln!("initializing rollup sequencer failed:\n{e:?}");
            return ExitCode::FAILURE;
        }
        Ok(guard) => guard,
    };

    info!(
        config = serde_json::to_string(&cfg).expect("serializing config to a string cannot fail"),
        "initializing rollup sequencer"
    );

    // Reference/fixture implementations of every external collaborator the spec leaves
    // unprescribed (chain source, proof constructor, note algorithms, metrics sink, init-state
    // snapshot, storage backends). A real deployment swaps these for RPC/SQL/prover-backed
    // implementations of the same traits; see DESIGN.md.
    let tree_store = Arc::new(InMemoryTreeStore::new());
    let relational_store = Arc::new(InMemoryRelationalStore::new());
    let chain_source = Arc::new(FixtureChainSource::new(cfg.chain_id, Vec::new()));
    let metrics = Arc::new(NoopMetricsSink);
    let note_algorithms = Arc::new(HashNoteAlgorithms::new());
    let init_state = Arc::new(EmptyInitState);
    let block_cache = Arc::new(BlockCache::new());
    let pipeline = Arc::new(Pipeline::new(
        relational_store.clone(),
        Arc::new(NullProofConstructor),
        cfg.min_txs_per_rollup,
        cfg.max_txs_per_rollup,
    ));

    let (synchronizer, consumer) = Synchronizer::new(
        tree_store,
        relational_store,
        chain_source,
        metrics,
        note_algorithms,
        init_state,
        block_cache,
        pipeline,
        cfg.bridge_calls_per_block as usize,
    );

    let synchronizer = Arc::new(synchronizer);
    // The operator surface (C10): flush_txs/reset_pipeline/get_next_publish_time/
    // get_tx_pool_profile/get_block_buffers. Binding it to a transport (HTTP, an admin RPC) is out
    // of scope; `_operator` is the concrete seam such a binding would clone and hand out.
    let _operator = SynchronizerHandle::new(synchronizer.clone());

    let service = Service::new(synchronizer, consumer);
    let mut handle = match service.spawn().await.wrap_err("failed starting synchronizer") {
        Err(error) => {
            error!(%error, "failed initializing rollup sequencer");
            return ExitCode::FAILURE;
        }
        Ok(handle) => handle,
    };

    let mut sigterm = signal(SignalKind::terminate())
        .expect("setting a SIGTERM listener should always work on unix; is this running on unix?");

    select!(
        _ = sigterm.recv() => {
            info!("received SIGTERM; shutting down rollup sequencer");
            if let Err(error) = handle.shutdown().await {
                warn!(%error, "encountered an error while shutting down");
            }
            info!("rollup sequencer stopped");
            ExitCode::SUCCESS
        }

        res = handle.task_mut() => {
            error!(
                error = res.err().map(tracing::field::display),
                "rollup sequencer task exited unexpectedly",
            );
            ExitCode::FAILURE
        }
    )
}
