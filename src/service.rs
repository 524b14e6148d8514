//! Top-level service wiring (SPEC_FULL.md C10 / spec.md §5): owns the synchronizer, performs
//! startup recovery, and spawns the block-queue consumer loop as a background task.
//!
//! Grounded on the teacher's `conductor/mod.rs` `Conductor::spawn`/`Handle` shape, simplified: no
//! restart-on-panic supervision loop (this spec does not call for one) and no `pin_project`-based
//! `Future` impl on the handle — `main` just awaits `handle.task_mut()` directly the same way
//! `&mut handle` is awaited there.

use std::sync::Arc;

use tokio::task::{
    JoinError,
    JoinHandle,
};
use tracing::instrument;

use crate::{
    block_queue::BlockQueueConsumer,
    synchronizer::{
        Synchronizer,
        SynchronizerError,
    },
};

pub struct Service {
    synchronizer: Arc<Synchronizer>,
    consumer: BlockQueueConsumer,
}

impl Service {
    #[must_use]
    pub fn new(synchronizer: Arc<Synchronizer>, consumer: BlockQueueConsumer) -> Self {
        Self {
            synchronizer,
            consumer,
        }
    }

    /// Runs startup recovery, then spawns the steady-state block-handling loop.
    pub async fn spawn(self) -> Result<Handle, SynchronizerError> {
        self.synchronizer.start().await?;

        let synchronizer = self.synchronizer.clone();
        let task = tokio::spawn(async move {
            self.consumer
                .process(|block| {
                    let synchronizer = synchronizer.clone();
                    async move { synchronizer.handle_block(block).await }
                })
                .await;
        });

        Ok(Handle {
            synchronizer: self.synchronizer,
            task,
        })
    }
}

/// Handle to a running [`Service`], returned by [`Service::spawn`].
pub struct Handle {
    synchronizer: Arc<Synchronizer>,
    task: JoinHandle<()>,
}

impl Handle {
    /// The background task, for `select!`-ing against an unexpected exit the same way the
    /// teacher's `main.rs` selects over `&mut handle`.
    pub fn task_mut(&mut self) -> &mut JoinHandle<()> {
        &mut self.task
    }

    /// Requests a graceful stop of the synchronizer (and transitively its pipeline, chain source,
    /// and tree store) and waits for the consumer task to exit.
    #[instrument(skip_all)]
    pub async fn shutdown(&mut self) -> Result<(), JoinError> {
        self.synchronizer.stop().await;
        (&mut self.task).await
    }
}
